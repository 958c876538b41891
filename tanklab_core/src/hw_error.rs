//! Maps `Box<dyn Error>` from trait boundaries to typed `TankError`.
//!
//! The traits in `tanklab_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `tanklab_hardware::HwError`.

use crate::error::TankError;

/// Map a trait-boundary error to a typed `TankError`.
///
/// Everything coming off the device link is `DeviceUnavailable` except a
/// rejected pin number, which is a wiring/config mistake.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TankError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<tanklab_hardware::HwError>() {
            return match hw {
                tanklab_hardware::HwError::InvalidPin(_) => TankError::Config(hw.to_string()),
                other => TankError::DeviceUnavailable(other.to_string()),
            };
        }
    }

    TankError::DeviceUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_errors_are_device_unavailable() {
        let e = std::io::Error::new(std::io::ErrorKind::NotConnected, "unplugged");
        assert_eq!(
            map_hw_error(&e),
            TankError::DeviceUnavailable("unplugged".into())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn invalid_pin_maps_to_config() {
        let e = tanklab_hardware::HwError::InvalidPin(42);
        assert!(matches!(map_hw_error(&e), TankError::Config(_)));
        let lost = tanklab_hardware::HwError::LinkLost;
        assert!(matches!(
            map_hw_error(&lost),
            TankError::DeviceUnavailable(_)
        ));
    }
}
