//! Actuator writer: bounds and resolution of the pump command.

use tanklab_traits::Pump;

use crate::error::TankError;
use crate::hw_error::map_hw_error;

/// Command resolution: two decimal places.
pub const COMMAND_STEPS: f64 = 100.0;

/// Clamp to `[0, 1]` and round to the actuator resolution. Non-finite
/// values become 0.
#[inline]
pub fn quantize_duty(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * COMMAND_STEPS).round() / COMMAND_STEPS
}

/// Quantize and transmit `value`; returns what was actually written.
pub fn write_command<P: Pump + ?Sized>(pump: &mut P, value: f64) -> Result<f64, TankError> {
    let duty = quantize_duty(value);
    pump.set_duty(duty).map_err(|e| map_hw_error(&*e))?;
    tracing::trace!(requested = value, duty, "actuator write");
    Ok(duty)
}
