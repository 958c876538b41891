//! Sensor reader: one `(h1, h2)` sample from the rig.

use tanklab_traits::LevelSensor;

use crate::error::TankError;
use crate::hw_error::map_hw_error;
use crate::plant::Levels;

/// Read both levels, clamped non-negative. A non-finite reading is treated as
/// a broken link.
pub fn read_levels<S: LevelSensor + ?Sized>(sensor: &mut S) -> Result<Levels, TankError> {
    let raw = Levels::from(sensor.read_levels().map_err(|e| map_hw_error(&*e))?);
    if !raw.is_finite() {
        return Err(TankError::DeviceUnavailable(format!(
            "non-finite level reading ({}, {})",
            raw.h1, raw.h2
        )));
    }
    Ok(raw.clamped())
}
