pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Error type crossing the device trait boundary.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;

/// Two analog level channels: upper tank (h1) and lower tank (h2).
///
/// Implementations return values already scaled to the physical unit used by
/// the model and the setpoint.
pub trait LevelSensor {
    fn read_levels(&mut self) -> Result<(f64, f64), DeviceError>;
}

/// PWM-driven pump. `duty` is a fraction in `[0, 1]`.
pub trait Pump {
    fn set_duty(&mut self, duty: f64) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
}

impl<T: LevelSensor + ?Sized> LevelSensor for Box<T> {
    fn read_levels(&mut self) -> Result<(f64, f64), DeviceError> {
        (**self).read_levels()
    }
}

impl<T: Pump + ?Sized> Pump for Box<T> {
    fn set_duty(&mut self, duty: f64) -> Result<(), DeviceError> {
        (**self).set_duty(duty)
    }
    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }
}

/// A device link exposing both the level sensors and the pump.
pub trait TankDevice: LevelSensor + Pump {}

impl<T: LevelSensor + Pump + ?Sized> TankDevice for T {}
