use tanklab_core::TankError;
use tanklab_core::hw_error::map_hw_error;
use tanklab_core::sensor::read_levels;
use tanklab_traits::{DeviceError, LevelSensor};

struct Fixed(Result<(f64, f64), fn() -> DeviceError>);

impl LevelSensor for Fixed {
    fn read_levels(&mut self) -> Result<(f64, f64), DeviceError> {
        match &self.0 {
            Ok(v) => Ok(*v),
            Err(make) => Err(make()),
        }
    }
}

#[test]
fn negative_readings_clamp_to_zero() {
    let l = read_levels(&mut Fixed(Ok((-0.01, 0.25)))).unwrap();
    assert_eq!(l.h1, 0.0);
    assert_eq!(l.h2, 0.25);
}

#[test]
fn nan_reading_is_device_unavailable() {
    let err = read_levels(&mut Fixed(Ok((f64::NAN, 0.25)))).unwrap_err();
    assert!(matches!(err, TankError::DeviceUnavailable(_)));
}

#[cfg(feature = "hardware-errors")]
#[test]
fn hardware_timeout_surfaces_as_device_unavailable() {
    fn timeout() -> DeviceError {
        Box::new(tanklab_hardware::HwError::Timeout)
    }
    let err = read_levels(&mut Fixed(Err(timeout))).unwrap_err();
    match err {
        TankError::DeviceUnavailable(msg) => assert!(msg.contains("timeout"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn boxed_io_error_maps_by_message() {
    let e: DeviceError = Box::new(std::io::Error::other("port vanished"));
    assert_eq!(
        map_hw_error(&*e),
        TankError::DeviceUnavailable("port vanished".into())
    );
}
