//! Plant predictor: advances tank levels over one control interval.
//!
//! The loop keeps the predicted state separate from the measured one; the
//! predictor only ever sees its own previous output and the applied command.

use crate::error::TankError;
use crate::integrator::Dopri5;
use crate::plant::{Levels, PlantParams};

/// Backend that integrates the plant from `levels` with constant `command`
/// for `dt` seconds.
pub trait Predictor {
    fn advance(&mut self, levels: Levels, command: f64, dt: f64) -> Result<Levels, TankError>;
}

impl<T: Predictor + ?Sized> Predictor for Box<T> {
    fn advance(&mut self, levels: Levels, command: f64, dt: f64) -> Result<Levels, TankError> {
        (**self).advance(levels, command, dt)
    }
}

/// In-process numeric integration of the plant ODE.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPredictor {
    plant: PlantParams,
    integrator: Dopri5,
}

impl LocalPredictor {
    pub fn new(plant: PlantParams) -> Self {
        Self {
            plant,
            integrator: Dopri5::default(),
        }
    }

    /// [`Predictor::advance`] without the mutable receiver.
    pub fn step(&self, levels: Levels, command: f64, dt: f64) -> Result<Levels, TankError> {
        let u = if command.is_finite() {
            command.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let plant = self.plant;
        let y = self
            .integrator
            .integrate(
                move |_, y| plant.derivatives(y, u),
                levels.clamped().to_array(),
                dt,
            )
            .map_err(|e| TankError::Prediction(e.to_string()))?;
        Ok(Levels::from_array(y).clamped())
    }
}

impl Predictor for LocalPredictor {
    fn advance(&mut self, levels: Levels, command: f64, dt: f64) -> Result<Levels, TankError> {
        self.step(levels, command, dt)
    }
}
