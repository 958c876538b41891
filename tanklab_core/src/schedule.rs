//! Setpoint schedule: the target for h2 at each loop iteration.

use crate::error::TankError;

#[derive(Debug, Clone, PartialEq)]
pub struct SetpointSchedule {
    initial: f64,
    /// `(iteration, setpoint)` pairs, strictly increasing by iteration.
    steps: Vec<(usize, f64)>,
}

impl Default for SetpointSchedule {
    fn default() -> Self {
        Self::constant(0.5)
    }
}

impl SetpointSchedule {
    pub fn constant(setpoint: f64) -> Self {
        Self {
            initial: setpoint,
            steps: Vec::new(),
        }
    }

    pub fn new(initial: f64, steps: Vec<(usize, f64)>) -> Result<Self, TankError> {
        if !(initial.is_finite() && initial >= 0.0) {
            return Err(TankError::Config(format!(
                "initial setpoint must be finite and >= 0 (got {initial})"
            )));
        }
        for w in steps.windows(2) {
            if w[1].0 <= w[0].0 {
                return Err(TankError::Config(format!(
                    "setpoint steps must be strictly increasing by iteration ({} after {})",
                    w[1].0, w[0].0
                )));
            }
        }
        if let Some((at, sp)) = steps.iter().find(|(_, sp)| !(sp.is_finite() && *sp >= 0.0)) {
            return Err(TankError::Config(format!(
                "setpoint at iteration {at} must be finite and >= 0 (got {sp})"
            )));
        }
        Ok(Self { initial, steps })
    }

    /// Setpoint in force at `iteration`: the last step at or before it.
    pub fn setpoint_at(&self, iteration: usize) -> f64 {
        let idx = self.steps.partition_point(|(at, _)| *at <= iteration);
        if idx == 0 {
            self.initial
        } else {
            self.steps[idx - 1].1
        }
    }
}
