//! Simulated rig: the plant model behind the device traits.
//!
//! Time is taken from the injected clock. On every read or write the plant is
//! first caught up to "now" with the duty that has been applied since the last
//! interaction, so pacing the loop on a [`ManualClock`] advances the tanks
//! exactly one interval per iteration.
//!
//! [`ManualClock`]: tanklab_traits::clock::ManualClock

use std::time::Instant;

use tanklab_traits::{Clock, DeviceError, LevelSensor, Pump};

use crate::error::TankError;
use crate::plant::{Levels, PlantParams};
use crate::predictor::LocalPredictor;

pub struct SimulatedRig<C: Clock> {
    plant: LocalPredictor,
    levels: Levels,
    duty: f64,
    clock: C,
    last: Instant,
    unplug_after: Option<usize>,
    reads: usize,
}

impl<C: Clock> SimulatedRig<C> {
    pub fn new(plant: PlantParams, initial: Levels, clock: C) -> Self {
        let last = clock.now();
        Self {
            plant: LocalPredictor::new(plant),
            levels: initial.clamped(),
            duty: 0.0,
            clock,
            last,
            unplug_after: None,
            reads: 0,
        }
    }

    /// Fail every read after the first `n` successful ones, as if the cable
    /// were pulled.
    pub fn unplug_after(mut self, n: usize) -> Self {
        self.unplug_after = Some(n);
        self
    }

    fn catch_up(&mut self) -> Result<(), TankError> {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        if dt > 0.0 {
            self.levels = self.plant.step(self.levels, self.duty, dt)?;
        }
        self.last = now;
        Ok(())
    }
}

impl<C: Clock> LevelSensor for SimulatedRig<C> {
    fn read_levels(&mut self) -> Result<(f64, f64), DeviceError> {
        if self.unplug_after.is_some_and(|n| self.reads >= n) {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "simulated link unplugged",
            )));
        }
        self.reads += 1;
        self.catch_up()?;
        Ok((self.levels.h1, self.levels.h2))
    }
}

impl<C: Clock> Pump for SimulatedRig<C> {
    fn set_duty(&mut self, duty: f64) -> Result<(), DeviceError> {
        self.catch_up()?;
        self.duty = if duty.is_finite() {
            duty.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.catch_up()?;
        self.duty = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tanklab_traits::clock::ManualClock;

    #[test]
    fn levels_move_only_with_clock() {
        let clock = ManualClock::new();
        let mut rig = SimulatedRig::new(PlantParams::default(), Levels::EMPTY, clock.clone());
        rig.set_duty(1.0).unwrap();
        assert_eq!(rig.read_levels().unwrap(), (0.0, 0.0));
        clock.advance(Duration::from_secs(5));
        let (h1, _) = rig.read_levels().unwrap();
        assert!(h1 > 0.0);
    }

    #[test]
    fn unplugged_rig_fails_reads() {
        let mut rig =
            SimulatedRig::new(PlantParams::default(), Levels::EMPTY, ManualClock::new()).unplug_after(1);
        assert!(rig.read_levels().is_ok());
        assert!(rig.read_levels().is_err());
    }
}
