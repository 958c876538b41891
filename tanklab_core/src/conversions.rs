//! Conversions from `tanklab_config` file types into core runtime types.

use std::time::Duration;

use crate::config::{LagModel, MpcCfg, RunCfg, SolverCfg};
use crate::error::TankError;
use crate::plant::{GravityTank, Levels, LinearTank, PlantModel, PlantParams};
use crate::schedule::SetpointSchedule;

impl From<&tanklab_config::PlantCfg> for PlantParams {
    fn from(p: &tanklab_config::PlantCfg) -> Self {
        let model = match p.model {
            tanklab_config::PlantModelKind::Linear => PlantModel::Linear(LinearTank {
                k1: p.k1,
                k2: p.k2,
                kc: p.kc,
                kp: p.kp,
            }),
            tanklab_config::PlantModelKind::Gravity => PlantModel::Gravity(GravityTank {
                c1: p.c1,
                c2: p.c2,
                valve: p.valve,
            }),
        };
        PlantParams {
            model,
            capacity: p.capacity,
        }
    }
}

impl From<&tanklab_config::LagModelCfg> for LagModel {
    fn from(m: &tanklab_config::LagModelCfg) -> Self {
        Self {
            gain_h1: m.gain_h1,
            tau_h1: m.tau_h1,
            gain_h2: m.gain_h2,
            tau_h2: m.tau_h2,
        }
    }
}

impl From<&tanklab_config::SolverCfg> for SolverCfg {
    fn from(s: &tanklab_config::SolverCfg) -> Self {
        Self {
            rho: s.rho,
            sigma: s.sigma,
            eps: s.eps,
            max_iter: s.max_iter,
        }
    }
}

/// Controller settings; without an explicit `[controller.model]` the lag
/// model is derived from the linear plant gains.
impl From<&tanklab_config::Config> for MpcCfg {
    fn from(cfg: &tanklab_config::Config) -> Self {
        let c = &cfg.controller;
        let p = &cfg.plant;
        let model = c
            .model
            .as_ref()
            .map(LagModel::from)
            .unwrap_or_else(|| LagModel::from_linear(p.kp, p.k1, p.k2, p.kc));
        Self {
            horizon: c.horizon.clone(),
            max_rate: c.max_rate,
            move_cost: c.move_cost,
            tau_ref: c.tau_ref,
            feedback: c.feedback,
            model,
            solver: SolverCfg::from(&c.solver),
        }
    }
}

impl From<&tanklab_config::RunCfg> for RunCfg {
    fn from(r: &tanklab_config::RunCfg) -> Self {
        Self {
            iterations: r.iterations,
            interval: Duration::from_millis(r.interval_ms),
        }
    }
}

impl TryFrom<&tanklab_config::ScheduleCfg> for SetpointSchedule {
    type Error = TankError;

    fn try_from(s: &tanklab_config::ScheduleCfg) -> Result<Self, Self::Error> {
        SetpointSchedule::new(s.initial, s.steps.clone())
    }
}

/// Starting levels for the simulated rig.
pub fn initial_levels(p: &tanklab_config::PlantCfg) -> Levels {
    Levels::new(p.initial_h1, p.initial_h2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_model_matches_plant_gains() {
        let cfg = tanklab_config::Config::default();
        let mpc = MpcCfg::from(&cfg);
        let k1 = tanklab_config::DEFAULT_K1;
        assert!((mpc.model.tau_h1 - 1.0 / k1).abs() < 1e-12);
        assert!((mpc.model.gain_h1 - 0.004 / k1).abs() < 1e-12);
        assert_eq!(mpc.horizon.len(), 8);
    }

    #[test]
    fn explicit_model_wins() {
        let mut cfg = tanklab_config::Config::default();
        cfg.controller.model = Some(tanklab_config::LagModelCfg {
            gain_h1: 1.3,
            tau_h1: 10.4,
            gain_h2: 1.0,
            tau_h2: 14.4,
        });
        let mpc = MpcCfg::from(&cfg);
        assert_eq!(mpc.model.tau_h2, 14.4);
    }
}
