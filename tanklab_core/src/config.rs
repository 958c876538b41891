//! Runtime configuration structs used by the core.
//!
//! These mirror the TOML sections in `tanklab_config` but carry only what the
//! loop needs, in the units the math uses (seconds as `f64`).

use std::time::Duration;

/// Gains and time constants of the two cascaded first-order lags the
/// controller uses internally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagModel {
    pub gain_h1: f64,
    pub tau_h1: f64,
    pub gain_h2: f64,
    pub tau_h2: f64,
}

impl LagModel {
    /// Lag form of the linear tank `dh1 = Kp*u - K1*h1`, `dh2 = K1*Kc*h1 - K2*h2`.
    pub fn from_linear(kp: f64, k1: f64, k2: f64, kc: f64) -> Self {
        Self {
            gain_h1: kp / k1,
            tau_h1: 1.0 / k1,
            gain_h2: k1 * kc / k2,
            tau_h2: 1.0 / k2,
        }
    }

    /// Steady-state h2 per unit of pump duty.
    pub fn dc_gain(&self) -> f64 {
        self.gain_h1 * self.gain_h2
    }
}

/// OSQP settings used for every solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverCfg {
    pub rho: f64,
    pub sigma: f64,
    pub eps: f64,
    pub max_iter: usize,
}

impl Default for SolverCfg {
    fn default() -> Self {
        Self {
            rho: 0.03,
            sigma: 1e-6,
            eps: 1e-6,
            max_iter: 4000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MpcCfg {
    /// Prediction time points in seconds, starting at 0 and strictly increasing.
    pub horizon: Vec<f64>,
    /// Largest allowed change of the command between two moves.
    pub max_rate: f64,
    /// Weight on squared command moves.
    pub move_cost: f64,
    /// Reference trajectory time constant (s); 0 gives a flat setpoint.
    pub tau_ref: f64,
    /// Fraction of the measurement mismatch folded into the bias each cycle.
    pub feedback: f64,
    pub model: LagModel,
    pub solver: SolverCfg,
}

impl Default for MpcCfg {
    fn default() -> Self {
        Self {
            horizon: vec![0.0, 1.0, 2.0, 4.0, 8.0, 12.0, 16.0, 20.0],
            max_rate: 0.1,
            move_cost: 0.01,
            tau_ref: 20.0,
            feedback: 1.0,
            model: LagModel::from_linear(
                0.004,
                tanklab_config::DEFAULT_K1,
                tanklab_config::DEFAULT_K2,
                0.87,
            ),
            solver: SolverCfg::default(),
        }
    }
}

/// Iteration count and pacing of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCfg {
    pub iterations: usize,
    pub interval: Duration,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            iterations: 500,
            interval: Duration::from_secs(1),
        }
    }
}
