#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Two-tank level control (hardware-agnostic).
//!
//! All device access goes through `tanklab_traits::LevelSensor` and
//! `tanklab_traits::Pump`.
//!
//! ## Architecture
//!
//! - **Plant**: linear and gravity-drained tank dynamics (`plant`), integrated
//!   with adaptive Dormand-Prince (`integrator`) behind the `Predictor` trait
//! - **Control**: MPC over a lag model (`mpc`) with the QP handed to OSQP
//! - **I/O**: sensor reads (`sensor`) and quantized pump writes (`actuator`)
//! - **Loop**: `ControlLoop` state machine (`driver`, `status`), setpoint
//!   schedule, trajectory log and renderers
//! - **Simulation**: `SimulatedRig` stands in for the device

pub mod actuator;
pub mod config;
pub mod conversions;
pub mod driver;
pub mod error;
pub mod hw_error;
pub mod integrator;
pub mod mpc;
pub mod plant;
pub mod predictor;
pub mod render;
pub mod schedule;
pub mod sensor;
pub mod sim;
pub mod status;
pub mod trajectory;

pub use config::{LagModel, MpcCfg, RunCfg, SolverCfg};
pub use driver::{ControlLoop, ControlLoopBuilder, PartialRun, RunSummary};
pub use error::{BuildError, Result, TankError};
pub use mpc::{Controller, MpcController};
pub use plant::{Levels, PlantParams};
pub use predictor::{LocalPredictor, Predictor};
pub use render::{ConsoleRenderer, NoopRenderer, Renderer};
pub use schedule::SetpointSchedule;
pub use sim::SimulatedRig;
pub use status::LoopState;
pub use trajectory::{TrajectoryLog, TrajectoryRecord};
