#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and setpoint-schedule parsing for the tank rig.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section has defaults, so an empty file is a valid simulated run.
//! - The setpoint schedule can also come from a CSV with strict headers.
use serde::Deserialize;
use serde::de::Deserializer;

/// Default upper-tank drain coefficient (1/s).
pub const DEFAULT_K1: f64 = 1.5 / 67.8347;
/// Default lower-tank drain coefficient (1/s).
pub const DEFAULT_K2: f64 = 1.5 / 69.6996;

/// Setpoint schedule CSV schema.
///
/// Expected headers:
/// iteration,setpoint
///
/// Example:
/// iteration,setpoint
/// 0,0.5
/// 100,0.4
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ScheduleRow {
    pub iteration: usize,
    pub setpoint: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceCfg {
    /// Serial port of the Firmata board (e.g. "/dev/ttyACM0", "COM7")
    pub port: String,
    pub baud: u32,
    /// Analog channel wired to the upper tank sensor
    pub h1_channel: u8,
    /// Analog channel wired to the lower tank sensor
    pub h2_channel: u8,
    /// PWM-capable digital pin driving the pump
    pub pwm_pin: u8,
    /// Optional H-bridge direction pins as [forward, reverse]
    pub direction_pins: Option<[u8; 2]>,
    /// Physical units per unit of normalized ADC reading
    pub level_scale: f64,
    /// Reads fail when the newest analog report is older than this
    pub read_timeout_ms: u64,
    /// Delay after opening the port before talking to the firmware
    pub boot_ms: u64,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 57_600,
            h1_channel: 1,
            h2_channel: 0,
            pwm_pin: 6,
            direction_pins: None,
            level_scale: 1.0,
            read_timeout_ms: 500,
            boot_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlantModelKind {
    /// Linear drains: dh1 = kp*u - k1*h1, dh2 = k1*kc*h1 - k2*h2
    #[default]
    Linear,
    /// Gravity drains with a valve split between the two tanks
    Gravity,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlantCfg {
    pub model: PlantModelKind,
    pub k1: f64,
    pub k2: f64,
    pub kc: f64,
    pub kp: f64,
    /// Tank height at which inflow saturates
    pub capacity: f64,
    /// Gravity model: inlet valve coefficient
    pub c1: f64,
    /// Gravity model: outlet coefficient
    pub c2: f64,
    /// Gravity model: fraction of pump flow routed straight to tank 2
    pub valve: f64,
    pub initial_h1: f64,
    pub initial_h2: f64,
}

impl Default for PlantCfg {
    fn default() -> Self {
        Self {
            model: PlantModelKind::Linear,
            k1: DEFAULT_K1,
            k2: DEFAULT_K2,
            kc: 0.87,
            kp: 0.004,
            capacity: 0.6,
            c1: 0.08,
            c2: 0.04,
            valve: 0.0,
            initial_h1: 0.0,
            initial_h2: 0.0,
        }
    }
}

/// Gains and time constants of the controller's internal lag model.
/// When absent, they are derived from the linear plant parameters.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LagModelCfg {
    pub gain_h1: f64,
    pub tau_h1: f64,
    pub gain_h2: f64,
    pub tau_h2: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SolverCfg {
    /// Initial OSQP step size; adapted during the solve
    pub rho: f64,
    /// OSQP regularization of the linear system
    pub sigma: f64,
    /// Absolute and relative convergence tolerance
    pub eps: f64,
    pub max_iter: usize,
}

impl Default for SolverCfg {
    fn default() -> Self {
        Self {
            rho: 0.03,
            sigma: 1e-6,
            eps: 1e-6,
            max_iter: 4_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerCfg {
    /// Prediction time points in seconds; must start at 0 and increase
    pub horizon: Vec<f64>,
    /// Max change of the pump command between consecutive moves
    pub max_rate: f64,
    /// Weight on squared command moves
    pub move_cost: f64,
    /// Reference trajectory time constant in seconds (0 = flat setpoint)
    pub tau_ref: f64,
    /// Fraction of the measured/model mismatch applied as output bias (0..=1)
    pub feedback: f64,
    pub model: Option<LagModelCfg>,
    pub solver: SolverCfg,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            horizon: vec![0.0, 1.0, 2.0, 4.0, 8.0, 12.0, 16.0, 20.0],
            max_rate: 0.1,
            move_cost: 0.01,
            tau_ref: 20.0,
            feedback: 1.0,
            model: None,
            solver: SolverCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleCfg {
    /// Setpoint in force from iteration 0
    pub initial: f64,
    /// Scheduled changes. Accepts either:
    /// - array of tables: [{ at = 100, setpoint = 0.8 }, ...]
    /// - array of tuples: [[100, 0.8], ...]
    #[serde(deserialize_with = "de_steps")]
    pub steps: Vec<(usize, f64)>,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            initial: 0.5,
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Plant model stands in for the device; runs on a virtual clock
    #[default]
    Sim,
    /// Firmata board on the configured serial port
    Hardware,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunCfg {
    pub iterations: usize,
    /// Control interval in milliseconds
    pub interval_ms: u64,
    /// CSV trajectory output
    pub output: String,
    pub backend: Backend,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            iterations: 500,
            interval_ms: 1_000,
            output: "data.txt".to_string(),
            backend: Backend::Sim,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceCfg,
    pub plant: PlantCfg,
    pub controller: ControllerCfg,
    pub schedule: ScheduleCfg,
    pub run: RunCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepToml {
    Tuple((usize, f64)),
    Table { at: usize, setpoint: f64 },
}

fn de_steps<'de, D>(deserializer: D) -> Result<Vec<(usize, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<StepToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for s in items {
            match s {
                StepToml::Tuple((at, sp)) => out.push((at, sp)),
                StepToml::Table { at, setpoint } => out.push((at, setpoint)),
            }
        }
    }
    Ok(out)
}

/// Check a list of `(iteration, setpoint)` changes: strictly increasing
/// iterations, finite non-negative setpoints.
pub fn validate_steps(steps: &[(usize, f64)]) -> eyre::Result<()> {
    for (i, (at, sp)) in steps.iter().enumerate() {
        if !sp.is_finite() || *sp < 0.0 {
            eyre::bail!("schedule setpoint at iteration {at} must be finite and >= 0");
        }
        if i > 0 && *at <= steps[i - 1].0 {
            eyre::bail!(
                "schedule iterations must be strictly increasing ({} then {})",
                steps[i - 1].0,
                at
            );
        }
    }
    Ok(())
}

pub fn load_schedule_csv(path: &std::path::Path) -> eyre::Result<Vec<(usize, f64)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["iteration", "setpoint"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "schedule CSV must have headers 'iteration,setpoint', got: {}",
            actual.join(",")
        );
    }

    let mut steps = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScheduleRow>().enumerate() {
        match rec {
            Ok(row) => steps.push((row.iteration, row.setpoint)),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if steps.is_empty() {
        eyre::bail!("schedule CSV {:?} has no rows", path);
    }
    validate_steps(&steps)?;
    Ok(steps)
}

#[inline]
fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        let d = &self.device;
        if d.port.trim().is_empty() {
            eyre::bail!("device.port must not be empty");
        }
        if d.baud == 0 {
            eyre::bail!("device.baud must be > 0");
        }
        if d.h1_channel > 15 || d.h2_channel > 15 {
            eyre::bail!("device.h1_channel and device.h2_channel must be in 0..=15");
        }
        if d.h1_channel == d.h2_channel {
            eyre::bail!("device.h1_channel and device.h2_channel must differ");
        }
        if d.pwm_pin > 15 {
            eyre::bail!("device.pwm_pin must be in 0..=15");
        }
        if let Some([fwd, rev]) = d.direction_pins {
            if fwd == rev || fwd > 127 || rev > 127 {
                eyre::bail!("device.direction_pins must be two distinct pins in 0..=127");
            }
            if fwd == d.pwm_pin || rev == d.pwm_pin {
                eyre::bail!("device.direction_pins must not include device.pwm_pin");
            }
        }
        if !positive(d.level_scale) {
            eyre::bail!("device.level_scale must be > 0");
        }
        if d.read_timeout_ms == 0 {
            eyre::bail!("device.read_timeout_ms must be >= 1");
        }

        // Plant
        let p = &self.plant;
        match p.model {
            PlantModelKind::Linear => {
                if !positive(p.k1) || !positive(p.k2) {
                    eyre::bail!("plant.k1 and plant.k2 must be > 0");
                }
                if !positive(p.kc) {
                    eyre::bail!("plant.kc must be > 0");
                }
                if !p.kp.is_finite() || p.kp < 0.0 {
                    eyre::bail!("plant.kp must be >= 0");
                }
            }
            PlantModelKind::Gravity => {
                if !positive(p.c1) || !positive(p.c2) {
                    eyre::bail!("plant.c1 and plant.c2 must be > 0");
                }
                if !(0.0..=1.0).contains(&p.valve) {
                    eyre::bail!("plant.valve must be in [0.0, 1.0]");
                }
            }
        }
        if !positive(p.capacity) {
            eyre::bail!("plant.capacity must be > 0");
        }
        if !(p.initial_h1.is_finite() && p.initial_h1 >= 0.0)
            || !(p.initial_h2.is_finite() && p.initial_h2 >= 0.0)
        {
            eyre::bail!("plant.initial_h1 and plant.initial_h2 must be >= 0");
        }

        // Controller
        let c = &self.controller;
        if c.horizon.len() < 2 {
            eyre::bail!("controller.horizon needs at least two time points");
        }
        if c.horizon[0] != 0.0 {
            eyre::bail!("controller.horizon must start at 0");
        }
        if c.horizon.windows(2).any(|w| !(w[1].is_finite() && w[1] > w[0])) {
            eyre::bail!("controller.horizon must be strictly increasing");
        }
        if !(c.max_rate > 0.0 && c.max_rate <= 1.0) {
            eyre::bail!("controller.max_rate must be in (0.0, 1.0]");
        }
        if !c.move_cost.is_finite() || c.move_cost < 0.0 {
            eyre::bail!("controller.move_cost must be >= 0");
        }
        if !c.tau_ref.is_finite() || c.tau_ref < 0.0 {
            eyre::bail!("controller.tau_ref must be >= 0");
        }
        if !(0.0..=1.0).contains(&c.feedback) {
            eyre::bail!("controller.feedback must be in [0.0, 1.0]");
        }
        if let Some(m) = c.model
            && !(positive(m.gain_h1)
                && positive(m.tau_h1)
                && positive(m.gain_h2)
                && positive(m.tau_h2))
        {
            eyre::bail!("controller.model gains and time constants must be > 0");
        }
        if c.model.is_none() && p.model == PlantModelKind::Gravity {
            eyre::bail!("controller.model is required when plant.model = \"gravity\"");
        }
        if !positive(c.solver.rho) || !positive(c.solver.sigma) || !positive(c.solver.eps) {
            eyre::bail!("controller.solver.rho, sigma and eps must be > 0");
        }
        if c.solver.max_iter == 0 {
            eyre::bail!("controller.solver.max_iter must be >= 1");
        }

        // Schedule
        if !self.schedule.initial.is_finite() || self.schedule.initial < 0.0 {
            eyre::bail!("schedule.initial must be >= 0");
        }
        validate_steps(&self.schedule.steps)?;

        // Run
        if self.run.iterations == 0 {
            eyre::bail!("run.iterations must be >= 1");
        }
        if self.run.interval_ms == 0 {
            eyre::bail!("run.interval_ms must be >= 1");
        }
        if self.run.output.trim().is_empty() {
            eyre::bail!("run.output must not be empty");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
