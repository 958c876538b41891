//! Experiment wiring: config mapping, device assembly and the three commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tanklab_config::{Backend, Config};
use tanklab_core::conversions::initial_levels;
use tanklab_core::sensor::read_levels;
use tanklab_core::{
    ConsoleRenderer, ControlLoop, Levels, LocalPredictor, MpcCfg, MpcController, NoopRenderer,
    PlantParams, RunCfg, RunSummary, SetpointSchedule, SimulatedRig,
};
use tanklab_traits::clock::ManualClock;
use tanklab_traits::{Clock, MonotonicClock, TankDevice};

/// Test hook: fail simulated reads after this many successful ones.
const SIM_UNPLUG_ENV: &str = "TANKLAB_TEST_SIM_UNPLUG";

#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub iterations: Option<usize>,
    pub output: Option<PathBuf>,
    pub hardware: bool,
    pub quiet: bool,
    /// Add the predicted levels to the trajectory CSV.
    pub model_columns: bool,
}

/// Device plus the clock it should be paced with.
struct Rig {
    device: Box<dyn TankDevice>,
    clock: Box<dyn Clock + Send + Sync>,
}

fn backend(cfg: &Config, force_hardware: bool) -> Backend {
    if force_hardware {
        Backend::Hardware
    } else {
        cfg.run.backend
    }
}

fn open_rig(cfg: &Config, backend: Backend) -> eyre::Result<Rig> {
    match backend {
        Backend::Sim => {
            let clock = ManualClock::new();
            let mut rig = SimulatedRig::new(
                PlantParams::from(&cfg.plant),
                initial_levels(&cfg.plant),
                clock.clone(),
            );
            if let Some(n) = std::env::var(SIM_UNPLUG_ENV)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
            {
                rig = rig.unplug_after(n);
            }
            tracing::info!(backend = "sim", "rig ready");
            Ok(Rig {
                device: Box::new(rig),
                clock: Box::new(clock),
            })
        }
        Backend::Hardware => {
            let board = open_board(&cfg.device)?;
            Ok(Rig {
                device: board,
                clock: Box::new(MonotonicClock::new()),
            })
        }
    }
}

#[cfg(feature = "hardware")]
fn open_board(d: &tanklab_config::DeviceCfg) -> eyre::Result<Box<dyn TankDevice>> {
    use tanklab_hardware::{BoardConfig, FirmataBoard};

    let board = FirmataBoard::open(BoardConfig {
        port: d.port.clone(),
        baud: d.baud,
        h1_channel: d.h1_channel,
        h2_channel: d.h2_channel,
        pwm_pin: d.pwm_pin,
        direction_pins: d.direction_pins.map(|[fwd, rev]| (fwd, rev)),
        level_scale: d.level_scale,
        read_timeout: Duration::from_millis(d.read_timeout_ms),
        boot_delay: Duration::from_millis(d.boot_ms),
    })
    .map_err(|e| eyre::Report::new(tanklab_core::hw_error::map_hw_error(&e)))?;
    Ok(Box::new(board))
}

#[cfg(not(feature = "hardware"))]
fn open_board(d: &tanklab_config::DeviceCfg) -> eyre::Result<Box<dyn TankDevice>> {
    Err(eyre::Report::new(tanklab_core::TankError::Config(format!(
        "hardware backend requested for {} but this build has no serial support; rebuild with --features hardware",
        d.port
    ))))
}

/// Run the closed-loop experiment end to end.
pub fn run_experiment(
    cfg: &Config,
    opts: &RunOpts,
    render: bool,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<(RunSummary, PathBuf)> {
    let plant = PlantParams::from(&cfg.plant);
    let mut run = RunCfg::from(&cfg.run);
    if let Some(n) = opts.iterations {
        run.iterations = n;
    }
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.run.output));
    let schedule = SetpointSchedule::try_from(&cfg.schedule)?;
    let controller = MpcController::new(MpcCfg::from(cfg), run.interval.as_secs_f64())?;

    let Rig { device, clock } = open_rig(cfg, backend(cfg, opts.hardware))?;
    let builder = ControlLoop::builder()
        .with_controller(controller)
        .with_predictor(LocalPredictor::new(plant))
        .with_schedule(schedule)
        .with_run(run)
        .with_output(&output)
        .with_model_columns(opts.model_columns)
        .with_shutdown(shutdown)
        .with_clock(clock);
    let builder = if render && !opts.quiet {
        builder.with_renderer(ConsoleRenderer::stdout())
    } else {
        builder.with_renderer(NoopRenderer)
    };
    let mut ctl = builder.with_device(device).build()?;
    let summary = ctl.run()?;
    Ok((summary, output))
}

/// Read the levels `count` times, one control interval apart. The pump is
/// left off.
pub fn probe(cfg: &Config, count: usize, hardware: bool) -> eyre::Result<Vec<Levels>> {
    let Rig { mut device, clock } = open_rig(cfg, backend(cfg, hardware))?;
    let interval = Duration::from_millis(cfg.run.interval_ms);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 {
            clock.sleep(interval);
        }
        let levels = read_levels(&mut *device)?;
        tracing::debug!(reading = i, h1 = levels.h1, h2 = levels.h2, "probe");
        out.push(levels);
    }
    Ok(out)
}

/// Build everything a run needs and take one reading.
pub fn self_check(cfg: &Config) -> eyre::Result<Levels> {
    let run = RunCfg::from(&cfg.run);
    SetpointSchedule::try_from(&cfg.schedule)?;
    MpcController::new(MpcCfg::from(cfg), run.interval.as_secs_f64())?;
    let Rig { mut device, .. } = open_rig(cfg, cfg.run.backend)?;
    let levels = read_levels(&mut *device)?;
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_rig_reports_initial_levels() {
        let mut cfg = Config::default();
        cfg.plant.initial_h1 = 0.2;
        cfg.plant.initial_h2 = 0.1;
        let levels = probe(&cfg, 3, false).unwrap();
        assert_eq!(levels.len(), 3);
        // pump off: the upper tank drains
        assert!(levels[2].h1 < 0.2);
        assert!(levels.iter().all(|l| l.h1 >= 0.0 && l.h2 >= 0.0));
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn hardware_without_feature_is_a_config_error() {
        use tanklab_core::TankError;

        let err = probe(&Config::default(), 1, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TankError>(),
            Some(TankError::Config(_))
        ));
    }
}
