//! Fixed-iteration control loop and its type-state builder.
//!
//! Per iteration: read levels, look up the setpoint, solve, write the pump,
//! advance the predicted state, append a record, render, then sleep one
//! interval on the injected clock. Measured levels feed the controller;
//! predicted levels come only from the predictor's own previous output.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tanklab_traits::{Clock, MonotonicClock, TankDevice};

use crate::actuator;
use crate::config::RunCfg;
use crate::error::{BuildError, Result, TankError};
use crate::mpc::Controller;
use crate::plant::Levels;
use crate::predictor::{LocalPredictor, Predictor};
use crate::render::{NoopRenderer, Renderer};
use crate::schedule::SetpointSchedule;
use crate::sensor;
use crate::status::LoopState;
use crate::trajectory::{TrajectoryLog, TrajectoryRecord};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Data rows recorded (row 0 included).
    pub rows: usize,
    /// Iterations whose solve failed and fell back to command 0.
    pub solver_failures: usize,
    pub final_levels: Levels,
    /// Model-predicted levels at the last record.
    pub final_predicted: Levels,
    pub final_command: f64,
    pub final_setpoint: f64,
    /// Clock time from the first sample to the last.
    pub elapsed_s: f64,
}

/// Context attached to every error that ends a started run: how many rows
/// were recorded and where they were persisted, if anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRun {
    pub rows: usize,
    pub saved_to: Option<PathBuf>,
}

impl core::fmt::Display for PartialRun {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "run stopped after {} rows", self.rows)
    }
}

pub struct ControlLoop {
    device: Box<dyn TankDevice>,
    controller: Box<dyn Controller>,
    predictor: Box<dyn Predictor>,
    renderer: Box<dyn Renderer>,
    clock: Arc<dyn Clock + Send + Sync>,
    schedule: SetpointSchedule,
    run: RunCfg,
    output: Option<PathBuf>,
    model_columns: bool,
    shutdown: Option<Arc<AtomicBool>>,
    state: LoopState,
    log: TrajectoryLog,
    solver_failures: usize,
}

impl core::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("state", &self.state)
            .field("run", &self.run)
            .field("rows", &self.log.len())
            .field("solver_failures", &self.solver_failures)
            .finish()
    }
}

impl ControlLoop {
    pub fn builder() -> ControlLoopBuilder<Missing, Missing> {
        ControlLoopBuilder::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Records gathered so far; complete after `run` returns either way.
    pub fn log(&self) -> &TrajectoryLog {
        &self.log
    }

    pub fn solver_failures(&self) -> usize {
        self.solver_failures
    }

    /// Drive the loop to completion.
    ///
    /// On a fatal device error or a shutdown request the pump is stopped,
    /// the records gathered so far are persisted and the error is returned.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state != LoopState::Idle {
            return Err(eyre::Report::new(TankError::State(format!(
                "loop already {:?}",
                self.state
            ))));
        }
        self.state = LoopState::Initializing;
        let n = self.run.iterations;
        let dt = self.run.interval.as_secs_f64();
        tracing::info!(
            iterations = n,
            interval_ms = self.run.interval.as_millis() as u64,
            setpoint = self.schedule.setpoint_at(0),
            "run start"
        );

        let epoch = self.clock.now();
        let first = match sensor::read_levels(&mut *self.device) {
            Ok(l) => l,
            Err(e) => return Err(self.abort(e)),
        };
        self.controller.prime(first);
        let mut predicted = first;
        let next = self.predict(predicted, 0.0, dt);
        self.append(TrajectoryRecord {
            time: 0.0,
            command: 0.0,
            measured: first,
            setpoint: self.schedule.setpoint_at(0),
            predicted,
        });
        predicted = next;
        self.state = LoopState::Running;

        let mut previous = 0.0;
        for i in 1..n {
            self.clock.sleep(self.run.interval);
            if self.shutdown_requested() {
                return Err(self.abort(TankError::Aborted(format!(
                    "shutdown requested at iteration {i}"
                ))));
            }

            let measured = match sensor::read_levels(&mut *self.device) {
                Ok(l) => l,
                Err(e) => return Err(self.abort(e)),
            };
            let setpoint = self.schedule.setpoint_at(i);
            if setpoint != self.schedule.setpoint_at(i - 1) {
                tracing::info!(iteration = i, setpoint, "setpoint change");
            }

            let command = match self.controller.solve(setpoint, measured.h2, previous) {
                Ok(u) => u,
                Err(e) if e.is_recoverable() => {
                    self.solver_failures += 1;
                    tracing::warn!(iteration = i, error = %e, "solver failed; commanding 0");
                    0.0
                }
                Err(e) => return Err(self.abort(e)),
            };
            let applied = match actuator::write_command(&mut *self.device, command) {
                Ok(d) => d,
                Err(e) => return Err(self.abort(e)),
            };

            let next = self.predict(predicted, applied, dt);
            self.append(TrajectoryRecord {
                time: self.clock.secs_since(epoch),
                command: applied,
                measured,
                setpoint,
                predicted,
            });
            tracing::debug!(
                iteration = i,
                h1 = measured.h1,
                h2 = measured.h2,
                setpoint,
                command = applied,
                "cycle"
            );
            predicted = next;
            previous = applied;
        }

        self.finish(epoch)
    }

    fn append(&mut self, record: TrajectoryRecord) {
        self.log.push(record);
        self.renderer.render(&self.log);
    }

    /// Predicted levels one interval ahead; holds the current prediction if
    /// the backend fails.
    fn predict(&mut self, levels: Levels, command: f64, dt: f64) -> Levels {
        match self.predictor.advance(levels, command, dt) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "predictor failed; holding last prediction");
                levels
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn flush(&self) -> std::result::Result<(), TankError> {
        match &self.output {
            Some(path) => self.log.save(path, self.model_columns),
            None => Ok(()),
        }
    }

    fn stop_pump(&mut self) {
        if let Err(e) = self.device.stop() {
            tracing::warn!(error = %e, "pump stop failed");
        }
    }

    fn abort(&mut self, err: TankError) -> eyre::Report {
        self.state = LoopState::Aborted;
        tracing::error!(error = %err, rows = self.log.len(), "run aborted");
        self.stop_pump();
        let saved_to = match self.flush() {
            Ok(()) => self.output.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist trajectory after abort");
                None
            }
        };
        eyre::Report::new(err).wrap_err(PartialRun {
            rows: self.log.len(),
            saved_to,
        })
    }

    fn finish(&mut self, epoch: Instant) -> Result<RunSummary> {
        self.stop_pump();
        self.state = LoopState::Completed;
        self.flush().map_err(eyre::Report::new)?;
        let last = self.log.last().copied().ok_or_else(|| {
            eyre::Report::new(TankError::State("no records after completed run".into()))
        })?;
        let summary = RunSummary {
            rows: self.log.len(),
            solver_failures: self.solver_failures,
            final_levels: last.measured,
            final_predicted: last.predicted,
            final_command: last.command,
            final_setpoint: last.setpoint,
            elapsed_s: self.clock.secs_since(epoch),
        };
        tracing::info!(
            rows = summary.rows,
            solver_failures = summary.solver_failures,
            final_h2 = summary.final_levels.h2,
            model_h2 = summary.final_predicted.h2,
            "run complete"
        );
        Ok(summary)
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `ControlLoop`. Device and controller are required; the rest
/// has defaults (local predictor on the default plant, no rendering,
/// monotonic clock, constant 0.5 setpoint, 500 iterations at 1 s, no file).
pub struct ControlLoopBuilder<D, C> {
    device: Option<Box<dyn TankDevice>>,
    controller: Option<Box<dyn Controller>>,
    predictor: Option<Box<dyn Predictor>>,
    renderer: Option<Box<dyn Renderer>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    schedule: Option<SetpointSchedule>,
    run: Option<RunCfg>,
    output: Option<PathBuf>,
    model_columns: bool,
    shutdown: Option<Arc<AtomicBool>>,
    _d: PhantomData<D>,
    _c: PhantomData<C>,
}

impl Default for ControlLoopBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            device: None,
            controller: None,
            predictor: None,
            renderer: None,
            clock: None,
            schedule: None,
            run: None,
            output: None,
            model_columns: false,
            shutdown: None,
            _d: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<D, C> ControlLoopBuilder<D, C> {
    fn retype<D2, C2>(self) -> ControlLoopBuilder<D2, C2> {
        ControlLoopBuilder {
            device: self.device,
            controller: self.controller,
            predictor: self.predictor,
            renderer: self.renderer,
            clock: self.clock,
            schedule: self.schedule,
            run: self.run,
            output: self.output,
            model_columns: self.model_columns,
            shutdown: self.shutdown,
            _d: PhantomData,
            _c: PhantomData,
        }
    }

    pub fn with_device(mut self, device: impl TankDevice + 'static) -> ControlLoopBuilder<Set, C> {
        self.device = Some(Box::new(device));
        self.retype()
    }

    pub fn with_controller(
        mut self,
        controller: impl Controller + 'static,
    ) -> ControlLoopBuilder<D, Set> {
        self.controller = Some(Box::new(controller));
        self.retype()
    }

    pub fn with_predictor(mut self, predictor: impl Predictor + 'static) -> Self {
        self.predictor = Some(Box::new(predictor));
        self
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_schedule(mut self, schedule: SetpointSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_run(mut self, run: RunCfg) -> Self {
        self.run = Some(run);
        self
    }

    /// Persist the trajectory CSV here when the run ends.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Also persist the predicted levels as `h1_model,h2_model` columns.
    pub fn with_model_columns(mut self, enabled: bool) -> Self {
        self.model_columns = enabled;
        self
    }

    /// Flag polled once per iteration; when set the run aborts.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Build with runtime checks; available in every type state.
    pub fn try_build(self) -> Result<ControlLoop> {
        let device = self
            .device
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDevice))?;
        let controller = self
            .controller
            .ok_or_else(|| eyre::Report::new(BuildError::MissingController))?;
        let run = self.run.unwrap_or_default();
        if run.iterations == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "iterations must be >= 1",
            )));
        }
        Ok(ControlLoop {
            device,
            controller,
            predictor: self
                .predictor
                .unwrap_or_else(|| Box::new(LocalPredictor::default())),
            renderer: self.renderer.unwrap_or_else(|| Box::new(NoopRenderer)),
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            schedule: self.schedule.unwrap_or_default(),
            log: TrajectoryLog::with_capacity(run.iterations),
            run,
            output: self.output,
            model_columns: self.model_columns,
            shutdown: self.shutdown,
            state: LoopState::Idle,
            solver_failures: 0,
        })
    }
}

impl ControlLoopBuilder<Set, Set> {
    pub fn build(self) -> Result<ControlLoop> {
        self.try_build()
    }
}
