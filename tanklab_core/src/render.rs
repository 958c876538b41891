//! Live display of the trajectory. Best effort: failures never stop the loop.

use std::io::Write;

use crate::trajectory::TrajectoryLog;

pub trait Renderer {
    /// Called once per appended record.
    fn render(&mut self, log: &TrajectoryLog);
}

/// Renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render(&mut self, _log: &TrajectoryLog) {}
}

/// Fixed-width table of the latest record, header repeated every `header_every` rows.
#[derive(Debug)]
pub struct ConsoleRenderer<W: Write> {
    out: W,
    header_every: usize,
    rows: usize,
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), 20)
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, header_every: usize) -> Self {
        Self {
            out,
            header_every: header_every.max(1),
            rows: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_latest(&mut self, log: &TrajectoryLog) -> std::io::Result<()> {
        let Some(r) = log.last() else {
            return Ok(());
        };
        if self.rows % self.header_every == 0 {
            writeln!(
                self.out,
                "{:>8} {:>8} {:>10} {:>10} {:>10} {:>10}",
                "Time", "Pump", "Height 1", "Height 2", "Model h2", "Setpoint"
            )?;
        }
        writeln!(
            self.out,
            "{:>8.1} {:>8.2} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            r.time, r.command, r.measured.h1, r.measured.h2, r.predicted.h2, r.setpoint
        )?;
        self.rows += 1;
        self.out.flush()
    }
}

impl<W: Write> Renderer for ConsoleRenderer<W> {
    fn render(&mut self, log: &TrajectoryLog) {
        if let Err(e) = self.write_latest(log) {
            tracing::debug!(error = %e, "render failed");
        }
    }
}
