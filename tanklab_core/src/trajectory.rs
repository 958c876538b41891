//! Trajectory log: one record per loop iteration, persisted once at run end.

use std::io::Write;
use std::path::Path;

use crate::error::TankError;
use crate::plant::Levels;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryRecord {
    /// Seconds since the run started.
    pub time: f64,
    /// Duty written to the pump this iteration.
    pub command: f64,
    /// Measured levels.
    pub measured: Levels,
    pub setpoint: f64,
    /// Model-predicted levels at the same instant.
    pub predicted: Levels,
}

/// Column header of the persisted file.
pub const CSV_HEADER: [&str; 4] = ["time", "command", "h1", "h2"];
/// Extra columns written when model predictions are kept.
pub const CSV_MODEL_COLUMNS: [&str; 2] = ["h1_model", "h2_model"];

#[derive(Debug, Clone, Default)]
pub struct TrajectoryLog {
    records: Vec<TrajectoryRecord>,
}

impl TrajectoryLog {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            records: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, record: TrajectoryRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TrajectoryRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[TrajectoryRecord] {
        &self.records
    }

    /// Write header plus one `time,command,h1,h2` row per record, followed
    /// by `h1_model,h2_model` when `with_model` is set.
    pub fn write_csv<W: Write>(&self, out: W, with_model: bool) -> Result<(), TankError> {
        let io = |e: csv::Error| TankError::Io(e.to_string());
        let mut w = csv::Writer::from_writer(out);
        let mut header = CSV_HEADER.to_vec();
        if with_model {
            header.extend(CSV_MODEL_COLUMNS);
        }
        w.write_record(&header).map_err(io)?;
        for r in &self.records {
            let mut row = vec![
                r.time.to_string(),
                r.command.to_string(),
                r.measured.h1.to_string(),
                r.measured.h2.to_string(),
            ];
            if with_model {
                row.push(r.predicted.h1.to_string());
                row.push(r.predicted.h2.to_string());
            }
            w.write_record(&row).map_err(io)?;
        }
        w.flush().map_err(|e| TankError::Io(e.to_string()))
    }

    pub fn save(&self, path: &Path, with_model: bool) -> Result<(), TankError> {
        let file = std::fs::File::create(path)
            .map_err(|e| TankError::Io(format!("create {}: {e}", path.display())))?;
        self.write_csv(std::io::BufWriter::new(file), with_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let mut log = TrajectoryLog::default();
        for i in 0..3 {
            log.push(TrajectoryRecord {
                time: f64::from(i),
                command: 0.25,
                measured: Levels::new(0.1, 0.05),
                setpoint: 0.5,
                predicted: Levels::EMPTY,
            });
        }
        let mut buf = Vec::new();
        log.write_csv(&mut buf, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "time,command,h1,h2");
        assert_eq!(lines[3], "2,0.25,0.1,0.05");
    }

    #[test]
    fn model_columns_follow_measured_ones() {
        let mut log = TrajectoryLog::default();
        log.push(TrajectoryRecord {
            time: 1.0,
            command: 0.5,
            measured: Levels::new(0.2, 0.1),
            setpoint: 0.5,
            predicted: Levels::new(0.25, 0.125),
        });
        let mut buf = Vec::new();
        log.write_csv(&mut buf, true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "time,command,h1,h2,h1_model,h2_model");
        assert_eq!(lines[1], "1,0.5,0.2,0.1,0.25,0.125");
    }
}
