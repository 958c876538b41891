//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config file used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG: &str = "etc/tank_config.toml";

#[derive(Parser, Debug)]
#[command(name = "tanklab", version, about = "Two-tank level MPC demonstrator")]
pub struct Cli {
    /// Path to config TOML (typed); defaults to etc/tank_config.toml when present
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Setpoint schedule CSV (strict header `iteration,setpoint`); replaces schedule.steps
    #[arg(long, value_name = "FILE")]
    pub schedule: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides logging.level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the closed-loop experiment and write the trajectory CSV
    Run {
        /// Override run.iterations
        #[arg(long, value_name = "N")]
        iterations: Option<usize>,
        /// Override run.output
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Use the serial board regardless of run.backend
        #[arg(long, action = ArgAction::SetTrue)]
        hardware: bool,
        /// Append the model-predicted levels (h1_model, h2_model) to the CSV
        #[arg(long = "with-model", action = ArgAction::SetTrue)]
        with_model: bool,
        /// Do not print the live table
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
        /// Print total wall-clock runtime on completion
        #[arg(long, action = ArgAction::SetTrue)]
        print_runtime: bool,
    },
    /// Read and print the tank levels a few times (pump stays off)
    Probe {
        /// Number of readings
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Use the serial board regardless of run.backend
        #[arg(long, action = ArgAction::SetTrue)]
        hardware: bool,
    },
    /// Validate the config, build the controller and take one reading
    SelfCheck,
}
