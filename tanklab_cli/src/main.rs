#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use eyre::WrapErr;
use tanklab_core::TankError;

use crate::cli::{Cli, Commands, DEFAULT_CONFIG, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn config_error(e: impl std::fmt::Display) -> eyre::Report {
    eyre::Report::new(TankError::Config(format!("{e:#}")))
}

fn load_config(cli: &Cli) -> eyre::Result<tanklab_config::Config> {
    let path = match &cli.config {
        Some(p) => Some(p.clone()),
        None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.exists()),
    };
    let mut cfg = match &path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .map_err(|e| config_error(format!("read {}: {e}", p.display())))?;
            tanklab_config::load_toml(&text)
                .map_err(|e| config_error(format!("parse {}: {e}", p.display())))?
        }
        None => tanklab_config::Config::default(),
    };
    if let Some(csv) = &cli.schedule {
        cfg.schedule.steps = tanklab_config::load_schedule_csv(csv).map_err(config_error)?;
    }
    cfg.validate().map_err(config_error)?;
    Ok(cfg)
}

fn init_tracing(json: bool, level: &str, logging: &tanklab_config::Logging) {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };
    let file = logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path.file_name().unwrap_or(path.as_os_str());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer().json().with_writer(writer).boxed()
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli)?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(cli.json, &level, &cfg.logging);

    match cli.cmd {
        Commands::Run {
            iterations,
            output,
            hardware,
            with_model,
            quiet,
            print_runtime,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = shutdown.clone();
                if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                    tracing::warn!(error = %e, "failed to install Ctrl-C handler");
                }
            }
            let opts = run::RunOpts {
                iterations,
                output,
                hardware,
                quiet,
                model_columns: with_model,
            };
            let started = Instant::now();
            let (summary, path) = run::run_experiment(&cfg, &opts, !cli.json, shutdown)?;
            let runtime_ms = started.elapsed().as_millis() as u64;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "complete",
                        "rows": summary.rows,
                        "solver_failures": summary.solver_failures,
                        "final_h1": summary.final_levels.h1,
                        "final_h2": summary.final_levels.h2,
                        "final_h2_model": summary.final_predicted.h2,
                        "final_command": summary.final_command,
                        "final_setpoint": summary.final_setpoint,
                        "elapsed_s": summary.elapsed_s,
                        "runtime_ms": runtime_ms,
                        "output": path.display().to_string(),
                    })
                );
            } else {
                println!(
                    "Run complete: {} rows, final h2 = {:.4} (model {:.4}, setpoint {:.4}), trajectory written to {}",
                    summary.rows,
                    summary.final_levels.h2,
                    summary.final_predicted.h2,
                    summary.final_setpoint,
                    path.display()
                );
                if summary.solver_failures > 0 {
                    println!(
                        "Solver fell back to command 0 on {} iterations",
                        summary.solver_failures
                    );
                }
                if print_runtime {
                    println!("Runtime: {runtime_ms} ms");
                }
            }
        }
        Commands::Probe { count, hardware } => {
            let readings = run::probe(&cfg, count, hardware).wrap_err("probe")?;
            for (i, l) in readings.iter().enumerate() {
                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({ "reading": i, "h1": l.h1, "h2": l.h2 })
                    );
                } else {
                    println!("{i:>4} h1 = {:.4} h2 = {:.4}", l.h1, l.h2);
                }
            }
        }
        Commands::SelfCheck => {
            let l = run::self_check(&cfg).wrap_err("self-check")?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "ok", "h1": l.h1, "h2": l.h2 })
                );
            } else {
                println!("OK (h1 = {:.4}, h2 = {:.4})", l.h1, l.h2);
            }
        }
    }
    Ok(())
}
