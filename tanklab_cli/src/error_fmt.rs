//! Human-readable error descriptions and structured JSON error formatting.

use tanklab_core::PartialRun;
use tanklab_core::error::{BuildError, TankError};

/// Sentence about the trajectory file, only for errors that ended a started run.
fn trajectory_note(err: &eyre::Report) -> String {
    match err.downcast_ref::<PartialRun>() {
        Some(PartialRun {
            rows,
            saved_to: Some(path),
        }) => format!(
            " The partial trajectory ({rows} rows) was saved to {}.",
            path.display()
        ),
        Some(PartialRun { saved_to: None, .. }) => {
            " The partial trajectory could not be saved.".to_string()
        }
        None => String::new(),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingDevice => {
                "What happened: No device was provided to the control loop.\nLikely causes: The rig failed to initialize or was not wired into the builder.\nHow to fix: Ensure the board or simulated rig is created and passed via with_device(...).".to_string()
            }
            BuildError::MissingController => {
                "What happened: No controller was provided to the control loop.\nLikely causes: The MPC controller was not wired into the builder.\nHow to fix: Pass the controller via with_controller(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/tank_config.toml for a sample."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TankError>() {
        let note = trajectory_note(err);
        return match te {
            TankError::DeviceUnavailable(msg) if msg.contains("timeout") => format!(
                "What happened: The tank rig stopped reporting levels ({msg}).\nLikely causes: Board reset, sensor channels not reporting, or device.read_timeout_ms too low.\nHow to fix: Check the analog channel numbers and raise device.read_timeout_ms in the config.{note}"
            ),
            TankError::DeviceUnavailable(msg) => format!(
                "What happened: The tank rig stopped responding ({msg}).\nLikely causes: USB cable unplugged, wrong serial port, or the board is not running StandardFirmata.\nHow to fix: Check device.port in the config, flash StandardFirmata, and replug the board.{note}"
            ),
            TankError::Config(msg) if msg.contains("must have headers") => {
                "Invalid headers in schedule CSV. Expected 'iteration,setpoint'.".to_string()
            }
            TankError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML or schedule CSV.\nHow to fix: Edit the config file, then rerun. See etc/tank_config.toml for a sample."
            ),
            TankError::Aborted(msg) => format!(
                "What happened: The run was stopped before completion ({msg}).\nLikely causes: Ctrl-C or another shutdown request.\nHow to fix: Nothing to fix; the pump was stopped.{note}"
            ),
            TankError::SolverNonConvergence(msg) => format!(
                "What happened: The optimizer did not converge ({msg}).\nLikely causes: Too few iterations or a very tight tolerance.\nHow to fix: Raise controller.solver.max_iter or relax controller.solver.eps."
            ),
            TankError::Io(msg) => format!(
                "What happened: Could not write the trajectory ({msg}).\nLikely causes: Output directory missing or not writable.\nHow to fix: Choose another path with --output or run.output."
            ),
            TankError::Prediction(msg) => format!(
                "What happened: The plant model could not be advanced ({msg}).\nLikely causes: Non-finite or extreme plant gains.\nHow to fix: Check the [plant] section of the config.{note}"
            ),
            TankError::State(msg) => format!(
                "What happened: {msg}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail.{note}"
            ),
        };
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(te) = err.downcast_ref::<TankError>() {
        return match te {
            TankError::DeviceUnavailable(_) => "DeviceUnavailable",
            TankError::SolverNonConvergence(_) => "SolverNonConvergence",
            TankError::Config(_) => "Config",
            TankError::Prediction(_) => "Prediction",
            TankError::State(_) => "State",
            TankError::Io(_) => "Io",
            TankError::Aborted(_) => "Aborted",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Exit codes: 3 device, 4 configuration, 5 aborted, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<TankError>() {
        Some(TankError::DeviceUnavailable(_)) => 3,
        Some(TankError::Config(_)) => 4,
        Some(TankError::Aborted(_)) => 5,
        Some(_) => 1,
        None => match err.downcast_ref::<BuildError>() {
            Some(BuildError::InvalidConfig(_)) => 4,
            _ => 1,
        },
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let dev = eyre::Report::new(TankError::DeviceUnavailable("x".into()));
        let cfg = eyre::Report::new(TankError::Config("x".into()));
        let abort = eyre::Report::new(TankError::Aborted("x".into()));
        let other = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&dev), 3);
        assert_eq!(exit_code_for_error(&cfg), 4);
        assert_eq!(exit_code_for_error(&abort), 5);
        assert_eq!(exit_code_for_error(&other), 1);
    }

    #[test]
    fn wrapped_errors_keep_their_exit_code() {
        use eyre::WrapErr;
        let r: eyre::Result<()> =
            Err(TankError::DeviceUnavailable("serial link lost".into())).wrap_err("reading levels");
        let e = r.unwrap_err();
        assert_eq!(exit_code_for_error(&e), 3);
    }

    #[test]
    fn device_error_before_a_run_claims_no_saved_trajectory() {
        let e = eyre::Report::new(TankError::DeviceUnavailable("open /dev/ttyACM0".into()));
        let text = humanize(&e);
        assert!(text.contains("stopped responding"));
        assert!(!text.contains("trajectory"), "{text}");
    }

    #[test]
    fn device_error_during_a_run_names_the_saved_file() {
        let e = eyre::Report::new(TankError::DeviceUnavailable("link lost".into())).wrap_err(
            PartialRun {
                rows: 6,
                saved_to: Some("out/data.txt".into()),
            },
        );
        assert_eq!(exit_code_for_error(&e), 3);
        let text = humanize(&e);
        assert!(
            text.contains("The partial trajectory (6 rows) was saved to out/data.txt."),
            "{text}"
        );
    }

    #[test]
    fn unsaved_partial_run_says_so() {
        let e = eyre::Report::new(TankError::Aborted("ctrl-c".into())).wrap_err(PartialRun {
            rows: 2,
            saved_to: None,
        });
        assert!(humanize(&e).contains("could not be saved"));
    }

    #[test]
    fn json_error_carries_reason() {
        let e = eyre::Report::new(TankError::Config("run.iterations must be >= 1".into()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Config");
        assert_eq!(v["exit_code"], 4);
    }
}
