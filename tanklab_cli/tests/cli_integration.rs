use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal sim config; kp raised so the 0.5 setpoint is reachable.
fn write_valid_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[plant]
kp = 0.02

[run]
iterations = 30
interval_ms = 1000
output = "{}"
backend = "sim"
{extra}
"#,
        dir.path().join("data.txt").display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn tanklab(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tanklab_cli").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["run", "--quiet"], 0, "Run complete: 30 rows", "stdout")]
#[case(&["run"], 0, "Height 1", "stdout")]
#[case(&["run"], 0, "Model h2", "stdout")]
#[case(&["probe", "--count", "3"], 0, "h2 =", "stdout")]
#[case(&["self-check"], 0, "OK", "stdout")]
#[case(&["run", "--iterations"], 2, "value is required", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let mut cmd = tanklab(&dir);
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn run_writes_one_row_per_iteration() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = dir.path().join("custom.csv");

    tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--quiet", "--iterations", "12", "--output"])
        .arg(&out)
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "time,command,h1,h2");
    assert_eq!(lines.len(), 13);
    assert!(lines[1].starts_with("0,0,"));
}

#[rstest]
fn json_run_prints_summary_line() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .args(["--json", "run", "--iterations", "20"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let last = stdout.lines().last().unwrap();
    let v: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["status"], "complete");
    assert_eq!(v["rows"], 20);
    assert_eq!(v["solver_failures"], 0);
    assert_eq!(v["final_setpoint"], 0.5);
    let model = v["final_h2_model"].as_f64().unwrap();
    let measured = v["final_h2"].as_f64().unwrap();
    assert!((model - measured).abs() < 1e-6, "{model} vs {measured}");
}

#[rstest]
fn with_model_appends_predicted_columns() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = dir.path().join("model.csv");

    tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--quiet", "--with-model", "--iterations", "10", "--output"])
        .arg(&out)
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "time,command,h1,h2,h1_model,h2_model");
    assert_eq!(lines.len(), 11);
    // simulated rig and predictor share the plant, so the model tracks the
    // measurement
    let last: Vec<f64> = lines[10].split(',').map(|c| c.parse().unwrap()).collect();
    assert_eq!(last.len(), 6);
    assert!(last[5] > 0.0);
    assert!((last[5] - last[3]).abs() < 1e-6, "{last:?}");
}

#[rstest]
fn cli_reports_bad_schedule_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let bad_csv = dir.path().join("schedule.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "step,value").unwrap();
    writeln!(f, "100,0.3").unwrap();

    tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .arg("--schedule")
        .arg(&bad_csv)
        .arg("self-check")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn schedule_csv_drives_setpoint_change() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let csv = dir.path().join("schedule.csv");
    fs::write(&csv, "iteration,setpoint\n10,0.3\n").unwrap();

    let out = tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .arg("--schedule")
        .arg(&csv)
        .args(["--json", "run", "--iterations", "15"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let v: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(v["final_setpoint"], 0.3);
}

#[rstest]
#[case("[controller]\nmax_rate = 2.0\n", "max_rate")]
#[case("[run]\niterations = 0\n", "iterations")]
#[case("[plant]\nmodel = \"gravity\"\n", "controller.model")]
fn invalid_config_exits_with_config_code(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, toml).unwrap();

    tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .code(4)
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn missing_config_file_is_a_config_error() {
    let dir = tempdir().unwrap();
    tanklab(&dir)
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[rstest]
fn unplugged_rig_aborts_and_keeps_partial_log() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    tanklab(&dir)
        .env("TANKLAB_TEST_SIM_UNPLUG", "5")
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--quiet"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains(
            "What happened: The tank rig stopped responding",
        ))
        .stderr(predicate::str::contains(
            "The partial trajectory (5 rows) was saved to",
        ));

    let text = fs::read_to_string(dir.path().join("data.txt")).unwrap();
    assert_eq!(text.lines().count(), 1 + 5);
}

#[rstest]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let out = tanklab(&dir)
        .env("TANKLAB_TEST_SIM_UNPLUG", "0")
        .arg("--config")
        .arg(&cfg)
        .args(["--json", "probe"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));
    let stdout = String::from_utf8(out.stdout).unwrap();
    let v: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(v["reason"], "DeviceUnavailable");
}

#[cfg(not(feature = "hardware"))]
#[rstest]
fn hardware_flag_without_serial_support_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    tanklab(&dir)
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--hardware"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("--features hardware"));
}
