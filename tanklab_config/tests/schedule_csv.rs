use std::fs;

use rstest::rstest;
use tanklab_config::load_schedule_csv;
use tempfile::tempdir;

#[rstest]
fn loads_well_formed_schedule() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    fs::write(&path, "iteration,setpoint\n0,0.5\n100, 0.8\n").unwrap();
    let steps = load_schedule_csv(&path).unwrap();
    assert_eq!(steps, vec![(0, 0.5), (100, 0.8)]);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    fs::write(&path, "step,value\n0,0.5\n").unwrap();
    let err = load_schedule_csv(&path).unwrap_err();
    assert!(err.to_string().contains("must have headers"));
}

#[rstest]
#[case("iteration,setpoint\n0,0.5\n0,0.6\n", "strictly increasing")]
#[case("iteration,setpoint\n0,-0.5\n", ">= 0")]
#[case("iteration,setpoint\n0,abc\n", "invalid CSV row 2")]
#[case("iteration,setpoint\n", "no rows")]
fn rejects_bad_rows(#[case] body: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    fs::write(&path, body).unwrap();
    let err = load_schedule_csv(&path).unwrap_err();
    assert!(
        err.to_string().contains(needle),
        "error {err} does not mention {needle}"
    );
}

#[rstest]
fn missing_file_reports_path() {
    let err = load_schedule_csv(std::path::Path::new("/nonexistent/schedule.csv")).unwrap_err();
    assert!(err.to_string().contains("open schedule CSV"));
}
