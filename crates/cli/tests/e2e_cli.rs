use assert_cmd::cargo::CommandCargoExt;
use predicates::prelude::*;
use std::process::Command;
use std::time::Duration;

/// Runs the demo binary for a short, fixed duration and checks it prints a final
/// summary and exits cleanly.
#[test]
fn short_run_reports_final_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("ramp-cli")?;
    cmd.arg("--duration-secs")
        .arg("1")
        .arg("--seed")
        .arg("7")
        .arg("--simulated-failure-rate")
        .arg("0.0")
        .arg("--max-tps")
        .arg("50")
        .arg("--ramp-interval-ms")
        .arg("100");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run_id: ramp-demo-7"))
        .stdout(predicate::str::contains("executions:"));

    Ok(())
}

/// A seeded run with `--json` prints a single JSON object with the fields a caller
/// would script against.
#[test]
fn json_output_is_well_formed() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::cargo_bin("ramp-cli")?
        .arg("--duration-secs")
        .arg("1")
        .arg("--seed")
        .arg("11")
        .arg("--json")
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with('{'))
        .expect("expected a JSON line in stdout");
    let value: serde_json::Value = serde_json::from_str(line)?;
    assert!(value.get("total_executions").is_some());
    assert!(value.get("final_phase").is_some());

    Ok(())
}

/// An out-of-range config (min_tps >= max_tps) is rejected before any dispatch happens.
#[test]
fn invalid_config_exits_nonzero() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("ramp-cli")?;
    cmd.arg("--min-tps").arg("100").arg("--max-tps").arg("50");
    cmd.assert().failure();
    Ok(())
}

/// Sanity check that the binary actually terminates promptly rather than hanging
/// past its requested duration.
#[test]
fn exits_within_a_reasonable_grace_period_of_the_requested_duration() -> Result<(), Box<dyn std::error::Error>> {
    let start = std::time::Instant::now();
    let mut cmd = Command::cargo_bin("ramp-cli")?;
    cmd.arg("--duration-secs").arg("1");
    cmd.assert().success();
    assert!(start.elapsed() < Duration::from_secs(10));
    Ok(())
}
