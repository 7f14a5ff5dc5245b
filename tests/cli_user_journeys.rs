//! Behavior-driven tests for CLI user journeys
//!
//! These tests run the `tickstore` binary against a throwaway database with
//! the offline provider and check what the user sees: the JSON summary on
//! stdout and the exit code.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::tempdir;

fn tickstore(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tickstore"))
        .current_dir(home)
        .env("TICKSTORE_HOME", home)
        .env("RUST_LOG", "warn")
        .args(["--mock", "--delay-ms", "0", "--watchlist", "AAPL,MSFT"])
        .args(args)
        .output()
        .expect("binary runs")
}

fn summary(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// =============================================================================
// CLI User Journey: Ingestion
// =============================================================================

#[test]
fn user_can_run_every_pipeline_and_then_inspect_the_store() {
    // Given: An empty data directory
    let temp = tempdir().expect("tempdir");

    // When: The user runs everything, then asks for status
    let run = tickstore(temp.path(), &["all"]);
    let status = tickstore(temp.path(), &["status"]);

    // Then: Both succeed and the summary reflects what was stored
    assert_eq!(run.status.code(), Some(0));
    let run = summary(&run);
    assert_eq!(run["reports"].as_array().map(Vec::len), Some(3));
    assert_eq!(run["missing"], Value::Array(Vec::new()));

    assert_eq!(status.status.code(), Some(0));
    let status = summary(&status);
    assert_eq!(status["store"]["instruments"], 2);
    assert_eq!(status["store"]["observations"]["profile"], 2);
    assert_eq!(status["store"]["observations"]["financial-statement"], 2);
}

#[test]
fn user_can_choose_the_historical_lookback() {
    // Given: A registry bootstrapped by the profile refresh
    let temp = tempdir().expect("tempdir");
    assert_eq!(tickstore(temp.path(), &["profile"]).status.code(), Some(0));

    // When: The user asks for one month of bars
    let output = tickstore(temp.path(), &["historical", "--period", "1mo"]);

    // Then: Each tracked instrument gets one month of trading days
    assert_eq!(output.status.code(), Some(0));
    let report = summary(&output);
    assert_eq!(report["pipeline"], "historical");
    assert_eq!(report["records"], 2 * 21);
    assert_eq!(report["failed"], 0);
}

// =============================================================================
// CLI User Journey: Bad Input
// =============================================================================

#[test]
fn invalid_period_is_rejected_with_exit_code_two() {
    // Given: A user who mistypes the period
    let temp = tempdir().expect("tempdir");

    // When: The command runs
    let output = tickstore(temp.path(), &["historical", "--period", "7w"]);

    // Then: Nothing runs and the error is explained on stderr
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("7w"));
}

#[test]
fn zero_deadline_aborts_a_single_pipeline_with_exit_code_three() {
    // Given: A registry with tracked instruments
    let temp = tempdir().expect("tempdir");
    assert_eq!(tickstore(temp.path(), &["profile"]).status.code(), Some(0));

    // When: The financial refresh runs with no time budget
    let output = tickstore(temp.path(), &["--deadline-secs", "0", "financial"]);

    // Then: The run is reported as aborted
    assert_eq!(output.status.code(), Some(3));
    let report = summary(&output);
    assert_eq!(report["abort"]["code"], "pipeline.deadline_exceeded");
}

#[test]
fn aborted_sub_pipelines_do_not_fail_run_all() {
    // Given: No time budget at all
    let temp = tempdir().expect("tempdir");

    // When: Everything runs
    let output = tickstore(temp.path(), &["--deadline-secs", "0", "all"]);

    // Then: The profile refresh aborted, yet the coordinator reports success
    assert_eq!(output.status.code(), Some(0));
    let report = summary(&output);
    assert_eq!(
        report["reports"][0]["abort"]["code"],
        "pipeline.deadline_exceeded"
    );
    assert_eq!(report["missing"], Value::Array(Vec::new()));
}
