//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against a throwaway HOME so
//! every test gets its own empty store.

use std::path::Path;
use std::process::Command;

/// Run a CLI command with an isolated home directory.
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .args(["run", "-p", "lectio-cli", "--quiet", "--"])
        .args(args)
        .env("HOME", home)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn help_works() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Lectio reading program admin CLI"));
}

#[test]
fn unknown_subcommand_fails() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["frobnicate"]);
    assert_ne!(code, 0);
}

#[test]
fn phase_show_bootstraps_to_setup() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["phase", "show"]);
    assert_eq!(code, 0, "phase show failed");
    assert!(stdout.contains("SETUP"));
}

#[test]
fn out_of_order_transition_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["phase", "transition", "RESULTS"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Illegal phase transition"));
}

#[test]
fn scan_of_empty_store_reports_healthy() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["battle", "scan"]);
    assert_eq!(code, 0, "battle scan failed");
    assert!(stdout.contains("No issues found"));
}

#[test]
fn session_log_updates_aggregates() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        home.path(),
        &[
            "student", "add", "Reader", "--entity", "diocese-1", "--school", "st-anne",
        ],
    );
    assert_eq!(code, 0, "student add failed");
    let id_line = stdout.lines().next().unwrap_or_default();
    let student_id = id_line.trim_start_matches("Student created: ").trim();
    assert!(!student_id.is_empty());

    let (stdout, _, code) = run_cli(
        home.path(),
        &["session", "log", student_id, "--minutes", "25"],
    );
    assert_eq!(code, 0, "session log failed");
    assert!(stdout.contains("\"current_streak\": 1"));
}
