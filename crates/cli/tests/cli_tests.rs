//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};

fn idlectl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_idlectl"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = idlectl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Idle Compute"), "Should show app name");
    for command in ["generate", "train", "forecast", "plan", "status", "start", "stop", "slot"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = idlectl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("idlectl"), "Should show binary name");
}

#[test]
fn test_generate_help() {
    let output = idlectl(&["generate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--output"));
    assert!(stdout.contains("--seed"));
}

#[test]
fn test_start_rejects_unknown_intensity() {
    let output = idlectl(&["start", "TURBO"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TURBO"));
}

#[test]
fn test_status_fails_without_agent() {
    let output = idlectl(&["--api-url", "http://127.0.0.1:9", "status"]);
    assert!(!output.status.success());
}

#[test]
fn test_forecast_fails_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("missing.json");
    let forecast = dir.path().join("forecast.csv");

    let output = idlectl(&[
        "forecast",
        "--model",
        path_arg(&model),
        "--output",
        path_arg(&forecast),
    ]);

    assert!(!output.status.success());
    assert!(!forecast.exists());
}

#[test]
fn test_offline_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.csv");
    let model = dir.path().join("model.json");
    let forecast = dir.path().join("forecast.csv");

    let output = idlectl(&[
        "--format",
        "json",
        "generate",
        "--output",
        path_arg(&history),
        "--start",
        "2024-01-01 00:00:00",
        "--end",
        "2024-01-14 23:45:00",
    ]);
    assert!(output.status.success(), "generate failed: {:?}", output);
    let generated: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(generated["rows"], 14 * 96);

    let output = idlectl(&[
        "--format",
        "json",
        "train",
        "--history",
        path_arg(&history),
        "--model",
        path_arg(&model),
    ]);
    assert!(output.status.success(), "train failed: {:?}", output);
    let trained: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(trained["report"]["test_size"], 269);
    assert_eq!(trained["report"]["train_size"], 14 * 96 - 269);
    assert!(model.exists());

    let output = idlectl(&[
        "--format",
        "json",
        "forecast",
        "--model",
        path_arg(&model),
        "--output",
        path_arg(&forecast),
        "--horizon-days",
        "2",
    ]);
    assert!(output.status.success(), "forecast failed: {:?}", output);
    let counts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let total: u64 = counts
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["slots"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 2 * 96);

    let off_grid = dir.path().join("off_grid.csv");
    let output = idlectl(&[
        "forecast",
        "--model",
        path_arg(&model),
        "--output",
        path_arg(&off_grid),
        "--after",
        "2024-01-15 10:07",
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("15-minute boundary"));
    assert!(!off_grid.exists());

    let output = idlectl(&["--format", "json", "plan", "--forecast", path_arg(&forecast)]);
    assert!(output.status.success(), "plan failed: {:?}", output);
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let jobs = plan["jobs"].as_array().unwrap().len();
    let skipped = plan["skipped_slots"].as_array().unwrap().len();
    assert_eq!(jobs, 2 * (2 * 96 - skipped));
}

#[test]
fn test_status_against_agent() {
    let mut server = mockito::Server::new();
    let health = server
        .mock("GET", "/healthz")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"healthy","components":{"scheduler":{"status":"healthy","since":"2024-01-08T00:00:00Z"}}}"#,
        )
        .create();
    let computation = server
        .mock("GET", "/computation")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "state": {"state": "running", "intensity": "MEDIUM"},
                "current_calculation": {"run_id": 3, "cycle": 7, "label": "background-computation", "intensity": "MEDIUM", "status": "running"},
                "calculation_history": [],
                "pending_jobs": 12,
                "next_job": {"id": {"slot": 4, "phase": "stop"}, "run_at": "2024-01-08T01:15:00", "action": {"action": "stop"}}
            }"#,
        )
        .create();

    let output = idlectl(&["--api-url", &server.url(), "--format", "json", "status"]);

    assert!(output.status.success(), "status failed: {:?}", output);
    health.assert();
    computation.assert();
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["computation"]["pending_jobs"], 12);
    assert_eq!(status["computation"]["state"]["intensity"], "MEDIUM");
}

#[test]
fn test_start_posts_intensity() {
    let mut server = mockito::Server::new();
    let start = server
        .mock("POST", "/computation/start")
        .match_body(mockito::Matcher::Json(serde_json::json!({"intensity": "LOW"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"outcome":"started","run_id":1,"intensity":"LOW"}"#)
        .create();

    let output = idlectl(&["--api-url", &server.url(), "--format", "json", "start", "low"]);

    assert!(output.status.success(), "start failed: {:?}", output);
    start.assert();
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["outcome"], "started");
}

#[test]
fn test_slot_not_found_fails() {
    let mut server = mockito::Server::new();
    let slot = server
        .mock("GET", "/forecast/slot")
        .match_query(mockito::Matcher::UrlEncoded(
            "at".into(),
            "2030-01-01 00:00".into(),
        ))
        .with_status(404)
        .with_body(r#"{"error":"no forecast slot covers 2030-01-01 00:00:00"}"#)
        .create();

    let output = idlectl(&["--api-url", &server.url(), "slot", "2030-01-01 00:00"]);

    assert!(!output.status.success());
    slot.assert();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("404"));
}
