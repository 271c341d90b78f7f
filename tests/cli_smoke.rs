//! Smoke tests driving the compiled `pipeline-runner` binary.

#![cfg(unix)]

mod support;

use std::process::Command;
use support::{temp_repo, write_demo_pipeline, write_file, write_sample_input};

fn run_binary(args: &[&str], work_dir: &std::path::Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_pipeline-runner"))
        .current_dir(work_dir)
        .args(args)
        .output()
        .expect("run pipeline-runner binary")
}

#[test]
fn test_run_and_rerun_exit_zero() {
    let (_td, layout) = temp_repo();
    write_demo_pipeline(&layout);
    write_sample_input(&layout, 100);
    let root = layout.root().as_std_path();

    let first = run_binary(&["--pipeline", "pipeline.json", "--run-id", "demo1"], root);
    assert!(
        first.status.success(),
        "first run failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("Run demo1 state: completed"));

    let second = run_binary(&["--pipeline", "pipeline.json", "--run-id", "demo2"], root);
    assert!(second.status.success());

    let metrics: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(layout.metrics("demo2").as_std_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(metrics["skippedStages"], 2);
}

#[test]
fn test_missing_pipeline_exits_config_error() {
    let (_td, layout) = temp_repo();
    let output = run_binary(
        &["--pipeline", "nope.json", "--run-id", "x"],
        layout.root().as_std_path(),
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_declaration_exits_config_error() {
    let (_td, layout) = temp_repo();
    write_file(&layout, "pipeline.json", "{ not json");
    let output = run_binary(
        &["--pipeline", "pipeline.json", "--run-id", "x"],
        layout.root().as_std_path(),
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_validate_offline_passes_clean_pipeline() {
    let (_td, layout) = temp_repo();
    write_demo_pipeline(&layout);
    write_sample_input(&layout, 10);

    let output = run_binary(
        &[
            "--pipeline",
            "pipeline.json",
            "--run-id",
            "demo1",
            "--validate-offline",
        ],
        layout.root().as_std_path(),
    );

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("[OFFLINE] Validation passed"));
}

#[test]
fn test_validate_offline_rejects_violation_before_run() {
    let (_td, layout) = temp_repo();
    write_sample_input(&layout, 10);
    write_file(&layout, "bin/net.py", "import urllib.request\n");
    write_file(
        &layout,
        "pipeline.json",
        r#"{
  "name": "net",
  "stages": [
    {"name": "s1", "processor": "bin/net.py", "outputDir": "data/work"}
  ]
}"#,
    );

    let output = run_binary(
        &[
            "--pipeline",
            "pipeline.json",
            "--run-id",
            "x",
            "--validate-offline",
        ],
        layout.root().as_std_path(),
    );

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("urllib"));
    // Aborted before the run: no run record was written.
    assert!(!layout.run_record("x").exists());
}

#[test]
fn test_failed_run_exits_nonzero() {
    let (_td, layout) = temp_repo();
    write_sample_input(&layout, 10);
    write_file(&layout, "bin/net.py", "import socket\n");
    write_file(
        &layout,
        "pipeline.json",
        r#"{
  "name": "net",
  "stages": [
    {"name": "s1", "processor": "bin/net.py", "outputDir": "data/work"}
  ]
}"#,
    );

    let output = run_binary(
        &["--pipeline", "pipeline.json", "--run-id", "bad1"],
        layout.root().as_std_path(),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Run bad1 state: failed"));
}
