//! Shared helpers for integration tests: temporary pipeline repositories
//! with shell-script processors.

// Each integration test crate compiles its own copy; not every test
// binary uses every helper.
#![allow(dead_code)]

use camino::Utf8PathBuf;
use pipeline_runner::paths::PathLayout;
use pipeline_runner::spec::PipelineSpec;
use tempfile::TempDir;

pub fn temp_repo() -> (TempDir, PathLayout) {
    let td = TempDir::new().expect("create temp repo");
    let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).expect("utf-8 temp path");
    (td, PathLayout::new(root))
}

/// Write an executable `/bin/sh` processor script under the repo.
#[cfg(unix)]
pub fn write_script(layout: &PathLayout, rel: &str, body: &str) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = layout.resolve(rel);
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), format!("#!/bin/sh\nset -e\n{body}")).unwrap();
    std::fs::set_permissions(path.as_std_path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write a plain (non-executable) file under the repo.
pub fn write_file(layout: &PathLayout, rel: &str, content: &str) -> Utf8PathBuf {
    let path = layout.resolve(rel);
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), content).unwrap();
    path
}

/// `data/input/sample.txt` with `count` lines of `line N`.
pub fn write_sample_input(layout: &PathLayout, count: usize) {
    let mut content = String::new();
    for i in 1..=count {
        content.push_str(&format!("line {i}\n"));
    }
    write_file(layout, "data/input/sample.txt", &content);
}

/// The two-stage demo pipeline: `stage_copy` copies the input into
/// `data/work/`, `stage_upper` uppercases it into `data/output/` and
/// records the line offset it observed.
#[cfg(unix)]
pub fn write_demo_pipeline(layout: &PathLayout) -> Utf8PathBuf {
    write_script(
        layout,
        "bin/stage_copy.sh",
        r#"out="$PIPELINE_OUTPUT_DIR/sample.txt"
cp "$1" "$out.tmp"
mv "$out.tmp" "$out"
"#,
    );
    write_script(
        layout,
        "bin/stage_upper.sh",
        r#"printf '%s' "$PIPELINE_LINE_OFFSET" > "$PIPELINE_OUTPUT_DIR/.observed_offset"
out="$PIPELINE_OUTPUT_DIR/result.txt"
tr '[:lower:]' '[:upper:]' < "$1" > "$out.tmp"
mv "$out.tmp" "$out"
"#,
    );
    write_file(
        layout,
        "pipeline.json",
        r#"{
  "name": "offline_demo",
  "version": "1.0.0",
  "stages": [
    {
      "name": "stage_copy",
      "processor": "bin/stage_copy.sh",
      "inputs": ["data/input/sample.txt"],
      "outputDir": "data/work",
      "idempotency": {"enabled": true},
      "retry": {"maxAttempts": 2, "baseDelay": 0.05, "jitter": 0.1}
    },
    {
      "name": "stage_upper",
      "processor": "bin/stage_upper.sh",
      "inputs": ["data/work/sample.txt"],
      "outputDir": "data/output",
      "idempotency": {"enabled": true},
      "checkpoint": {"enabled": true, "lineInterval": 50},
      "retry": {"maxAttempts": 2, "baseDelay": 0.05, "jitter": 0.1}
    }
  ]
}"#,
    )
}

pub fn load_spec(layout: &PathLayout) -> PipelineSpec {
    PipelineSpec::load(&layout.root().join("pipeline.json"), layout).expect("load pipeline")
}

pub fn read_json(path: &camino::Utf8Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path.as_std_path())
        .unwrap_or_else(|e| panic!("read {path}: {e}"));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("parse {path}: {e}"))
}

/// Assert a directory holds no leftover temporary files.
pub fn assert_no_tmp_files(dir: &camino::Utf8Path) {
    if !dir.exists() {
        return;
    }
    let leftovers: Vec<String> = std::fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp") || name.starts_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "leftover temp files in {dir}: {leftovers:?}");
}
