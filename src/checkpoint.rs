//! Checkpoint progress documents.
//!
//! A resumable processor periodically rewrites
//! `state/progress_{stage}.json` with the number of records it has
//! durably processed. The orchestrator only reads the document (before
//! invocation, to seed `PIPELINE_LINE_OFFSET`) and mirrors it into the
//! orchestrator-managed checkpoint alias after a successful run.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::atomic_write::write_json_atomic;
use crate::paths::PathLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub line_offset: u64,
}

/// Read the progress offset for a stage. An absent or unparseable
/// document means "start from the beginning".
#[must_use]
pub fn read_offset(layout: &PathLayout, stage: &str) -> u64 {
    let path = layout.progress(stage);
    let Ok(content) = std::fs::read_to_string(path.as_std_path()) else {
        return 0;
    };
    serde_json::from_str::<Checkpoint>(&content).map_or(0, |c| c.line_offset)
}

/// Mirror the processor-written progress document into the
/// orchestrator-managed checkpoint alias. A missing progress document is
/// fine; the processor may never have checkpointed.
pub fn mirror_progress(layout: &PathLayout, stage: &str) -> Result<()> {
    let offset = match std::fs::read_to_string(layout.progress(stage).as_std_path()) {
        Ok(content) => match serde_json::from_str::<Checkpoint>(&content) {
            Ok(c) => c.line_offset,
            Err(_) => return Ok(()),
        },
        Err(_) => return Ok(()),
    };
    write_json_atomic(&layout.checkpoint(stage), &Checkpoint { line_offset: offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn temp_layout() -> (TempDir, PathLayout) {
        let td = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let layout = PathLayout::new(root);
        layout.ensure_dirs().unwrap();
        (td, layout)
    }

    #[test]
    fn test_absent_progress_reads_zero() {
        let (_td, layout) = temp_layout();
        assert_eq!(read_offset(&layout, "stage_upper"), 0);
    }

    #[test]
    fn test_reads_processor_written_offset() {
        let (_td, layout) = temp_layout();
        std::fs::write(
            layout.progress("stage_upper").as_std_path(),
            r#"{"lineOffset": 50}"#,
        )
        .unwrap();

        assert_eq!(read_offset(&layout, "stage_upper"), 50);
    }

    #[test]
    fn test_corrupt_progress_reads_zero() {
        let (_td, layout) = temp_layout();
        std::fs::write(layout.progress("stage_upper").as_std_path(), "not json").unwrap();

        assert_eq!(read_offset(&layout, "stage_upper"), 0);
    }

    #[test]
    fn test_mirror_copies_offset_to_alias() {
        let (_td, layout) = temp_layout();
        std::fs::write(
            layout.progress("stage_upper").as_std_path(),
            r#"{"lineOffset": 120}"#,
        )
        .unwrap();

        mirror_progress(&layout, "stage_upper").unwrap();

        let content =
            std::fs::read_to_string(layout.checkpoint("stage_upper").as_std_path()).unwrap();
        let cp: Checkpoint = serde_json::from_str(&content).unwrap();
        assert_eq!(cp.line_offset, 120);
    }

    #[test]
    fn test_mirror_without_progress_is_noop() {
        let (_td, layout) = temp_layout();
        mirror_progress(&layout, "stage_upper").unwrap();
        assert!(!layout.checkpoint("stage_upper").exists());
    }
}
