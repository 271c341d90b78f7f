//! Hash-chained audit log.
//!
//! Every run appends its events to `state/audit_{runId}.jsonl`. Each
//! entry carries the previous entry's hash and its own
//! `SHA256(prevHash || canonical-entry-json)`, so truncation or edits
//! anywhere in the log break the chain. The log is append-only by
//! design; it is not authoritative state and is exempt from the
//! tmp-then-rename rule.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;

use crate::paths::PathLayout;

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub event: String,
    pub message: String,
    pub prev_hash: String,
    pub hash: String,
}

/// Appender for one run's audit log. Tracks the chain tail in memory so
/// repeated appends do not re-read the file.
#[derive(Debug)]
pub struct AuditLog {
    path: camino::Utf8PathBuf,
    prev_hash: String,
}

impl AuditLog {
    /// Open (or continue) the audit log for `run_id`, recovering the
    /// chain tail from the last line if the log already exists.
    pub fn open(layout: &PathLayout, run_id: &str) -> Self {
        let path = layout.audit_log(run_id);
        let prev_hash = last_hash(&path).unwrap_or_default();
        Self { path, prev_hash }
    }

    /// Append an event, extending the hash chain.
    pub fn append(&mut self, stage: Option<&str>, event: &str, message: &str) -> Result<()> {
        let ts = Utc::now().to_rfc3339();

        // The chained content is the canonical (sorted-key) JSON of the
        // entry without its hash fields.
        let mut body = BTreeMap::new();
        body.insert("ts", serde_json::Value::from(ts.clone()));
        if let Some(stage) = stage {
            body.insert("stage", serde_json::Value::from(stage));
        }
        body.insert("event", serde_json::Value::from(event));
        body.insert("message", serde_json::Value::from(message));
        let canonical = serde_json::to_string(&body).context("Failed to serialize audit entry")?;

        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(canonical.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let entry = AuditEntry {
            ts,
            stage: stage.map(str::to_string),
            event: event.to_string(),
            message: message.to_string(),
            prev_hash: std::mem::replace(&mut self.prev_hash, hash.clone()),
            hash,
        };

        let line = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .with_context(|| format!("Failed to open audit log: {}", self.path))?;
        writeln!(file, "{line}").with_context(|| format!("Failed to append audit log: {}", self.path))?;
        Ok(())
    }
}

fn last_hash(path: &camino::Utf8Path) -> Option<String> {
    let content = std::fs::read_to_string(path.as_std_path()).ok()?;
    let last_line = content.lines().rev().find(|l| !l.trim().is_empty())?;
    let entry: AuditEntry = serde_json::from_str(last_line).ok()?;
    Some(entry.hash)
}

/// Verify the hash chain of an audit log. Returns the entry count, or
/// `None` when any link is broken.
#[must_use]
pub fn verify_chain(layout: &PathLayout, run_id: &str) -> Option<usize> {
    let content = std::fs::read_to_string(layout.audit_log(run_id).as_std_path()).ok()?;
    let mut prev = String::new();
    let mut count = 0;

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let entry: AuditEntry = serde_json::from_str(line).ok()?;
        if entry.prev_hash != prev {
            return None;
        }

        let mut body = BTreeMap::new();
        body.insert("ts", serde_json::Value::from(entry.ts.clone()));
        if let Some(stage) = &entry.stage {
            body.insert("stage", serde_json::Value::from(stage.as_str()));
        }
        body.insert("event", serde_json::Value::from(entry.event.as_str()));
        body.insert("message", serde_json::Value::from(entry.message.as_str()));
        let canonical = serde_json::to_string(&body).ok()?;

        let mut hasher = Sha256::new();
        hasher.update(prev.as_bytes());
        hasher.update(canonical.as_bytes());
        if hex::encode(hasher.finalize()) != entry.hash {
            return None;
        }
        prev = entry.hash;
        count += 1;
    }
    Some(count)
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
    fn test_append_and_verify_chain() {
        let (_td, layout) = temp_layout();

        let mut log = AuditLog::open(&layout, "run1");
        log.append(None, "run_start", "Pipeline demo").unwrap();
        log.append(Some("stage_copy"), "start", "Attempt 1").unwrap();
        log.append(Some("stage_copy"), "done", "Duration 0.1s").unwrap();
        log.append(None, "run_end", "completed").unwrap();

        assert_eq!(verify_chain(&layout, "run1"), Some(4));
    }

    #[test]
    fn test_chain_survives_reopen() {
        let (_td, layout) = temp_layout();

        {
            let mut log = AuditLog::open(&layout, "run1");
            log.append(None, "run_start", "first").unwrap();
        }
        {
            let mut log = AuditLog::open(&layout, "run1");
            log.append(None, "run_end", "second").unwrap();
        }

        assert_eq!(verify_chain(&layout, "run1"), Some(2));
    }

    #[test]
    fn test_tampered_entry_breaks_chain() {
        let (_td, layout) = temp_layout();

        let mut log = AuditLog::open(&layout, "run1");
        log.append(None, "run_start", "original").unwrap();
        log.append(None, "run_end", "completed").unwrap();

        let path = layout.audit_log("run1");
        let tampered = std::fs::read_to_string(path.as_std_path())
            .unwrap()
            .replace("original", "edited");
        std::fs::write(path.as_std_path(), tampered).unwrap();

        assert_eq!(verify_chain(&layout, "run1"), None);
    }

    #[test]
    fn test_first_entry_has_empty_prev_hash() {
        let (_td, layout) = temp_layout();

        let mut log = AuditLog::open(&layout, "run1");
        log.append(None, "run_start", "x").unwrap();

        let content = std::fs::read_to_string(layout.audit_log("run1").as_std_path()).unwrap();
        let entry: AuditEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry.prev_hash, "");
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn test_missing_log_verifies_as_none() {
        let (_td, layout) = temp_layout();
        assert_eq!(verify_chain(&layout, "never_ran"), None);
    }
}
