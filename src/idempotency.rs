//! Idempotency-key computation and the skip decision.
//!
//! The key is a deterministic fingerprint over the stage's input
//! contents, the processor version, and the canonical parameter
//! serialization. Equality with the persisted key plus a present
//! completion marker authorizes skipping the stage.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::time::UNIX_EPOCH;

use crate::paths::PathLayout;
use crate::spec::StageSpec;
use crate::state::StageRecord;

/// Placeholder component hashed for an input that does not exist.
const MISSING_INPUT: &str = "missing";

/// Hex SHA-256 of a file's contents, streamed in chunks.
pub fn sha256_file(path: &Utf8Path) -> Result<String> {
    let mut file = File::open(path.as_std_path())
        .with_context(|| format!("Failed to open input for hashing: {path}"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read input for hashing: {path}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Processor version derived from the file's last-modification time,
/// serialized as `v{seconds}`. An unreadable processor yields `v0` so
/// the key stays computable and the executor reports the real failure.
#[must_use]
pub fn processor_version(path: &Utf8Path) -> String {
    let mtime = std::fs::metadata(path.as_std_path())
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    format!("v{mtime}")
}

/// Canonical parameter serialization: JSON with keys in sorted order.
/// `serde_json::Map` is BTreeMap-backed, so nested objects sort too.
#[must_use]
pub fn canonical_params(params: &Map<String, Value>) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string())
}

/// Compute the idempotency key for a stage.
///
/// `SHA256(H(input₁) | H(input₂) | … | H(inputₙ) | processorVersion |
/// canonicalParams)` in hex, where `H` is the hex SHA-256 of the input's
/// contents or the literal `missing` for an absent file. Pure over the
/// filesystem: computing it twice over unchanged state is bit-identical.
pub fn compute_key(
    layout: &PathLayout,
    inputs: &[String],
    processor: &str,
    params: &Map<String, Value>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(inputs.len() + 2);
    for input in inputs {
        let path = layout.resolve(input);
        if path.is_file() {
            parts.push(sha256_file(&path)?);
        } else {
            parts.push(MISSING_INPUT.to_string());
        }
    }
    parts.push(processor_version(&layout.resolve(processor)));
    parts.push(canonical_params(params));

    let raw = parts.join("|");
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// The skip decision: skip iff idempotency is enabled, the persisted
/// record carries the same key, and the completion marker exists.
#[must_use]
pub fn should_skip(
    stage: &StageSpec,
    record: Option<&StageRecord>,
    fresh_key: &str,
    layout: &PathLayout,
) -> bool {
    if !stage.idempotency.enabled {
        return false;
    }
    let key_matches = record
        .and_then(|r| r.idempotency_key.as_deref())
        .is_some_and(|k| k == fresh_key);
    key_matches
        && layout
            .completion_marker(&stage.output_dir, &stage.name)
            .exists()
}
