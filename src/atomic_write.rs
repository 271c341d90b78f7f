//! Atomic file persistence via the tmp-then-rename pattern.
//!
//! Every state document is serialized to a temporary file in the target
//! directory, flushed to disk, then renamed onto the destination. A crash
//! at any point leaves either the old document or the new one, never a
//! torn write. Leftover temporaries are garbage and are never read back
//! as state.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use std::io::Write;
use tempfile::NamedTempFile;

use crate::paths::ensure_dir_all;

/// Atomically write raw content to `path` (temp file → flush → rename).
pub fn write_file_atomic(path: &Utf8Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    ensure_dir_all(parent.as_std_path())
        .with_context(|| format!("Failed to create parent directory: {parent}"))?;

    // The temp file must live in the destination directory so the final
    // rename stays on one filesystem.
    let mut tmp = NamedTempFile::new_in(parent.as_std_path())
        .with_context(|| format!("Failed to create temporary file in: {parent}"))?;

    tmp.write_all(content)
        .with_context(|| format!("Failed to write temporary file for: {path}"))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to flush temporary file for: {path}"))?;

    tmp.persist(path.as_std_path())
        .map_err(|e| anyhow::Error::new(e.error))
        .with_context(|| format!("Failed to atomically replace: {path}"))?;

    Ok(())
}

/// Atomically write a document as pretty-printed UTF-8 JSON.
///
/// Key order is whatever the document's serializer produces; documents
/// that feed a hash use sorted-map types so the order is deterministic.
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize document for: {path}"))?;
    write_file_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let td = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        (td, root)
    }

    #[test]
    fn test_atomic_write_basic() {
        let (_td, root) = temp_root();
        let path = root.join("doc.json");

        write_file_atomic(&path, b"content").unwrap();

        assert_eq!(std::fs::read_to_string(path.as_std_path()).unwrap(), "content");
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_sibling() {
        let (_td, root) = temp_root();
        let path = root.join("state").join("run_x.json");

        write_file_atomic(&path, b"{}").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap().as_std_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "run_x.json")
            .collect();
        assert!(leftovers.is_empty(), "unexpected leftovers: {leftovers:?}");
    }

    #[test]
    fn test_atomic_write_overwrites_existing() {
        let (_td, root) = temp_root();
        let path = root.join("doc.json");

        write_file_atomic(&path, b"old").unwrap();
        write_file_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(path.as_std_path()).unwrap(), "new");
    }

    #[test]
    fn test_atomic_write_creates_parent_directories() {
        let (_td, root) = temp_root();
        let path = root.join("a").join("b").join("doc.json");

        write_file_atomic(&path, b"nested").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_json_write_round_trips() {
        let (_td, root) = temp_root();
        let path = root.join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("lineOffset".to_string(), 42u64);
        write_json_atomic(&path, &doc).unwrap();

        let loaded: BTreeMap<String, u64> =
            serde_json::from_str(&std::fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_empty_content() {
        let (_td, root) = temp_root();
        let path = root.join("marker");

        write_file_atomic(&path, b"").unwrap();

        assert!(path.exists());
        assert_eq!(std::fs::metadata(path.as_std_path()).unwrap().len(), 0);
    }
}
