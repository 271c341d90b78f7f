//! Filesystem layout for a pipeline repository.
//!
//! All persisted artifacts live under two directories relative to the
//! pipeline root: `state/` for JSON state documents and `locks/` for
//! stage lock files. A `PathLayout` is constructed once at startup and
//! passed down explicitly, which keeps the layout testable against
//! temporary roots and allows several repositories in one process.

use camino::{Utf8Path, Utf8PathBuf};

/// Resolved filesystem layout rooted at the pipeline repository.
#[derive(Debug, Clone)]
pub struct PathLayout {
    root: Utf8PathBuf,
}

impl PathLayout {
    /// Create a layout rooted at `root`. No directories are created yet;
    /// call [`ensure_dirs`](Self::ensure_dirs) before writing state.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The pipeline root directory (also the working directory of
    /// spawned processors).
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve a possibly-relative path against the pipeline root.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        let p = Utf8Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    #[must_use]
    pub fn state_dir(&self) -> Utf8PathBuf {
        self.root.join("state")
    }

    #[must_use]
    pub fn locks_dir(&self) -> Utf8PathBuf {
        self.root.join("locks")
    }

    #[must_use]
    pub fn run_record(&self, run_id: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("run_{run_id}.json"))
    }

    #[must_use]
    pub fn stage_record(&self, stage: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("stage_{stage}.json"))
    }

    #[must_use]
    pub fn metrics(&self, run_id: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("metrics_{run_id}.json"))
    }

    /// Progress document written by the processor during execution.
    #[must_use]
    pub fn progress(&self, stage: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("progress_{stage}.json"))
    }

    /// Orchestrator-managed checkpoint alias, mirrored from the progress
    /// document after a successful stage run.
    #[must_use]
    pub fn checkpoint(&self, stage: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("checkpoint_{stage}.json"))
    }

    #[must_use]
    pub fn audit_log(&self, run_id: &str) -> Utf8PathBuf {
        self.state_dir().join(format!("audit_{run_id}.jsonl"))
    }

    #[must_use]
    pub fn lock_file(&self, stage: &str) -> Utf8PathBuf {
        self.locks_dir().join(format!("{stage}.lock"))
    }

    /// Completion marker for a stage, inside the stage's output directory.
    #[must_use]
    pub fn completion_marker(&self, output_dir: &str, stage: &str) -> Utf8PathBuf {
        self.resolve(output_dir).join(format!(".{stage}.done"))
    }

    /// Create the `state/` and `locks/` directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        ensure_dir_all(self.state_dir().as_std_path())?;
        ensure_dir_all(self.locks_dir().as_std_path())?;
        Ok(())
    }
}

/// mkdir -p; treat `AlreadyExists` as success (removes TOCTTOU races)
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
