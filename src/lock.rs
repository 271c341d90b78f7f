//! Exclusive per-stage file locks.
//!
//! The lock is advisory and filesystem-based: holding the exclusively
//! created `locks/{stage}.lock` file confers the right to execute that
//! stage. Acquisition retries with an exponentially growing poll
//! interval until the timeout; release unlinks the file and runs on
//! every exit path through the RAII guard.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::LockError;
use crate::paths::PathLayout;

/// Default time to wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial poll interval on contention; doubles up to [`MAX_POLL_INTERVAL`].
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Diagnostic payload written into the lock file. The payload is
/// advisory; the file's existence is the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub stage: String,
    pub created_at: u64,
}

/// An acquired stage lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct StageLock {
    path: Utf8PathBuf,
    released: bool,
}

impl StageLock {
    /// Acquire the exclusive lock for `stage`, waiting up to `timeout`.
    ///
    /// The underlying primitive is an exclusive create: the open fails
    /// atomically when the file already exists. On contention the caller
    /// polls with an exponentially growing interval bounded by the
    /// deadline; exceeding it yields [`LockError::Timeout`].
    pub async fn acquire(
        layout: &PathLayout,
        stage: &str,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let path = layout.lock_file(stage);
        crate::paths::ensure_dir_all(layout.locks_dir().as_std_path())?;

        let started = Instant::now();
        let deadline = started + timeout;
        let mut interval = INITIAL_POLL_INTERVAL;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.as_std_path())
            {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        stage: stage.to_string(),
                        created_at: SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map_or(0, |d| d.as_secs()),
                    };
                    // Diagnostic only; a failed write still holds the lock.
                    if let Ok(json) = serde_json::to_string_pretty(&info) {
                        let _ = file.write_all(json.as_bytes());
                        let _ = file.flush();
                    }
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout {
                            stage: stage.to_string(),
                            waited_secs: started.elapsed().as_secs_f64(),
                        });
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(interval.min(remaining)).await;
                    interval = (interval * 2).min(MAX_POLL_INTERVAL);
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }
    }

    /// Release the lock by unlinking the file. Idempotent: releasing an
    /// already-released lock is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_file(self.path.as_std_path()) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path, error = %e, "Failed to remove lock file");
            }
        }
    }

    /// Read the diagnostic payload of a held lock, if any.
    pub fn read_info(layout: &PathLayout, stage: &str) -> Option<LockInfo> {
        let content = std::fs::read_to_string(layout.lock_file(stage).as_std_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Whether the lock file for `stage` currently exists.
    #[must_use]
    pub fn is_held(layout: &PathLayout, stage: &str) -> bool {
        layout.lock_file(stage).exists()
    }
}

impl Drop for StageLock {
    fn drop(&mut self) {
        self.release();
    }
}
