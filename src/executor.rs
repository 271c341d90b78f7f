//! Child-process execution of stage processors.
//!
//! The processor is invoked with argv-style arguments (never a shell
//! string), the pipeline root as working directory, and the inherited
//! environment augmented with the `PIPELINE_*` contract variables. Each
//! attempt is bounded by a timeout; the child is killed when the
//! deadline passes. Upstream code never touches process primitives.

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ExecError;

/// Per-attempt execution timeout.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code a processor uses to signal a retryable failure.
pub const TRANSIENT_EXIT_CODE: i32 = 10;

/// Bytes of stdout/stderr retained for the stage record.
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Classification of one attempt, per the outcome table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Retryable: exit 10 or timeout.
    Transient(String),
    /// Non-retryable: any other non-zero exit, or a signal death.
    Terminal(String),
}

/// Captured result of one processor attempt.
#[derive(Debug, Clone)]
pub struct ExecReport {
    /// `None` when the child died to a signal or was killed on timeout.
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub timed_out: bool,
}

impl ExecReport {
    /// Map the raw result onto the success/transient/terminal table.
    #[must_use]
    pub fn outcome(&self) -> AttemptOutcome {
        if self.timed_out {
            return AttemptOutcome::Transient("attempt timed out".to_string());
        }
        match self.exit_code {
            Some(0) => AttemptOutcome::Success,
            Some(TRANSIENT_EXIT_CODE) => {
                AttemptOutcome::Transient(self.error_detail(TRANSIENT_EXIT_CODE))
            }
            Some(code) => AttemptOutcome::Terminal(self.error_detail(code)),
            None => AttemptOutcome::Terminal("processor killed by signal".to_string()),
        }
    }

    fn error_detail(&self, code: i32) -> String {
        let detail = if !self.stderr_tail.trim().is_empty() {
            self.stderr_tail.trim()
        } else if !self.stdout_tail.trim().is_empty() {
            self.stdout_tail.trim()
        } else {
            return format!("exit {code}");
        };
        format!("exit {code}: {detail}")
    }
}

/// Executes processors as supervised child processes.
#[derive(Debug, Clone)]
pub struct Executor {
    timeout: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

impl Executor {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one attempt: `<processor> <input₁> … <inputₙ>` from `cwd`
    /// with `env` layered over the inherited environment.
    ///
    /// A missing processor or failed spawn is an error (terminal for the
    /// stage); a started-then-failed child is a report.
    pub async fn run(
        &self,
        processor: &Utf8Path,
        inputs: &[Utf8PathBuf],
        env: &[(String, String)],
        cwd: &Utf8Path,
    ) -> Result<ExecReport, ExecError> {
        if !processor.is_file() {
            return Err(ExecError::ProcessorMissing {
                path: processor.to_string(),
            });
        }

        let mut cmd = Command::new(processor.as_std_path());
        cmd.args(inputs.iter().map(|p| p.as_std_path()))
            .current_dir(cwd.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::ProcessorMissing {
                    path: processor.to_string(),
                }
            } else {
                ExecError::SpawnFailed {
                    path: processor.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecReport {
                exit_code: output.status.code(),
                stdout_tail: tail(&output.stdout),
                stderr_tail: tail(&output.stderr),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(ExecError::Io(e)),
            // Dropping the wait future drops the child; kill_on_drop
            // terminates the process tree's root.
            Err(_elapsed) => Ok(ExecReport {
                exit_code: None,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                timed_out: true,
            }),
        }
    }
}

/// Last `OUTPUT_TAIL_BYTES` of captured output, UTF-8 lossy and aligned
/// to a character boundary.
fn tail(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() <= OUTPUT_TAIL_BYTES {
        return s.into_owned();
    }
    let mut idx = s.len() - OUTPUT_TAIL_BYTES;
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    s[idx..].to_string()
}
