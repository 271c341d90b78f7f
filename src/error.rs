//! Error types for the pipeline runner.
//!
//! Each concern carries its own `thiserror` enum; the library never calls
//! `std::process::exit`. The binary maps errors to exit codes through
//! `exit_codes`.

use thiserror::Error;

/// Errors raised while loading or validating a pipeline declaration.
///
/// Any of these aborts the run before artifacts are written.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Failed to read pipeline declaration at {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline declaration at {path} is not valid JSON: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stage name '{name}' is invalid (allowed: letters, digits, '_', '-')")]
    InvalidStageName { name: String },

    #[error("Duplicate stage name '{name}'")]
    DuplicateStageName { name: String },

    #[error("Stage '{stage}' references processor '{path}' which does not exist")]
    ProcessorNotFound { stage: String, path: String },

    #[error("Pipeline declares no stages")]
    EmptyPipeline,
}

/// Errors from the exclusive per-stage lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Timed out after {waited_secs:.1}s waiting for lock on stage '{stage}'")]
    Timeout { stage: String, waited_secs: f64 },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from spawning or supervising a processor child process.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Processor not found: {path}")]
    ProcessorMissing { path: String },

    #[error("Failed to spawn processor '{path}': {reason}")]
    SpawnFailed { path: String, reason: String },

    #[error("IO error while supervising processor: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a stage's terminal failure, persisted into the
/// stage record and metrics error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    OfflineViolation,
    LockTimeout,
    ProcessorMissing,
    TerminalExecution,
    TransientExhausted,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OfflineViolation => "OfflineViolation",
            Self::LockTimeout => "LockTimeout",
            Self::ProcessorMissing => "ProcessorMissing",
            Self::TerminalExecution => "TerminalExecution",
            Self::TransientExhausted => "TransientExecution",
        }
    }
}
