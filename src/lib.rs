//! Offline batch pipeline orchestrator.
//!
//! Executes a declared sequence of processing stages against local files,
//! with idempotent skipping, checkpoint-based resume, bounded retries,
//! exclusive per-stage locking, and crash-safe atomic persistence.

pub mod atomic_write;
pub mod audit;
pub mod checkpoint;
pub mod cli;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod idempotency;
pub mod lock;
pub mod logging;
pub mod offline;
pub mod orchestrator;
pub mod paths;
pub mod retry;
pub mod spec;
pub mod state;
