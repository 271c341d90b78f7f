//! Run orchestration: the stage state machine and the sequential run loop.
//!
//! Stages run strictly in declaration order. Each stage moves through
//! `pending → {skipped | locked → running → (retrying)* → {ok | failed}}`;
//! the first failure aborts the run and the remaining stages are never
//! attempted. All persisted effects go through the atomic write layer,
//! so an interrupted run leaves consistent state for the next one; the
//! completion marker is the sole authority for "done".

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::Utc;
use std::time::{Duration, Instant};

use crate::audit::AuditLog;
use crate::atomic_write::write_file_atomic;
use crate::checkpoint;
use crate::error::{ExecError, FailureKind, LockError};
use crate::executor::{AttemptOutcome, Executor};
use crate::idempotency;
use crate::lock::{StageLock, DEFAULT_LOCK_TIMEOUT};
use crate::paths::{ensure_dir_all, PathLayout};
use crate::retry::RetryPolicy;
use crate::spec::{PipelineSpec, StageSpec};
use crate::state::{
    MetricsDocument, RunRecord, RunState, StageOutcome, StageRecord, StageStatus,
};

/// Result of one run, as aggregated into the metrics document.
#[derive(Debug)]
pub struct RunSummary {
    pub state: RunState,
    pub metrics: MetricsDocument,
}

impl RunSummary {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }
}

/// How an executed stage ended (skips return before execution).
#[derive(Debug)]
enum StageDisposition {
    Ok { attempts: u32 },
    Failed {
        kind: FailureKind,
        detail: String,
        attempts: u32,
    },
}

/// Sequential orchestrator bound to one repository layout.
#[derive(Debug)]
pub struct Orchestrator {
    layout: PathLayout,
    executor: Executor,
    lock_timeout: Duration,
}

impl Orchestrator {
    #[must_use]
    pub fn new(layout: PathLayout) -> Self {
        Self {
            layout,
            executor: Executor::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the executor and lock timeout (used by tests to shorten
    /// the attempt deadline).
    #[must_use]
    pub fn with_executor(layout: PathLayout, executor: Executor, lock_timeout: Duration) -> Self {
        Self {
            layout,
            executor,
            lock_timeout,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    /// Execute the whole pipeline under `run_id`.
    ///
    /// Returns `Err` only for faults of the run machinery itself
    /// (persistence failures, unreadable records); stage failures are
    /// reported through the summary's `state`.
    pub async fn run(&self, spec: &PipelineSpec, run_id: &str) -> Result<RunSummary> {
        self.layout.ensure_dirs().context("Failed to create state directories")?;

        let mut audit = AuditLog::open(&self.layout, run_id);
        record_event(
            &mut audit,
            None,
            "run_start",
            &format!("Pipeline {}", spec.name),
        );

        let mut run_record = RunRecord::started(run_id, &spec.name, spec.version.as_deref());
        run_record.store(&self.layout)?;

        let mut outcomes = Vec::new();
        let mut failed = false;
        for stage in &spec.stages {
            let outcome = self.execute_stage(stage, run_id, &mut audit).await?;
            let stage_failed = outcome.status == StageStatus::Failed;
            outcomes.push(outcome);
            if stage_failed {
                failed = true;
                break;
            }
        }

        let state = if failed {
            RunState::Failed
        } else {
            RunState::Completed
        };
        run_record.finish(state);
        run_record.store(&self.layout)?;

        let metrics = MetricsDocument::aggregate(run_id, outcomes);
        metrics.store(&self.layout)?;

        let state_name = if failed { "failed" } else { "completed" };
        record_event(&mut audit, None, "run_end", state_name);
        tracing::info!(run_id, state = state_name, "Run finished");

        Ok(RunSummary { state, metrics })
    }

    /// Drive one stage through the state machine and persist its outcome.
    async fn execute_stage(
        &self,
        stage: &StageSpec,
        run_id: &str,
        audit: &mut AuditLog,
    ) -> Result<StageOutcome> {
        let output_dir = self.layout.resolve(&stage.output_dir);
        ensure_dir_all(output_dir.as_std_path())
            .with_context(|| format!("Failed to create output directory: {output_dir}"))?;

        let prior = StageRecord::load(&self.layout, &stage.name)?;

        let fresh_key = if stage.idempotency.enabled {
            Some(idempotency::compute_key(
                &self.layout,
                &stage.inputs,
                &stage.processor,
                &stage.params,
            )?)
        } else {
            None
        };

        // pending → skipped
        if let Some(key) = fresh_key.as_deref() {
            if idempotency::should_skip(stage, prior.as_ref(), key, &self.layout) {
                tracing::info!(stage = %stage.name, "Stage skipped (idempotency key matched)");
                record_event(audit, Some(&stage.name), "skip", "idempotency key matched");

                let mut record = prior.unwrap_or_else(empty_record);
                record.last_status = StageStatus::Skipped;
                record.store(&self.layout, &stage.name)?;

                return Ok(StageOutcome {
                    stage: stage.name.clone(),
                    status: StageStatus::Skipped,
                    duration_sec: None,
                    error: None,
                });
            }
        }

        // Guard runs only for stages that will actually execute.
        if stage.offline_guard {
            if let Err(violation) = crate::offline::scan_processor(&self.layout.resolve(&stage.processor)) {
                tracing::error!(stage = %stage.name, module = %violation.module, "Offline guard violation");
                return self.fail_stage(
                    stage,
                    prior,
                    FailureKind::OfflineViolation,
                    violation.to_string(),
                    0.0,
                    0,
                    audit,
                );
            }
        }

        // pending → locked; LockTimeout goes straight to failed.
        let _lock = if stage.use_lock {
            match StageLock::acquire(&self.layout, &stage.name, self.lock_timeout).await {
                Ok(lock) => Some(lock),
                Err(LockError::Timeout { stage: name, waited_secs }) => {
                    return self.fail_stage(
                        stage,
                        prior,
                        FailureKind::LockTimeout,
                        format!("lock on '{name}' not acquired within {waited_secs:.1}s"),
                        0.0,
                        0,
                        audit,
                    );
                }
                Err(LockError::Io(e)) => {
                    return Err(e).context("Lock acquisition failed");
                }
            }
        } else {
            None
        };

        let line_offset = if stage.checkpoint.enabled {
            checkpoint::read_offset(&self.layout, &stage.name)
        } else {
            0
        };
        if line_offset > 0 {
            tracing::info!(stage = %stage.name, line_offset, "Resuming from checkpoint");
        }

        let base_env = self.stage_env(stage, run_id, line_offset, &output_dir);
        let processor = self.layout.resolve(&stage.processor);
        let inputs: Vec<Utf8PathBuf> = stage
            .inputs
            .iter()
            .map(|i| self.layout.resolve(i))
            .collect();
        let policy = RetryPolicy::from(&stage.retry);

        // locked → running → (retrying)* → {ok | failed}
        let started = Instant::now();
        let mut attempt = 0u32;
        let disposition = loop {
            attempt += 1;
            record_event(audit, Some(&stage.name), "start", &format!("Attempt {attempt}"));

            let mut env = base_env.clone();
            env.push(("PIPELINE_ATTEMPT".to_string(), attempt.to_string()));

            let report = match self.executor.run(&processor, &inputs, &env, self.layout.root()).await {
                Ok(report) => report,
                Err(ExecError::ProcessorMissing { path }) => {
                    break StageDisposition::Failed {
                        kind: FailureKind::ProcessorMissing,
                        detail: format!("processor not found: {path}"),
                        attempts: attempt,
                    };
                }
                Err(ExecError::SpawnFailed { path, reason }) => {
                    break StageDisposition::Failed {
                        kind: FailureKind::TerminalExecution,
                        detail: format!("failed to start '{path}': {reason}"),
                        attempts: attempt,
                    };
                }
                Err(ExecError::Io(e)) => {
                    return Err(e).context("Processor supervision failed");
                }
            };

            match report.outcome() {
                AttemptOutcome::Success => break StageDisposition::Ok { attempts: attempt },
                AttemptOutcome::Transient(detail) if policy.attempts_remaining(attempt) => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        stage = %stage.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %detail,
                        "Transient failure, retrying after backoff"
                    );
                    record_event(audit, Some(&stage.name), "fail", &detail);
                    tokio::time::sleep(delay).await;
                }
                AttemptOutcome::Transient(detail) => {
                    break StageDisposition::Failed {
                        kind: FailureKind::TransientExhausted,
                        detail,
                        attempts: attempt,
                    };
                }
                AttemptOutcome::Terminal(detail) => {
                    break StageDisposition::Failed {
                        kind: FailureKind::TerminalExecution,
                        detail,
                        attempts: attempt,
                    };
                }
            }
        };
        let duration = started.elapsed().as_secs_f64();

        match disposition {
            StageDisposition::Ok { attempts } => {
                // Record first, then the marker: the marker asserts that
                // the record already carries the key it was earned under.
                let mut record = prior.unwrap_or_else(empty_record);
                record.last_status = StageStatus::Ok;
                record.last_duration_sec = duration;
                record.last_completed_at = Some(Utc::now());
                record.last_error = None;
                record.attempts = attempts;
                if let Some(key) = fresh_key {
                    record.idempotency_key = Some(key);
                }
                record.store(&self.layout, &stage.name)?;

                let marker = self.layout.completion_marker(&stage.output_dir, &stage.name);
                write_file_atomic(&marker, b"")?;

                if stage.checkpoint.enabled {
                    checkpoint::mirror_progress(&self.layout, &stage.name)?;
                }

                tracing::info!(stage = %stage.name, duration_sec = duration, attempts, "Stage ok");
                record_event(
                    audit,
                    Some(&stage.name),
                    "done",
                    &format!("Duration {duration:.3}s"),
                );

                Ok(StageOutcome {
                    stage: stage.name.clone(),
                    status: StageStatus::Ok,
                    duration_sec: Some(duration),
                    error: None,
                })
            }
            StageDisposition::Failed {
                kind,
                detail,
                attempts,
            } => self.fail_stage(stage, prior, kind, detail, duration, attempts, audit),
        }
    }

    /// Persist a terminal failure: the record keeps its prior idempotency
    /// key (historical skip semantics) and no marker is written.
    #[allow(clippy::too_many_arguments)]
    fn fail_stage(
        &self,
        stage: &StageSpec,
        prior: Option<StageRecord>,
        kind: FailureKind,
        detail: String,
        duration: f64,
        attempts: u32,
        audit: &mut AuditLog,
    ) -> Result<StageOutcome> {
        let error = format!("{}: {detail}", kind.as_str());
        tracing::error!(stage = %stage.name, error = %error, "Stage failed");
        record_event(audit, Some(&stage.name), "fail", &error);

        let mut record = prior.unwrap_or_else(empty_record);
        record.last_status = StageStatus::Failed;
        record.last_duration_sec = duration;
        record.last_error = Some(error.clone());
        record.attempts = attempts;
        record.store(&self.layout, &stage.name)?;

        Ok(StageOutcome {
            stage: stage.name.clone(),
            status: StageStatus::Failed,
            duration_sec: Some(duration),
            error: Some(error),
        })
    }

    /// Environment injected into every attempt of a stage.
    fn stage_env(
        &self,
        stage: &StageSpec,
        run_id: &str,
        line_offset: u64,
        output_dir: &camino::Utf8Path,
    ) -> Vec<(String, String)> {
        let params_json =
            serde_json::to_string(&stage.params).unwrap_or_else(|_| "{}".to_string());
        let mut env = vec![
            ("PIPELINE_STAGE_NAME".to_string(), stage.name.clone()),
            ("PIPELINE_OUTPUT_DIR".to_string(), output_dir.to_string()),
            ("PIPELINE_RUN_ID".to_string(), run_id.to_string()),
            ("PIPELINE_LINE_OFFSET".to_string(), line_offset.to_string()),
            ("PIPELINE_PARAMS".to_string(), params_json),
            (
                "PIPELINE_LINE_INTERVAL".to_string(),
                stage.checkpoint.line_interval.to_string(),
            ),
            (
                "PIPELINE_PROGRESS_PATH".to_string(),
                self.layout.progress(&stage.name).to_string(),
            ),
        ];
        if let Some(resources) = &stage.resources {
            if let Some(cores) = resources.cpu_cores {
                env.push(("PIPELINE_RESOURCES_CPU_CORES".to_string(), cores.to_string()));
                env.push(("OMP_NUM_THREADS".to_string(), cores.to_string()));
            }
            if let Some(mb) = resources.memory_mb {
                env.push(("PIPELINE_RESOURCES_MEMORY_MB".to_string(), mb.to_string()));
            }
            if let Some(io) = resources.io_concurrency {
                env.push((
                    "PIPELINE_RESOURCES_IO_CONCURRENCY".to_string(),
                    io.to_string(),
                ));
            }
        }
        env
    }
}

fn empty_record() -> StageRecord {
    StageRecord {
        last_status: StageStatus::Failed,
        last_duration_sec: 0.0,
        last_completed_at: None,
        idempotency_key: None,
        last_error: None,
        attempts: 0,
    }
}

/// Audit appends are best-effort: the log is diagnostic, not state.
fn record_event(audit: &mut AuditLog, stage: Option<&str>, event: &str, message: &str) {
    if let Err(e) = audit.append(stage, event, message) {
        tracing::warn!(event, error = %e, "Failed to append audit log entry");
    }
}
