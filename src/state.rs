//! Persisted run, stage, and metrics documents.
//!
//! All documents are UTF-8 JSON with camelCase keys, written through the
//! atomic persistence layer. Stage records are keyed process-wide by
//! stage name (not per run) so idempotency carries across runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic_write::write_json_atomic;
use crate::paths::PathLayout;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

/// Terminal outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Skipped,
    Failed,
}

/// Lifecycle record for one run, written at run start and run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub state: RunState,
}

impl RunRecord {
    #[must_use]
    pub fn started(run_id: &str, pipeline: &str, version: Option<&str>) -> Self {
        Self {
            run_id: run_id.to_string(),
            pipeline: pipeline.to_string(),
            version: version.map(str::to_string),
            started_at: Utc::now(),
            ended_at: None,
            state: RunState::Running,
        }
    }

    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.ended_at = Some(Utc::now());
    }

    pub fn store(&self, layout: &PathLayout) -> Result<()> {
        write_json_atomic(&layout.run_record(&self.run_id), self)
            .with_context(|| format!("Failed to persist run record for '{}'", self.run_id))
    }
}

/// Last-known execution state of a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub last_status: StageStatus,
    pub last_duration_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Attempts made by the most recent execution.
    #[serde(default)]
    pub attempts: u32,
}

impl StageRecord {
    pub fn load(layout: &PathLayout, stage: &str) -> Result<Option<Self>> {
        let path = layout.stage_record(stage);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path.as_std_path())
            .with_context(|| format!("Failed to read stage record: {path}"))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse stage record: {path}"))?;
        Ok(Some(record))
    }

    pub fn store(&self, layout: &PathLayout, stage: &str) -> Result<()> {
        write_json_atomic(&layout.stage_record(stage), self)
            .with_context(|| format!("Failed to persist stage record for '{stage}'"))
    }
}

/// Per-stage outcome line inside the metrics document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated outcomes for one run, written exactly once at termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDocument {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub stages: Vec<StageOutcome>,
    pub total_stages: usize,
    pub ok_stages: usize,
    pub skipped_stages: usize,
    pub failed_stages: usize,
}

impl MetricsDocument {
    /// Aggregate the outcomes of the stages that were actually reached.
    #[must_use]
    pub fn aggregate(run_id: &str, outcomes: Vec<StageOutcome>) -> Self {
        let count = |status: StageStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            total_stages: outcomes.len(),
            ok_stages: count(StageStatus::Ok),
            skipped_stages: count(StageStatus::Skipped),
            failed_stages: count(StageStatus::Failed),
            stages: outcomes,
        }
    }

    pub fn store(&self, layout: &PathLayout) -> Result<()> {
        write_json_atomic(&layout.metrics(&self.run_id), self)
            .with_context(|| format!("Failed to persist metrics for '{}'", self.run_id))
    }
}
