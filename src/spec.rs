//! Pipeline declaration loading and validation.
//!
//! The declaration is a single UTF-8 JSON document. Unknown keys are
//! rejected so typos in stage configuration fail loudly instead of being
//! silently ignored. Input paths are not required to exist at load time
//! (they may be produced by earlier stages within the same run).

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;

use crate::error::SpecError;
use crate::paths::PathLayout;

/// A validated pipeline declaration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub stages: Vec<StageSpec>,
}

/// One ordered unit of work, implemented by an external processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    pub processor: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub output_dir: String,
    /// Free-form parameter mapping, exported to the processor as JSON.
    /// Backed by a sorted map so the canonical serialization feeding the
    /// idempotency key is deterministic.
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub idempotency: IdempotencySpec,
    #[serde(default)]
    pub checkpoint: CheckpointSpec,
    #[serde(default)]
    pub retry: RetrySpec,
    /// Advisory resource hints, forwarded to the processor environment.
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    /// Scan the processor source for forbidden imports before execution.
    #[serde(default = "default_true")]
    pub offline_guard: bool,
    /// Serialize executions of this stage through the filesystem lock.
    #[serde(default = "default_true")]
    pub use_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdempotencySpec {
    pub enabled: bool,
}

impl Default for IdempotencySpec {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckpointSpec {
    pub enabled: bool,
    #[serde(default)]
    pub line_interval: u64,
}

impl Default for CheckpointSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            line_interval: 0,
        }
    }
}

/// Retry policy fields as declared; converted to a runtime policy by
/// `retry::RetryPolicy::from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetrySpec {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay: f64,
    /// Multiplicative jitter factor applied to each backoff step.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceSpec {
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default, rename = "memoryMB")]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub io_concurrency: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    0.5
}

fn default_jitter() -> f64 {
    0.1
}

impl PipelineSpec {
    /// Load and validate a pipeline declaration from `path`.
    ///
    /// Validation rejects unreadable files, invalid JSON, invalid or
    /// duplicate stage names, and processor paths that do not resolve to
    /// an existing file.
    pub fn load(path: &Utf8Path, layout: &PathLayout) -> Result<Self, SpecError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|source| {
            SpecError::Unreadable {
                path: path.to_string(),
                source,
            }
        })?;
        let spec: Self = serde_json::from_str(&content).map_err(|source| SpecError::Invalid {
            path: path.to_string(),
            source,
        })?;
        spec.validate(layout)?;
        Ok(spec)
    }

    fn validate(&self, layout: &PathLayout) -> Result<(), SpecError> {
        if self.stages.is_empty() {
            return Err(SpecError::EmptyPipeline);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !is_valid_stage_name(&stage.name) {
                return Err(SpecError::InvalidStageName {
                    name: stage.name.clone(),
                });
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(SpecError::DuplicateStageName {
                    name: stage.name.clone(),
                });
            }
            let processor = layout.resolve(&stage.processor);
            if !processor.is_file() {
                return Err(SpecError::ProcessorNotFound {
                    stage: stage.name.clone(),
                    path: stage.processor.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Stage names must match `^[A-Za-z0-9_\-]+$`.
#[must_use]
pub fn is_valid_stage_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
