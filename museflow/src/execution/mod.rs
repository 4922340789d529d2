//! Persisted execution records and their metrics.

use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// The pipeline executor is driving stages.
    Running,
    /// All required stages succeeded.
    Completed,
    /// A required stage failed, the run was cancelled, or setup failed.
    Failed,
}

impl ExecutionStatus {
    /// Returns whether this is a terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Metrics for one stage's execution attempt loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Wall-clock duration of the attempt loop, in milliseconds.
    pub duration_ms: f64,
    /// Attempts consumed.
    pub attempts: u32,
    /// Provider id of the service that succeeded, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model attribution reported by the adapter, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Error entry recorded for a failed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorRecord {
    /// The failure message.
    pub message: String,
    /// When the failure was recorded, ISO 8601.
    pub timestamp: String,
}

/// Aggregated metrics for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Total wall-clock duration, in milliseconds.
    pub total_duration_ms: f64,
    /// Per-stage metrics keyed by stage id.
    pub stage_results: HashMap<String, StageMetrics>,
    /// Invocation tally keyed by `{provider_id}/{service_name}`.
    pub services_used: HashMap<String, u32>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
}

/// A persisted pipeline execution record.
///
/// Created `Pending`, transitioned to `Running` immediately before the
/// pipeline executor starts, and terminated exactly once via `Completed`
/// or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// Execution id.
    pub id: Uuid,
    /// The configuration this run was resolved against.
    pub pipeline_id: Uuid,
    /// Current status.
    pub status: ExecutionStatus,
    /// The initiating input payload.
    pub input_data: serde_json::Value,
    /// Stage outputs keyed by stage id, set on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<HashMap<String, serde_json::Value>>,
    /// Failure message, set when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Aggregated metrics, set on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metrics: Option<ExecutionMetrics>,
    /// When the record was created.
    pub started_at: Timestamp,
    /// When the run terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

/// Terminal or transitional update applied to an execution record.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    /// New status.
    pub status: Option<ExecutionStatus>,
    /// Stage outputs to persist.
    pub output_data: Option<HashMap<String, serde_json::Value>>,
    /// Failure message to persist.
    pub error: Option<String>,
    /// Metrics to persist.
    pub execution_metrics: Option<ExecutionMetrics>,
    /// Termination timestamp.
    pub completed_at: Option<Timestamp>,
}

impl ExecutionUpdate {
    /// An update that marks the execution running.
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            ..Self::default()
        }
    }

    /// An update that marks the execution completed.
    #[must_use]
    pub fn completed(
        output_data: HashMap<String, serde_json::Value>,
        metrics: ExecutionMetrics,
        completed_at: Timestamp,
    ) -> Self {
        Self {
            status: Some(ExecutionStatus::Completed),
            output_data: Some(output_data),
            error: None,
            execution_metrics: Some(metrics),
            completed_at: Some(completed_at),
        }
    }

    /// An update that marks the execution failed.
    ///
    /// Partial outputs and metrics from stages that completed before the
    /// failure are preserved for diagnostics.
    #[must_use]
    pub fn failed(
        error: impl Into<String>,
        output_data: Option<HashMap<String, serde_json::Value>>,
        metrics: Option<ExecutionMetrics>,
        completed_at: Timestamp,
    ) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            output_data,
            error: Some(error.into()),
            execution_metrics: metrics,
            completed_at: Some(completed_at),
        }
    }
}
