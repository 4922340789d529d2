//! The pipeline executor: drives a configuration's stages in declared
//! order against one shared context.

use super::stage::{StageExecution, StageExecutor};
use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfiguration, PipelineStage};
use crate::context::PipelineContext;
use crate::errors::OrchestratorError;
use crate::execution::{ExecutionMetrics, StageErrorRecord, StageMetrics};
use crate::invoker::ServiceInvoker;
use crate::registry::ServiceEntry;
use crate::routing::StageRouter;
use crate::storage::Storage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The result of one pipeline run.
///
/// The executor never touches execution records in storage; the lifecycle
/// manager maps this result onto the persisted record.
#[derive(Debug)]
pub struct PipelineRunResult {
    /// Stage outputs keyed by stage id.
    pub output: HashMap<String, Value>,
    /// Error entries for failed stages.
    pub errors: HashMap<String, StageErrorRecord>,
    /// Aggregated metrics, including partial progress on failure.
    pub metrics: ExecutionMetrics,
    /// Whether all required stages succeeded.
    pub success: bool,
    /// The fatal error, when not `success`.
    pub error: Option<String>,
    /// Whether the run stopped on cancellation.
    pub cancelled: bool,
    /// The cancellation reason, when `cancelled`.
    pub cancel_reason: Option<String>,
}

/// Drives all stages of one configuration end to end.
pub struct PipelineExecutor {
    router: StageRouter,
    stage_executor: StageExecutor,
}

impl PipelineExecutor {
    /// Creates a pipeline executor over the storage and invocation seams.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invoker: Arc<dyn ServiceInvoker>) -> Self {
        Self {
            router: StageRouter::new(storage.clone()),
            stage_executor: StageExecutor::new(invoker, storage),
        }
    }

    /// Runs every stage in declared order.
    ///
    /// A failing required stage aborts the run; a failing optional stage is
    /// recorded and skipped over. Stage N+1 never starts before stage N has
    /// recorded a success, skip, or abort outcome.
    pub async fn run(
        &self,
        config: &PipelineConfiguration,
        execution_id: Uuid,
        input: Value,
        cancel: &CancellationToken,
    ) -> PipelineRunResult {
        let mut ctx = PipelineContext::new(config.id, execution_id, input);
        info!(
            pipeline = %config.name,
            execution_id = %execution_id,
            stages = config.stages.len(),
            "Pipeline run started"
        );

        for stage in &config.stages {
            if cancel.is_cancelled() {
                let reason = cancel
                    .reason()
                    .unwrap_or_else(|| "cancellation requested".to_string());
                info!(execution_id = %execution_id, reason = %reason, "Pipeline run cancelled");
                return cancelled_result(ctx, reason);
            }

            ctx.current_stage = Some(stage.id.clone());

            // Input resolution and routing failures take the same
            // required/optional path as attempt-loop failures.
            let execution = match self.prepare(&ctx, stage, config).await {
                Ok((stage_input, candidates)) => {
                    self.stage_executor
                        .execute(stage, &stage_input, config, &candidates, cancel)
                        .await
                }
                Err(message) => StageExecution::failed(message, StageMetrics::default()),
            };

            if execution.success {
                let service_used = execution.service_used.unwrap_or_default();
                ctx.record_success(
                    &stage.id,
                    execution.output.unwrap_or(Value::Null),
                    execution.metrics,
                    &service_used,
                );
            } else {
                let message = execution
                    .error
                    .unwrap_or_else(|| "stage failed without an error message".to_string());
                ctx.record_failure(&stage.id, message.clone(), execution.metrics);
                if stage.required {
                    let fatal = OrchestratorError::RequiredStageFailed {
                        stage: stage.id.clone(),
                        message: message.clone(),
                    };
                    error!(
                        execution_id = %execution_id,
                        stage = %stage.id,
                        error = %fatal,
                        "Required stage failed, aborting run"
                    );
                    return aborted_result(ctx, message);
                }
                warn!(
                    execution_id = %execution_id,
                    stage = %stage.id,
                    error = %message,
                    "Optional stage failed, continuing"
                );
            }
        }

        ctx.current_stage = None;
        info!(execution_id = %execution_id, "Pipeline run completed");
        completed_result(ctx)
    }

    /// Resolves the stage input and candidate services.
    async fn prepare(
        &self,
        ctx: &PipelineContext,
        stage: &PipelineStage,
        config: &PipelineConfiguration,
    ) -> Result<(Value, Vec<ServiceEntry>), String> {
        let stage_input = ctx.resolve_input(stage).map_err(|e| e.to_string())?;
        let candidates = self
            .router
            .candidates(stage, config)
            .await
            .map_err(|e| e.to_string())?;
        Ok((stage_input, candidates))
    }
}

fn completed_result(ctx: PipelineContext) -> PipelineRunResult {
    PipelineRunResult {
        metrics: ctx.execution_metrics(),
        output: ctx.output,
        errors: ctx.errors,
        success: true,
        error: None,
        cancelled: false,
        cancel_reason: None,
    }
}

// The caller-facing error is the stage's own failure message; the
// `RequiredStageFailed` wrapper appears in logs only.
fn aborted_result(ctx: PipelineContext, message: String) -> PipelineRunResult {
    PipelineRunResult {
        metrics: ctx.execution_metrics(),
        output: ctx.output,
        errors: ctx.errors,
        success: false,
        error: Some(message),
        cancelled: false,
        cancel_reason: None,
    }
}

fn cancelled_result(ctx: PipelineContext, reason: String) -> PipelineRunResult {
    let error = OrchestratorError::Cancelled {
        reason: reason.clone(),
    };
    PipelineRunResult {
        metrics: ctx.execution_metrics(),
        output: ctx.output,
        errors: ctx.errors,
        success: false,
        error: Some(error.to_string()),
        cancelled: true,
        cancel_reason: Some(reason),
    }
}
