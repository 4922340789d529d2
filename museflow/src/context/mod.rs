//! The mutable working state of one pipeline execution.

use crate::config::PipelineStage;
use crate::errors::OrchestratorError;
use crate::execution::{ExecutionMetrics, StageErrorRecord, StageMetrics};
use crate::utils::{iso_timestamp, now_utc, Timestamp};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Ephemeral per-run context.
///
/// Exclusively owned and mutated by the pipeline executor for one run;
/// never shared across concurrent executions. `output` grows monotonically
/// as stages complete; `errors` holds entries only for stages that failed.
#[derive(Debug)]
pub struct PipelineContext {
    /// The configuration being executed.
    pub pipeline_id: Uuid,
    /// The owning execution record.
    pub execution_id: Uuid,
    /// The pipeline's original input.
    pub input: Value,
    /// Stage outputs keyed by stage id.
    pub output: HashMap<String, Value>,
    /// Per-stage metrics keyed by stage id.
    pub stage_results: HashMap<String, StageMetrics>,
    /// Invocation tally keyed by `{provider_id}/{service_name}`.
    pub services_used: HashMap<String, u32>,
    /// Error entries for failed stages.
    pub errors: HashMap<String, StageErrorRecord>,
    /// The stage currently being processed, for observability.
    pub current_stage: Option<String>,
    started: Instant,
    started_at: Timestamp,
}

impl PipelineContext {
    /// Creates a fresh context for one run.
    #[must_use]
    pub fn new(pipeline_id: Uuid, execution_id: Uuid, input: Value) -> Self {
        Self {
            pipeline_id,
            execution_id,
            input,
            output: HashMap::new(),
            stage_results: HashMap::new(),
            services_used: HashMap::new(),
            errors: HashMap::new(),
            current_stage: None,
            started: Instant::now(),
            started_at: now_utc(),
        }
    }

    /// Resolves a stage's input per its wiring.
    ///
    /// No `input` spec, or a spec without `from`, yields the pipeline's
    /// original input. A `from` reference yields that stage's output, the
    /// declared default when the output is missing, and an error when
    /// neither is available.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::StageInputUnresolved`] when the
    /// referenced output is missing and no default is declared.
    pub fn resolve_input(&self, stage: &PipelineStage) -> Result<Value, OrchestratorError> {
        let Some(spec) = &stage.input else {
            return Ok(self.input.clone());
        };
        let Some(from) = &spec.from else {
            return Ok(self.input.clone());
        };

        if let Some(output) = self.output.get(from) {
            return Ok(output.clone());
        }
        if let Some(default) = &spec.default {
            return Ok(default.clone());
        }
        Err(OrchestratorError::StageInputUnresolved {
            stage: stage.id.clone(),
            from: from.clone(),
        })
    }

    /// Records a successful stage.
    pub fn record_success(
        &mut self,
        stage_id: &str,
        output: Value,
        metrics: StageMetrics,
        service_used: &str,
    ) {
        self.output.insert(stage_id.to_string(), output);
        self.stage_results.insert(stage_id.to_string(), metrics);
        *self
            .services_used
            .entry(service_used.to_string())
            .or_insert(0) += 1;
    }

    /// Records a failed stage.
    pub fn record_failure(&mut self, stage_id: &str, message: impl Into<String>, metrics: StageMetrics) {
        self.stage_results.insert(stage_id.to_string(), metrics);
        self.errors.insert(
            stage_id.to_string(),
            StageErrorRecord {
                message: message.into(),
                timestamp: iso_timestamp(),
            },
        );
    }

    /// Milliseconds since the run started.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Snapshots aggregated metrics, stamping the end time.
    #[must_use]
    pub fn execution_metrics(&self) -> ExecutionMetrics {
        ExecutionMetrics {
            total_duration_ms: self.elapsed_ms(),
            stage_results: self.stage_results.clone(),
            services_used: self.services_used.clone(),
            started_at: self.started_at,
            finished_at: now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineStage, ServiceType, StageInputSpec};

    fn ctx() -> PipelineContext {
        PipelineContext::new(Uuid::new_v4(), Uuid::new_v4(), serde_json::json!("hello"))
    }

    #[test]
    fn test_resolve_input_direct() {
        let ctx = ctx();
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let input = ctx.resolve_input(&stage).unwrap();
        assert_eq!(input, serde_json::json!("hello"));
    }

    #[test]
    fn test_resolve_input_from_reference() {
        let mut ctx = ctx();
        ctx.output
            .insert("s1".to_string(), serde_json::json!({"story": "once"}));

        let stage = PipelineStage::new("s2", ServiceType::TextGeneration)
            .with_input(StageInputSpec::from_stage("text", "s1"));

        let input = ctx.resolve_input(&stage).unwrap();
        assert_eq!(input, serde_json::json!({"story": "once"}));
    }

    #[test]
    fn test_resolve_input_default_fallback() {
        let ctx = ctx();
        let stage = PipelineStage::new("s2", ServiceType::TextGeneration).with_input(
            StageInputSpec::from_stage("text", "missing-stage")
                .with_default(serde_json::json!("D")),
        );

        let input = ctx.resolve_input(&stage).unwrap();
        assert_eq!(input, serde_json::json!("D"));
    }

    #[test]
    fn test_resolve_input_missing_without_default() {
        let ctx = ctx();
        let stage = PipelineStage::new("s2", ServiceType::TextGeneration)
            .with_input(StageInputSpec::from_stage("text", "missing-stage"));

        let err = ctx.resolve_input(&stage).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StageInputUnresolved { ref stage, ref from }
                if stage == "s2" && from == "missing-stage"
        ));
    }

    #[test]
    fn test_record_success_tallies_service() {
        let mut ctx = ctx();
        ctx.record_success(
            "s1",
            serde_json::json!("out"),
            StageMetrics::default(),
            "anthropic/claude",
        );
        ctx.record_success(
            "s2",
            serde_json::json!("out2"),
            StageMetrics::default(),
            "anthropic/claude",
        );

        assert_eq!(ctx.services_used.get("anthropic/claude"), Some(&2));
        assert_eq!(ctx.output.len(), 2);
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_record_failure_keeps_output_absent() {
        let mut ctx = ctx();
        ctx.record_failure("s1", "boom", StageMetrics::default());

        assert!(!ctx.output.contains_key("s1"));
        assert_eq!(ctx.errors.get("s1").unwrap().message, "boom");
    }
}
