//! The stage executor: tries candidate services in order within an attempt
//! budget, enforcing per-invocation timeouts and inter-attempt backoff.

use super::backoff::delay_before_attempt;
use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfiguration, PipelineStage};
use crate::errors::OrchestratorError;
use crate::execution::StageMetrics;
use crate::invoker::ServiceInvoker;
use crate::registry::ServiceEntry;
use crate::storage::Storage;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The outcome of one stage's attempt loop.
///
/// The stage executor never returns an `Err`; all failure is carried in
/// this shape and the pipeline executor applies required-stage semantics.
#[derive(Debug, Clone)]
pub struct StageExecution {
    /// Whether any attempt succeeded.
    pub success: bool,
    /// The successful output, when `success`.
    pub output: Option<Value>,
    /// The failure message, when not `success`.
    pub error: Option<String>,
    /// `{provider_id}/{service_name}` of the service that succeeded.
    pub service_used: Option<String>,
    /// Attempt-loop metrics.
    pub metrics: StageMetrics,
}

impl StageExecution {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(output: Value, service_used: impl Into<String>, metrics: StageMetrics) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            service_used: Some(service_used.into()),
            metrics,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(error: impl Into<String>, metrics: StageMetrics) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            service_used: None,
            metrics,
        }
    }
}

/// Executes one stage against an ordered candidate list.
pub struct StageExecutor {
    invoker: Arc<dyn ServiceInvoker>,
    storage: Arc<dyn Storage>,
}

impl StageExecutor {
    /// Creates a stage executor.
    #[must_use]
    pub fn new(invoker: Arc<dyn ServiceInvoker>, storage: Arc<dyn Storage>) -> Self {
        Self { invoker, storage }
    }

    /// Runs the attempt loop for one stage.
    ///
    /// Attempts consume candidates in order ("try next service"); the
    /// budget is the stage's fallback `max_attempts`, else the pipeline's
    /// global default, else 1, and never exceeds the candidate count.
    /// Timeouts and cancellation each consume one attempt. Every attempt
    /// outcome is reported to the registry's performance counters,
    /// best-effort.
    pub async fn execute(
        &self,
        stage: &PipelineStage,
        input: &Value,
        config: &PipelineConfiguration,
        candidates: &[ServiceEntry],
        cancel: &CancellationToken,
    ) -> StageExecution {
        let start = Instant::now();

        if candidates.is_empty() {
            let error = OrchestratorError::NoServicesAvailable {
                service_type: stage.service_type,
            };
            return StageExecution::failed(error.to_string(), StageMetrics::default());
        }

        let budget = resolve_max_attempts(stage, config);
        let allowed = (budget as usize).min(candidates.len());
        let mut last_error: Option<String> = None;
        let mut attempts: u32 = 0;

        for (index, service) in candidates.iter().take(allowed).enumerate() {
            if cancel.is_cancelled() {
                let reason = cancel
                    .reason()
                    .unwrap_or_else(|| "cancellation requested".to_string());
                return StageExecution::failed(
                    format!("Pipeline cancelled: {reason}"),
                    StageMetrics {
                        duration_ms: elapsed_ms(start),
                        attempts,
                        ..StageMetrics::default()
                    },
                );
            }

            let attempt = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if let Some(retry) = &stage.retry_config {
                let delay = delay_before_attempt(attempt, retry);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            attempts = attempt;
            let descriptor = service.descriptor();
            let attempt_start = Instant::now();

            let outcome = match stage.timeout_ms {
                Some(timeout_ms) => {
                    match tokio::time::timeout(
                        Duration::from_millis(timeout_ms),
                        self.invoker.invoke(stage, input, service),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err(format!(
                            "Service {descriptor} timed out after {timeout_ms}ms"
                        )),
                    }
                }
                None => self
                    .invoker
                    .invoke(stage, input, service)
                    .await
                    .map_err(|e| e.to_string()),
            };

            let attempt_ms = elapsed_ms(attempt_start);
            if let Err(e) = self
                .storage
                .record_service_result(service.id, attempt_ms, outcome.is_ok())
                .await
            {
                warn!(service = %descriptor, error = %e, "Failed to record service result");
            }

            match outcome {
                Ok(invocation) => {
                    debug!(
                        stage = %stage.id,
                        service = %descriptor,
                        attempt,
                        duration_ms = attempt_ms,
                        "Stage attempt succeeded"
                    );
                    return StageExecution::succeeded(
                        invocation.output,
                        descriptor,
                        StageMetrics {
                            duration_ms: elapsed_ms(start),
                            attempts,
                            provider: Some(service.provider_id.clone()),
                            model: invocation.model,
                        },
                    );
                }
                Err(message) => {
                    warn!(
                        stage = %stage.id,
                        service = %descriptor,
                        attempt,
                        error = %message,
                        "Stage attempt failed, falling over"
                    );
                    last_error = Some(message);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            OrchestratorError::AllServicesFailed {
                stage: stage.id.clone(),
                attempts,
                last_error: "no attempts were made".to_string(),
            }
            .to_string()
        });

        StageExecution::failed(
            error,
            StageMetrics {
                duration_ms: elapsed_ms(start),
                attempts,
                ..StageMetrics::default()
            },
        )
    }
}

/// Resolves a stage's attempt budget.
#[must_use]
pub fn resolve_max_attempts(stage: &PipelineStage, config: &PipelineConfiguration) -> u32 {
    stage
        .fallback_strategy
        .as_ref()
        .and_then(|f| f.max_attempts)
        .or(config.fallback_config.global_max_attempts)
        .unwrap_or(1)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FallbackConfig, FallbackStrategy, NewPipelineConfiguration, ServiceType,
        StageRetryConfig,
    };
    use crate::registry::NewServiceEntry;
    use crate::storage::MemoryStorage;
    use crate::testing::{MockInvoker, MockResponse};

    async fn setup(
        stage: PipelineStage,
        fallback: FallbackConfig,
    ) -> (Arc<MemoryStorage>, PipelineConfiguration) {
        let storage = Arc::new(MemoryStorage::new());
        let config = storage
            .create_pipeline_configuration(
                NewPipelineConfiguration::new("test")
                    .with_stage(stage)
                    .with_fallback_config(fallback),
            )
            .await
            .unwrap();
        (storage, config)
    }

    async fn register(
        storage: &MemoryStorage,
        provider: &str,
        name: &str,
        priority: i32,
    ) -> ServiceEntry {
        storage
            .register_service(
                NewServiceEntry::new(provider, name, ServiceType::TextGeneration)
                    .with_priority(priority),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_candidates_is_no_services_failure() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let executor = StageExecutor::new(Arc::new(MockInvoker::echoing()), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[],
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("No services available for stage type: text_generation")
        );
        assert_eq!(result.metrics.attempts, 0);
    }

    #[tokio::test]
    async fn test_first_success_stops_the_loop() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(MockInvoker::echoing());
        let executor = StageExecutor::new(invoker.clone(), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.service_used.as_deref(), Some("anthropic/claude"));
        assert_eq!(result.metrics.attempts, 1);
        assert_eq!(result.metrics.provider.as_deref(), Some("anthropic"));
        assert_eq!(invoker.calls(), vec!["anthropic/claude".to_string()]);
    }

    #[tokio::test]
    async fn test_falls_over_to_next_candidate() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration)
            .with_fallback(FallbackStrategy::alternative_service(["large"]).with_max_attempts(2));
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(
            MockInvoker::echoing()
                .with_response("anthropic/claude", MockResponse::Error("overloaded".into())),
        );
        let executor = StageExecutor::new(invoker.clone(), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.service_used.as_deref(), Some("mistral/large"));
        assert_eq!(result.metrics.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_after_exact_budget() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration)
            .with_fallback(FallbackStrategy::alternative_service(["any"]).with_max_attempts(2));
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(MockInvoker::failing("always down"));
        let executor = StageExecutor::new(invoker.clone(), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.metrics.attempts, 2);
        assert_eq!(invoker.calls().len(), 2);
        assert!(result.error.unwrap().contains("always down"));
    }

    #[tokio::test]
    async fn test_budget_defaults_to_one_attempt() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(MockInvoker::failing("down"));
        let executor = StageExecutor::new(invoker.clone(), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(invoker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_global_max_attempts_applies_without_stage_override() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(
            stage.clone(),
            FallbackConfig::new().with_global_max_attempts(2),
        )
        .await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(MockInvoker::failing("down"));
        let executor = StageExecutor::new(invoker.clone(), storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(invoker.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_consumes_one_attempt_and_falls_over() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration)
            .with_timeout_ms(20)
            .with_fallback(FallbackStrategy::alternative_service(["large"]).with_max_attempts(2));
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;
        let b = register(&storage, "mistral", "large", 1).await;

        let invoker = Arc::new(MockInvoker::echoing().with_response(
            "anthropic/claude",
            MockResponse::SlowSuccess(serde_json::json!("late"), 200),
        ));
        let executor = StageExecutor::new(invoker, storage);

        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a, b],
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.service_used.as_deref(), Some("mistral/large"));
        assert_eq!(result.metrics.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_attempts() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;

        let invoker = Arc::new(MockInvoker::echoing());
        let executor = StageExecutor::new(invoker.clone(), storage);
        let cancel = CancellationToken::new();
        cancel.cancel("operator stop");

        let result = executor
            .execute(&stage, &serde_json::json!("hi"), &config, &[a], &cancel)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("operator stop"));
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_outcomes_feed_performance_counters() {
        let stage = PipelineStage::new("echo", ServiceType::TextGeneration);
        let (storage, config) = setup(stage.clone(), FallbackConfig::new()).await;
        let a = register(&storage, "anthropic", "claude", 5).await;

        let executor = StageExecutor::new(Arc::new(MockInvoker::echoing()), storage.clone());
        let result = executor
            .execute(
                &stage,
                &serde_json::json!("hi"),
                &config,
                &[a.clone()],
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success);

        let metrics = storage
            .get_service(a.id)
            .await
            .unwrap()
            .unwrap()
            .performance_metrics
            .unwrap();
        assert_eq!(metrics.total_calls, 1);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolve_max_attempts_precedence() {
        let storage_stage = PipelineStage::new("s", ServiceType::TextGeneration)
            .with_fallback(FallbackStrategy::none().with_max_attempts(4))
            .with_retry(StageRetryConfig::default());
        let plain_stage = PipelineStage::new("s", ServiceType::TextGeneration);

        let config = PipelineConfiguration {
            id: uuid::Uuid::new_v4(),
            name: "c".to_string(),
            description: String::new(),
            is_default: false,
            is_active: true,
            owning_user_id: None,
            stages: Vec::new(),
            routing_rules: crate::config::RoutingRules::new(),
            fallback_config: FallbackConfig::new().with_global_max_attempts(3),
            created_at: crate::utils::now_utc(),
            updated_at: crate::utils::now_utc(),
        };

        assert_eq!(resolve_max_attempts(&storage_stage, &config), 4);
        assert_eq!(resolve_max_attempts(&plain_stage, &config), 3);

        let mut no_global = config;
        no_global.fallback_config = FallbackConfig::new();
        assert_eq!(resolve_max_attempts(&plain_stage, &no_global), 1);
    }
}
