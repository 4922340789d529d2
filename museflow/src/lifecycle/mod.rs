//! The execution lifecycle manager.
//!
//! Bridges the external API surface and the pipeline executor; owns
//! persisted execution records and the cancellation tokens of in-flight
//! runs.

use crate::cancellation::CancellationToken;
use crate::config::NewPipelineConfiguration;
use crate::errors::OrchestratorError;
use crate::execution::{ExecutionMetrics, ExecutionStatus, ExecutionUpdate};
use crate::executor::{PipelineExecutor, PipelineRunResult};
use crate::invoker::ServiceInvoker;
use crate::storage::Storage;
use crate::utils::now_utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Options for one `run_pipeline` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run inline and await the result instead of spawning a background
    /// task.
    pub force_sync: bool,
}

impl RunOptions {
    /// Default asynchronous options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous options.
    #[must_use]
    pub fn sync() -> Self {
        Self { force_sync: true }
    }
}

/// The immediate result of a `run_pipeline` call.
///
/// Synchronous runs carry either `result` or `error`, never both.
/// Asynchronous runs carry neither; callers poll
/// [`ExecutionManager::get_pipeline_execution_status`].
#[derive(Debug)]
pub struct RunOutcome {
    /// The created execution record id.
    pub execution_id: Uuid,
    /// Stage outputs keyed by stage id, for successful synchronous runs.
    pub result: Option<HashMap<String, Value>>,
    /// The failure message, for failed synchronous runs.
    pub error: Option<String>,
}

/// Snapshot of a persisted execution record.
#[derive(Debug, Clone)]
pub struct ExecutionStatusView {
    /// Current status.
    pub status: ExecutionStatus,
    /// Stage outputs, present once the run terminated.
    pub output: Option<HashMap<String, Value>>,
    /// Failure message, present when the run failed.
    pub error: Option<String>,
    /// Aggregated metrics, present once the run terminated.
    pub metrics: Option<ExecutionMetrics>,
}

/// Owns execution records and drives the pipeline executor.
pub struct ExecutionManager {
    storage: Arc<dyn Storage>,
    executor: Arc<PipelineExecutor>,
    running: Arc<DashMap<Uuid, Arc<CancellationToken>>>,
}

impl ExecutionManager {
    /// Creates a manager over the storage and invocation seams.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invoker: Arc<dyn ServiceInvoker>) -> Self {
        let executor = Arc::new(PipelineExecutor::new(storage.clone(), invoker));
        Self {
            storage,
            executor,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Ensures a default configuration exists. Idempotent.
    ///
    /// Returns whether a new default was created.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn initialize_pipeline_system(&self) -> Result<bool, OrchestratorError> {
        if self
            .storage
            .get_default_pipeline_configuration()
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let created = self
            .storage
            .create_pipeline_configuration(NewPipelineConfiguration::thought_to_visual_default())
            .await?;
        info!(config_id = %created.id, "Created default pipeline configuration");
        Ok(true)
    }

    /// Starts a pipeline run.
    ///
    /// Resolves the configuration (explicit id, else the active default),
    /// creates the execution record in `Pending`, writes `Running`
    /// immediately before the executor starts, and either awaits the run
    /// (`force_sync`) or spawns it in the background. Errors during a
    /// synchronous run are recorded on the execution and returned in the
    /// outcome's `error` field, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigurationNotFound`] when neither an
    /// explicit id nor an active default resolves, and storage errors from
    /// record creation.
    pub async fn run_pipeline(
        &self,
        config_id: Option<Uuid>,
        input: Value,
        options: RunOptions,
    ) -> Result<RunOutcome, OrchestratorError> {
        let config = match config_id {
            Some(id) => self
                .storage
                .get_pipeline_configuration(id)
                .await?
                .ok_or(OrchestratorError::ConfigurationNotFound { id: Some(id) })?,
            None => self
                .storage
                .get_default_pipeline_configuration()
                .await?
                .ok_or(OrchestratorError::ConfigurationNotFound { id: None })?,
        };

        let execution = self
            .storage
            .create_pipeline_execution(config.id, input.clone())
            .await?;
        let execution_id = execution.id;

        let token = Arc::new(CancellationToken::new());
        self.running.insert(execution_id, token.clone());

        if options.force_sync {
            self.mark_running(execution_id).await;
            let result = self
                .executor
                .run(&config, execution_id, input, &token)
                .await;
            self.running.remove(&execution_id);

            let outcome_result = result.success.then(|| result.output.clone());
            let outcome_error = result.error.clone();
            persist_terminal(self.storage.as_ref(), execution_id, result).await;

            return Ok(RunOutcome {
                execution_id,
                result: outcome_result,
                error: outcome_error,
            });
        }

        let storage = self.storage.clone();
        let executor = self.executor.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            if let Err(e) = storage
                .update_pipeline_execution(execution_id, ExecutionUpdate::running())
                .await
            {
                error!(execution_id = %execution_id, error = %e, "Failed to mark execution running");
            }
            let result = executor.run(&config, execution_id, input, &token).await;
            persist_terminal(storage.as_ref(), execution_id, result).await;
            running.remove(&execution_id);
        });

        Ok(RunOutcome {
            execution_id,
            result: None,
            error: None,
        })
    }

    /// Returns a snapshot of an execution record.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ExecutionNotFound`] for unknown ids,
    /// and storage errors.
    pub async fn get_pipeline_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<ExecutionStatusView, OrchestratorError> {
        let execution = self
            .storage
            .get_pipeline_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound { id: execution_id })?;

        Ok(ExecutionStatusView {
            status: execution.status,
            output: execution.output_data,
            error: execution.error,
            metrics: execution.execution_metrics,
        })
    }

    /// Cancels an in-flight run. Returns whether a live run was found.
    ///
    /// The run terminates as `Failed` with the cancellation reason once it
    /// observes the token.
    pub fn cancel_pipeline_execution(&self, execution_id: Uuid, reason: impl Into<String>) -> bool {
        match self.running.get(&execution_id) {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    async fn mark_running(&self, execution_id: Uuid) {
        if let Err(e) = self
            .storage
            .update_pipeline_execution(execution_id, ExecutionUpdate::running())
            .await
        {
            error!(execution_id = %execution_id, error = %e, "Failed to mark execution running");
        }
    }
}

/// Writes the terminal record for a finished run. Failures are logged,
/// never raised, so nothing escapes the background execution path.
async fn persist_terminal(storage: &dyn Storage, execution_id: Uuid, result: PipelineRunResult) {
    let update = if result.success {
        ExecutionUpdate::completed(result.output, result.metrics, now_utc())
    } else {
        ExecutionUpdate::failed(
            result
                .error
                .unwrap_or_else(|| "pipeline failed".to_string()),
            Some(result.output),
            Some(result.metrics),
            now_utc(),
        )
    };

    if let Err(e) = storage.update_pipeline_execution(execution_id, update).await {
        error!(execution_id = %execution_id, error = %e, "Failed to persist execution result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineStage, ServiceType};
    use crate::storage::MemoryStorage;
    use crate::testing::{echo_pipeline, register_text_service, MockInvoker, MockResponse};
    use std::time::Duration;

    fn manager(invoker: MockInvoker) -> (Arc<MemoryStorage>, ExecutionManager) {
        let storage = Arc::new(MemoryStorage::new());
        let manager = ExecutionManager::new(storage.clone(), Arc::new(invoker));
        (storage, manager)
    }

    async fn wait_for_terminal(manager: &ExecutionManager, id: Uuid) -> ExecutionStatusView {
        for _ in 0..200 {
            let view = manager.get_pipeline_execution_status(id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution did not terminate");
    }

    #[tokio::test]
    async fn test_sync_run_happy_path() {
        let (storage, manager) = manager(MockInvoker::echoing());
        let config = storage
            .create_pipeline_configuration(echo_pipeline())
            .await
            .unwrap();
        register_text_service(storage.as_ref(), "anthropic", "claude", 5)
            .await
            .unwrap();

        let outcome = manager
            .run_pipeline(
                Some(config.id),
                serde_json::json!("hello"),
                RunOptions::sync(),
            )
            .await
            .unwrap();

        assert!(outcome.error.is_none());
        let result = outcome.result.unwrap();
        assert_eq!(result.get("echo"), Some(&serde_json::json!("hello")));

        let view = manager
            .get_pipeline_execution_status(outcome.execution_id)
            .await
            .unwrap();
        assert_eq!(view.status, ExecutionStatus::Completed);
        assert_eq!(
            view.output.unwrap().get("echo"),
            Some(&serde_json::json!("hello"))
        );
        let metrics = view.metrics.unwrap();
        assert_eq!(metrics.services_used.get("anthropic/claude"), Some(&1));
        assert_eq!(metrics.stage_results.get("echo").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_sync_run_no_services_failure() {
        let (storage, manager) = manager(MockInvoker::echoing());
        let config = storage
            .create_pipeline_configuration(echo_pipeline())
            .await
            .unwrap();

        let outcome = manager
            .run_pipeline(
                Some(config.id),
                serde_json::json!("hello"),
                RunOptions::sync(),
            )
            .await
            .unwrap();

        assert!(outcome.result.is_none());
        assert_eq!(
            outcome.error.as_deref(),
            Some("No services available for stage type: text_generation")
        );

        let view = manager
            .get_pipeline_execution_status(outcome.execution_id)
            .await
            .unwrap();
        assert_eq!(view.status, ExecutionStatus::Failed);
        assert_eq!(
            view.error.as_deref(),
            Some("No services available for stage type: text_generation")
        );
    }

    #[tokio::test]
    async fn test_unknown_configuration_id_fails_fast() {
        let (_storage, manager) = manager(MockInvoker::echoing());

        let err = manager
            .run_pipeline(
                Some(Uuid::new_v4()),
                serde_json::json!("hello"),
                RunOptions::sync(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigurationNotFound { id: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_missing_default_fails_fast() {
        let (_storage, manager) = manager(MockInvoker::echoing());

        let err = manager
            .run_pipeline(None, serde_json::json!("hello"), RunOptions::sync())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigurationNotFound { id: None }
        ));
    }

    #[tokio::test]
    async fn test_status_unknown_execution() {
        let (_storage, manager) = manager(MockInvoker::echoing());

        let err = manager
            .get_pipeline_execution_status(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ExecutionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (storage, manager) = manager(MockInvoker::echoing());

        assert!(manager.initialize_pipeline_system().await.unwrap());
        assert!(!manager.initialize_pipeline_system().await.unwrap());

        let default = storage
            .get_default_pipeline_configuration()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(default.name, "thought-to-visual");
        assert_eq!(default.owning_user_id.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_async_run_returns_immediately_and_settles() {
        let (storage, manager) = manager(MockInvoker::echoing());
        storage
            .create_pipeline_configuration(echo_pipeline().as_default())
            .await
            .unwrap();
        register_text_service(storage.as_ref(), "anthropic", "claude", 5)
            .await
            .unwrap();

        let outcome = manager
            .run_pipeline(None, serde_json::json!("hello"), RunOptions::new())
            .await
            .unwrap();
        assert!(outcome.result.is_none());
        assert!(outcome.error.is_none());

        let view = wait_for_terminal(&manager, outcome.execution_id).await;
        assert_eq!(view.status, ExecutionStatus::Completed);
        assert_eq!(
            view.output.unwrap().get("echo"),
            Some(&serde_json::json!("hello"))
        );
    }

    #[tokio::test]
    async fn test_async_run_is_observable_as_running() {
        let (storage, manager) = manager(MockInvoker::echoing().with_response(
            "anthropic/claude",
            MockResponse::SlowSuccess(serde_json::json!("out"), 300),
        ));
        storage
            .create_pipeline_configuration(echo_pipeline().as_default())
            .await
            .unwrap();
        register_text_service(storage.as_ref(), "anthropic", "claude", 5)
            .await
            .unwrap();

        let outcome = manager
            .run_pipeline(None, serde_json::json!("hello"), RunOptions::new())
            .await
            .unwrap();

        // The first non-pending status must be Running, never a terminal
        // status reached without passing through it.
        let mut observed_running = false;
        for _ in 0..200 {
            let view = manager
                .get_pipeline_execution_status(outcome.execution_id)
                .await
                .unwrap();
            match view.status {
                ExecutionStatus::Running => {
                    observed_running = true;
                    break;
                }
                ExecutionStatus::Pending => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                status => panic!("terminal status {status:?} before running was observed"),
            }
        }
        assert!(observed_running);

        let view = wait_for_terminal(&manager, outcome.execution_id).await;
        assert_eq!(view.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_run() {
        let invoker = MockInvoker::echoing().with_response(
            "anthropic/claude",
            MockResponse::SlowSuccess(serde_json::json!("slow"), 300),
        );
        let (storage, manager) = manager(invoker);

        let config = storage
            .create_pipeline_configuration(
                echo_pipeline()
                    .with_stage(
                        PipelineStage::new("second", ServiceType::TextGeneration).optional(),
                    )
                    .as_default(),
            )
            .await
            .unwrap();
        register_text_service(storage.as_ref(), "anthropic", "claude", 5)
            .await
            .unwrap();

        let outcome = manager
            .run_pipeline(
                Some(config.id),
                serde_json::json!("hello"),
                RunOptions::new(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.cancel_pipeline_execution(outcome.execution_id, "operator stop"));

        let view = wait_for_terminal(&manager, outcome.execution_id).await;
        assert_eq!(view.status, ExecutionStatus::Failed);
        assert!(view.error.unwrap().contains("operator stop"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution_is_false() {
        let (_storage, manager) = manager(MockInvoker::echoing());
        assert!(!manager.cancel_pipeline_execution(Uuid::new_v4(), "nope"));
    }
}
