//! The service invocation seam.
//!
//! Concrete provider adapters (text, image, video, audio generation) live
//! outside this crate and implement [`ServiceInvoker`]. The engine treats
//! their outputs as opaque payloads keyed by stage id.

use crate::config::PipelineStage;
use crate::errors::InvokeError;
use crate::registry::ServiceEntry;
use async_trait::async_trait;
use serde_json::Value;

/// The result of one service invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The opaque output payload.
    pub output: Value,
    /// The concrete model the adapter used, when it reports one.
    pub model: Option<String>,
}

impl Invocation {
    /// Creates an invocation result with no model attribution.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            model: None,
        }
    }

    /// Sets the model attribution.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Executes a stage against one backend service.
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    /// Invokes `service` with the stage's resolved input.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider rejects the request or cannot be
    /// reached. The stage executor converts errors into fallback attempts.
    async fn invoke(
        &self,
        stage: &PipelineStage,
        input: &Value,
        service: &ServiceEntry,
    ) -> Result<Invocation, InvokeError>;
}
