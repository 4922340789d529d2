//! Mock service invokers for testing.

use crate::config::PipelineStage;
use crate::errors::InvokeError;
use crate::invoker::{Invocation, ServiceInvoker};
use crate::registry::ServiceEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Scripted response for one service descriptor.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed, returning the stage input as output.
    Echo,
    /// Succeed with a fixed payload.
    Success(Value),
    /// Succeed with a fixed payload and model attribution.
    SuccessWithModel(Value, String),
    /// Fail with a provider error.
    Error(String),
    /// Sleep for the given milliseconds, then succeed.
    SlowSuccess(Value, u64),
}

/// A mock invoker that records calls and returns scripted responses.
///
/// Responses are keyed by stage id first, then by
/// `{provider_id}/{service_name}`; calls matching neither use the fallback
/// response.
#[derive(Debug)]
pub struct MockInvoker {
    stage_responses: Mutex<HashMap<String, MockResponse>>,
    responses: Mutex<HashMap<String, MockResponse>>,
    fallback: MockResponse,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockInvoker {
    /// Creates an invoker whose fallback echoes the stage input.
    #[must_use]
    pub fn echoing() -> Self {
        Self {
            stage_responses: Mutex::new(HashMap::new()),
            responses: Mutex::new(HashMap::new()),
            fallback: MockResponse::Echo,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates an invoker whose fallback fails every call.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            stage_responses: Mutex::new(HashMap::new()),
            responses: Mutex::new(HashMap::new()),
            fallback: MockResponse::Error(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a response for one service descriptor.
    #[must_use]
    pub fn with_response(self, descriptor: impl Into<String>, response: MockResponse) -> Self {
        self.responses.lock().insert(descriptor.into(), response);
        self
    }

    /// Scripts a response for one stage id, regardless of service.
    #[must_use]
    pub fn with_stage_response(self, stage_id: impl Into<String>, response: MockResponse) -> Self {
        self.stage_responses
            .lock()
            .insert(stage_id.into(), response);
        self
    }

    /// Returns the descriptors invoked, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(_, descriptor)| descriptor.clone())
            .collect()
    }

    /// Returns the stage ids invoked, in call order.
    #[must_use]
    pub fn invoked_stages(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(stage, _)| stage.clone())
            .collect()
    }
}

#[async_trait]
impl ServiceInvoker for MockInvoker {
    async fn invoke(
        &self,
        stage: &PipelineStage,
        input: &Value,
        service: &ServiceEntry,
    ) -> Result<Invocation, InvokeError> {
        let descriptor = service.descriptor();
        self.calls
            .lock()
            .push((stage.id.clone(), descriptor.clone()));

        let by_stage = self.stage_responses.lock().get(&stage.id).cloned();
        let response = match by_stage {
            Some(response) => response,
            None => self
                .responses
                .lock()
                .get(&descriptor)
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()),
        };

        match response {
            MockResponse::Echo => Ok(Invocation::new(input.clone())),
            MockResponse::Success(value) => Ok(Invocation::new(value)),
            MockResponse::SuccessWithModel(value, model) => {
                Ok(Invocation::new(value).with_model(model))
            }
            MockResponse::Error(message) => Err(InvokeError::provider(descriptor, message)),
            MockResponse::SlowSuccess(value, delay_ms) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Invocation::new(value))
            }
        }
    }
}
