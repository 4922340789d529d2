//! Configuration and registry fixtures.

use crate::config::{NewPipelineConfiguration, PipelineStage, ServiceType};
use crate::errors::StorageError;
use crate::registry::{NewServiceEntry, ServiceEntry};
use crate::storage::Storage;

/// A single-stage pipeline around the given stage.
#[must_use]
pub fn single_stage_pipeline(name: &str, stage: PipelineStage) -> NewPipelineConfiguration {
    NewPipelineConfiguration::new(name).with_stage(stage)
}

/// A one-stage text-generation pipeline with a required "echo" stage.
#[must_use]
pub fn echo_pipeline() -> NewPipelineConfiguration {
    single_stage_pipeline(
        "echo",
        PipelineStage::new("echo", ServiceType::TextGeneration),
    )
}

/// Registers an active text-generation service.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn register_text_service(
    storage: &dyn Storage,
    provider: &str,
    name: &str,
    priority: i32,
) -> Result<ServiceEntry, StorageError> {
    storage
        .register_service(
            NewServiceEntry::new(provider, name, ServiceType::TextGeneration)
                .with_priority(priority),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_pipeline_shape() {
        let config = echo_pipeline();
        assert_eq!(config.stages.len(), 1);
        assert!(config.stages[0].required);
        assert_eq!(config.stages[0].service_type, ServiceType::TextGeneration);
        assert!(config.validate().is_ok());
    }
}
