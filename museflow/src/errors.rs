//! Error types for the museflow orchestration engine.
//!
//! The taxonomy separates caller-facing validation failures
//! (configuration/execution lookups) from stage-local failures, which the
//! pipeline executor converts into context error entries and escalates only
//! for required stages.

use crate::config::ServiceType;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No pipeline configuration could be resolved for a run.
    #[error("Pipeline configuration not found")]
    ConfigurationNotFound {
        /// The requested configuration id, if one was given.
        id: Option<Uuid>,
    },

    /// A status lookup referenced an unknown execution id.
    #[error("Pipeline execution not found: {id}")]
    ExecutionNotFound {
        /// The unknown execution id.
        id: Uuid,
    },

    /// A stage's `from` reference produced no output and no default was declared.
    #[error("Unresolved input for stage '{stage}': no output from '{from}' and no default declared")]
    StageInputUnresolved {
        /// The stage whose input could not be resolved.
        stage: String,
        /// The referenced upstream stage id.
        from: String,
    },

    /// The router returned zero candidates for a stage's service type.
    #[error("No services available for stage type: {service_type}")]
    NoServicesAvailable {
        /// The service type with no active registry entries.
        service_type: ServiceType,
    },

    /// Every attempted service for a stage failed within the attempt budget.
    #[error("All services failed for stage '{stage}' after {attempts} attempts: {last_error}")]
    AllServicesFailed {
        /// The failing stage id.
        stage: String,
        /// Number of attempts consumed.
        attempts: u32,
        /// The last error encountered.
        last_error: String,
    },

    /// A required stage exhausted its attempts; fatal to the whole execution.
    #[error("Required stage '{stage}' failed: {message}")]
    RequiredStageFailed {
        /// The failing stage id.
        stage: String,
        /// The underlying failure message.
        message: String,
    },

    /// A configuration failed save-time validation.
    #[error("{0}")]
    Validation(#[from] ConfigValidationError),

    /// A storage collaborator failure.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// The execution was cancelled.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// Error raised when a pipeline configuration fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigValidationError {
    /// The error message.
    pub message: String,
    /// The stage ids involved in the error.
    pub stages: Vec<String>,
}

impl ConfigValidationError {
    /// Creates a new configuration validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Errors surfaced by storage collaborators.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The storage backend rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A record failed save-time validation.
    #[error("{0}")]
    Validation(#[from] ConfigValidationError),
}

/// Errors surfaced by service invocation adapters.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The provider returned an error response.
    #[error("Provider error from {service}: {message}")]
    Provider {
        /// The `{provider_id}/{service_name}` descriptor.
        service: String,
        /// The provider's error message.
        message: String,
    },

    /// The service could not be reached.
    #[error("Service unavailable: {service}")]
    Unavailable {
        /// The `{provider_id}/{service_name}` descriptor.
        service: String,
    },
}

impl InvokeError {
    /// Creates a provider error.
    #[must_use]
    pub fn provider(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(service: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
        }
    }
}
