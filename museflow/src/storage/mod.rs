//! The storage seam consumed by the orchestration core.
//!
//! Real deployments implement [`Storage`] over a database; the in-memory
//! implementation ships here for embedding and tests. Each operation is
//! individually atomic, which is what the concurrency model of the engine
//! assumes of its storage collaborator.

mod memory;

pub use memory::MemoryStorage;

use crate::config::{
    NewPipelineConfiguration, PipelineConfiguration, PipelineConfigurationUpdate, ServiceType,
};
use crate::errors::StorageError;
use crate::execution::{ExecutionUpdate, PipelineExecution};
use crate::registry::{HealthStatus, NewServiceEntry, ServiceEntry};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// CRUD and query operations over configurations, registry entries, and
/// execution records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates a pipeline configuration after save-time validation.
    ///
    /// Creating a configuration with `is_default` set clears the flag on
    /// every other configuration (last write wins).
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid payloads, or a backend error.
    async fn create_pipeline_configuration(
        &self,
        new: NewPipelineConfiguration,
    ) -> Result<PipelineConfiguration, StorageError>;

    /// Fetches a configuration by id.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn get_pipeline_configuration(
        &self,
        id: Uuid,
    ) -> Result<Option<PipelineConfiguration>, StorageError>;

    /// Lists all configurations.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn list_pipeline_configurations(
        &self,
    ) -> Result<Vec<PipelineConfiguration>, StorageError>;

    /// Applies a partial-field merge to a configuration.
    ///
    /// Setting `is_default` clears the flag on every other configuration.
    /// Returns `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the merged configuration is invalid,
    /// or a backend error.
    async fn update_pipeline_configuration(
        &self,
        id: Uuid,
        update: PipelineConfigurationUpdate,
    ) -> Result<Option<PipelineConfiguration>, StorageError>;

    /// Deletes a configuration entirely. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn delete_pipeline_configuration(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Fetches the single active default configuration, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn get_default_pipeline_configuration(
        &self,
    ) -> Result<Option<PipelineConfiguration>, StorageError>;

    /// Registers a backend service.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn register_service(&self, new: NewServiceEntry) -> Result<ServiceEntry, StorageError>;

    /// Fetches a service entry by id.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceEntry>, StorageError>;

    /// Lists all service entries, active or not.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn list_services(&self) -> Result<Vec<ServiceEntry>, StorageError>;

    /// Fetches the **active** service entries of one type.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn get_services_by_type(
        &self,
        service_type: ServiceType,
    ) -> Result<Vec<ServiceEntry>, StorageError>;

    /// Records an out-of-band health check result. Returns `None` when the
    /// id is unknown.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn update_service_health(
        &self,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<Option<ServiceEntry>, StorageError>;

    /// Folds one attempt outcome into a service's performance counters.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn record_service_result(
        &self,
        id: Uuid,
        duration_ms: f64,
        success: bool,
    ) -> Result<(), StorageError>;

    /// Deactivates a service entry. Entries are never deleted. Returns
    /// whether the id was known.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn deactivate_service(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Creates an execution record in `Pending` status.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn create_pipeline_execution(
        &self,
        pipeline_id: Uuid,
        input: Value,
    ) -> Result<PipelineExecution, StorageError>;

    /// Fetches an execution record by id.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn get_pipeline_execution(
        &self,
        id: Uuid,
    ) -> Result<Option<PipelineExecution>, StorageError>;

    /// Applies a status/result update to an execution record. Returns
    /// `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn update_pipeline_execution(
        &self,
        id: Uuid,
        update: ExecutionUpdate,
    ) -> Result<Option<PipelineExecution>, StorageError>;
}
