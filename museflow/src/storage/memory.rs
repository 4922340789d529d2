//! In-memory storage backed by per-entity concurrent maps.
//!
//! Each entity collection owns its map and generates its own UUIDs; there
//! is no identity shared across entity types.

use super::Storage;
use crate::config::{
    NewPipelineConfiguration, PipelineConfiguration, PipelineConfigurationUpdate, ServiceType,
};
use crate::errors::StorageError;
use crate::execution::{ExecutionStatus, ExecutionUpdate, PipelineExecution};
use crate::registry::{HealthStatus, NewServiceEntry, PerformanceMetrics, ServiceEntry};
use crate::utils::{generate_uuid, now_utc};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// In-memory [`Storage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    configurations: DashMap<Uuid, PipelineConfiguration>,
    services: DashMap<Uuid, ServiceEntry>,
    executions: DashMap<Uuid, PipelineExecution>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the default flag on every configuration except `keep`.
    fn clear_other_defaults(&self, keep: Uuid) {
        for mut entry in self.configurations.iter_mut() {
            if entry.id != keep && entry.is_default {
                entry.is_default = false;
                entry.updated_at = now_utc();
            }
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_pipeline_configuration(
        &self,
        new: NewPipelineConfiguration,
    ) -> Result<PipelineConfiguration, StorageError> {
        new.validate()?;

        let now = now_utc();
        let config = PipelineConfiguration {
            id: generate_uuid(),
            name: new.name,
            description: new.description,
            is_default: new.is_default,
            is_active: new.is_active,
            owning_user_id: new.owning_user_id,
            stages: new.stages,
            routing_rules: new.routing_rules,
            fallback_config: new.fallback_config,
            created_at: now,
            updated_at: now,
        };

        if config.is_default {
            self.clear_other_defaults(config.id);
        }
        self.configurations.insert(config.id, config.clone());
        Ok(config)
    }

    async fn get_pipeline_configuration(
        &self,
        id: Uuid,
    ) -> Result<Option<PipelineConfiguration>, StorageError> {
        Ok(self.configurations.get(&id).map(|c| c.clone()))
    }

    async fn list_pipeline_configurations(
        &self,
    ) -> Result<Vec<PipelineConfiguration>, StorageError> {
        Ok(self
            .configurations
            .iter()
            .map(|c| c.clone())
            .collect())
    }

    async fn update_pipeline_configuration(
        &self,
        id: Uuid,
        update: PipelineConfigurationUpdate,
    ) -> Result<Option<PipelineConfiguration>, StorageError> {
        let Some(current) = self.configurations.get(&id).map(|c| c.clone()) else {
            return Ok(None);
        };

        let mut merged = current;
        update.apply_to(&mut merged);
        merged.validate()?;
        merged.updated_at = now_utc();

        if merged.is_default {
            self.clear_other_defaults(id);
        }
        self.configurations.insert(id, merged.clone());
        Ok(Some(merged))
    }

    async fn delete_pipeline_configuration(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.configurations.remove(&id).is_some())
    }

    async fn get_default_pipeline_configuration(
        &self,
    ) -> Result<Option<PipelineConfiguration>, StorageError> {
        Ok(self
            .configurations
            .iter()
            .find(|c| c.is_default && c.is_active)
            .map(|c| c.clone()))
    }

    async fn register_service(&self, new: NewServiceEntry) -> Result<ServiceEntry, StorageError> {
        let entry = ServiceEntry {
            id: generate_uuid(),
            provider_id: new.provider_id,
            service_name: new.service_name,
            service_type: new.service_type,
            is_active: new.is_active,
            priority: new.priority,
            capabilities: new.capabilities,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            performance_metrics: None,
        };
        self.services.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceEntry>, StorageError> {
        Ok(self.services.get(&id).map(|s| s.clone()))
    }

    async fn list_services(&self) -> Result<Vec<ServiceEntry>, StorageError> {
        Ok(self.services.iter().map(|s| s.clone()).collect())
    }

    async fn get_services_by_type(
        &self,
        service_type: ServiceType,
    ) -> Result<Vec<ServiceEntry>, StorageError> {
        Ok(self
            .services
            .iter()
            .filter(|s| s.is_active && s.service_type == service_type)
            .map(|s| s.clone())
            .collect())
    }

    async fn update_service_health(
        &self,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<Option<ServiceEntry>, StorageError> {
        let Some(mut entry) = self.services.get_mut(&id) else {
            return Ok(None);
        };
        entry.health_status = status;
        entry.last_health_check = Some(now_utc());
        Ok(Some(entry.clone()))
    }

    async fn record_service_result(
        &self,
        id: Uuid,
        duration_ms: f64,
        success: bool,
    ) -> Result<(), StorageError> {
        if let Some(mut entry) = self.services.get_mut(&id) {
            entry
                .performance_metrics
                .get_or_insert_with(PerformanceMetrics::default)
                .record(duration_ms, success);
        }
        Ok(())
    }

    async fn deactivate_service(&self, id: Uuid) -> Result<bool, StorageError> {
        let Some(mut entry) = self.services.get_mut(&id) else {
            return Ok(false);
        };
        entry.is_active = false;
        Ok(true)
    }

    async fn create_pipeline_execution(
        &self,
        pipeline_id: Uuid,
        input: Value,
    ) -> Result<PipelineExecution, StorageError> {
        let execution = PipelineExecution {
            id: generate_uuid(),
            pipeline_id,
            status: ExecutionStatus::Pending,
            input_data: input,
            output_data: None,
            error: None,
            execution_metrics: None,
            started_at: now_utc(),
            completed_at: None,
        };
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_pipeline_execution(
        &self,
        id: Uuid,
    ) -> Result<Option<PipelineExecution>, StorageError> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn update_pipeline_execution(
        &self,
        id: Uuid,
        update: ExecutionUpdate,
    ) -> Result<Option<PipelineExecution>, StorageError> {
        let Some(mut execution) = self.executions.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(status) = update.status {
            execution.status = status;
        }
        if let Some(output_data) = update.output_data {
            execution.output_data = Some(output_data);
        }
        if let Some(error) = update.error {
            execution.error = Some(error);
        }
        if let Some(metrics) = update.execution_metrics {
            execution.execution_metrics = Some(metrics);
        }
        if let Some(completed_at) = update.completed_at {
            execution.completed_at = Some(completed_at);
        }
        Ok(Some(execution.clone()))
    }
}
