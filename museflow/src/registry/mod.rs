//! Service registry entries.
//!
//! Registry entries describe the backend services a stage can be routed to.
//! They are created by registration, mutated by out-of-band health checks
//! and by attempt outcomes reported from the stage executor, and never
//! deleted, only deactivated.

use crate::config::ServiceType;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No health check has run yet.
    #[default]
    Unknown,
    /// Service is healthy.
    Healthy,
    /// Service is responding but degraded.
    Degraded,
    /// Service is failing.
    Unhealthy,
}

/// Rolling performance counters for a service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Average response time across recorded calls, in milliseconds.
    pub avg_response_time_ms: f64,
    /// Fraction of recorded calls that succeeded, in [0, 1].
    pub success_rate: f64,
    /// Total recorded calls.
    pub total_calls: u64,
}

impl PerformanceMetrics {
    /// Folds one attempt outcome into the rolling counters.
    pub fn record(&mut self, duration_ms: f64, success: bool) {
        let prior = self.total_calls as f64;
        self.total_calls += 1;
        let count = self.total_calls as f64;

        self.avg_response_time_ms = (self.avg_response_time_ms * prior + duration_ms) / count;
        let successes = self.success_rate * prior + f64::from(u8::from(success));
        self.success_rate = successes / count;
    }
}

/// A registered backend service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Registry entry id.
    pub id: Uuid,
    /// Provider id (e.g. "anthropic", "runway").
    pub provider_id: String,
    /// Service name within the provider.
    pub service_name: String,
    /// The service type used for routing.
    pub service_type: ServiceType,
    /// Whether the service is active. Inactive entries are never routed to.
    pub is_active: bool,
    /// Routing priority; higher is preferred.
    pub priority: i32,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Last observed health.
    #[serde(default)]
    pub health_status: HealthStatus,
    /// When the last health check ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<Timestamp>,
    /// Rolling performance counters, absent until the first recorded call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
}

impl ServiceEntry {
    /// Returns the `{provider_id}/{service_name}` descriptor used in
    /// metrics and error messages.
    #[must_use]
    pub fn descriptor(&self) -> String {
        format!("{}/{}", self.provider_id, self.service_name)
    }
}

/// Payload for registering a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServiceEntry {
    /// Provider id.
    pub provider_id: String,
    /// Service name within the provider.
    pub service_name: String,
    /// The service type used for routing.
    pub service_type: ServiceType,
    /// Whether the service starts active.
    pub is_active: bool,
    /// Routing priority; higher is preferred.
    pub priority: i32,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl NewServiceEntry {
    /// Creates a new registration payload.
    #[must_use]
    pub fn new(
        provider_id: impl Into<String>,
        service_name: impl Into<String>,
        service_type: ServiceType,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            service_name: service_name.into(),
            service_type,
            is_active: true,
            priority: 0,
            capabilities: Vec::new(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a capability tag.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Marks the service inactive at registration.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}
