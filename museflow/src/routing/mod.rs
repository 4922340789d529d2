//! Health-registry-backed service selection for stages.

use crate::config::{PipelineConfiguration, PipelineStage};
use crate::errors::OrchestratorError;
use crate::registry::ServiceEntry;
use crate::storage::Storage;
use std::sync::Arc;

/// Selects an ordered candidate list of services for a stage.
///
/// Selection is pure over current registry state; the router has no side
/// effects.
pub struct StageRouter {
    storage: Arc<dyn Storage>,
}

impl StageRouter {
    /// Creates a router over a storage collaborator.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Produces the ordered candidate list for a stage.
    ///
    /// An empty list means no active services of the stage's type exist;
    /// the caller treats that as a no-services-available failure.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the registry read fails.
    pub async fn candidates(
        &self,
        stage: &PipelineStage,
        config: &PipelineConfiguration,
    ) -> Result<Vec<ServiceEntry>, OrchestratorError> {
        let entries = self.storage.get_services_by_type(stage.service_type).await?;
        let preferred = config.routing_rules.preferred_for(stage.service_type);
        Ok(rank(entries, preferred))
    }
}

/// Orders candidate entries for attempt order.
///
/// With a non-empty preferred-provider list, entries whose provider appears
/// earlier in the list sort first (ties among preferred entries preserve
/// relative order); entries not in the list come after all preferred ones,
/// descending by priority. Without a preferred list, entries sort by
/// descending priority only.
#[must_use]
pub fn rank(mut entries: Vec<ServiceEntry>, preferred: Option<&[String]>) -> Vec<ServiceEntry> {
    match preferred {
        Some(list) if !list.is_empty() => {
            entries.sort_by_key(|entry| {
                list.iter()
                    .position(|p| p == &entry.provider_id)
                    .map_or_else(
                        || (1, 0, -i64::from(entry.priority)),
                        |position| (0, position, 0),
                    )
            });
        }
        _ => {
            entries.sort_by_key(|entry| -i64::from(entry.priority));
        }
    }
    entries
}
