//! Pipeline configuration records and save-time validation.

use super::stage::{
    FallbackStrategy, PipelineStage, ServiceType, StageInputSpec, StageOutputSpec,
    StageRetryConfig,
};
use crate::errors::ConfigValidationError;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Owner sentinel for system-provided default configurations.
pub const SYSTEM_OWNER: &str = "system";

/// Selection criteria weights for one service type. Each weight is in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectionWeights {
    /// Weight on output quality.
    pub quality: f64,
    /// Weight on response speed.
    pub speed: f64,
    /// Weight on cost.
    pub cost: f64,
}

impl SelectionWeights {
    /// Creates new selection weights.
    #[must_use]
    pub fn new(quality: f64, speed: f64, cost: f64) -> Self {
        Self {
            quality,
            speed,
            cost,
        }
    }

    fn in_range(self) -> bool {
        [self.quality, self.speed, self.cost]
            .iter()
            .all(|w| (0.0..=1.0).contains(w))
    }
}

/// Per-service-type routing preferences for a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRules {
    /// Preferred provider ids per service type, in priority order.
    #[serde(default)]
    pub preferred_providers: HashMap<ServiceType, Vec<String>>,
    /// Selection criteria weights per service type.
    #[serde(default)]
    pub selection_weights: HashMap<ServiceType, SelectionWeights>,
}

impl RoutingRules {
    /// Creates empty routing rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the preferred providers for a service type.
    #[must_use]
    pub fn with_preferred(
        mut self,
        service_type: ServiceType,
        providers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.preferred_providers
            .insert(service_type, providers.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the selection weights for a service type.
    #[must_use]
    pub fn with_weights(mut self, service_type: ServiceType, weights: SelectionWeights) -> Self {
        self.selection_weights.insert(service_type, weights);
        self
    }

    /// Returns the preferred provider list for a service type, if any.
    #[must_use]
    pub fn preferred_for(&self, service_type: ServiceType) -> Option<&[String]> {
        self.preferred_providers
            .get(&service_type)
            .map(Vec::as_slice)
    }
}

/// Pipeline-wide fallback defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Default attempt budget for stages without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_max_attempts: Option<u32>,
    /// Acceptable fallback provider ids per service type.
    #[serde(default)]
    pub fallback_providers: HashMap<ServiceType, Vec<String>>,
}

impl FallbackConfig {
    /// Creates an empty fallback config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the global attempt budget.
    #[must_use]
    pub fn with_global_max_attempts(mut self, attempts: u32) -> Self {
        self.global_max_attempts = Some(attempts);
        self
    }

    /// Sets the fallback providers for a service type.
    #[must_use]
    pub fn with_fallback_providers(
        mut self,
        service_type: ServiceType,
        providers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.fallback_providers
            .insert(service_type, providers.into_iter().map(Into::into).collect());
        self
    }
}

/// A persisted pipeline configuration.
///
/// Mutated only through the storage API, never by the executor. Edits take
/// effect for future executions only; a run resolves its configuration once
/// at entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    /// Configuration id.
    pub id: Uuid,
    /// Configuration name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Whether this is the default configuration. At most one active
    /// configuration holds this flag; setting a new default clears it on
    /// all others.
    pub is_default: bool,
    /// Whether the configuration is active.
    pub is_active: bool,
    /// Owning user, or [`SYSTEM_OWNER`] for system defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_user_id: Option<String>,
    /// Ordered stages; declaration order is execution order.
    pub stages: Vec<PipelineStage>,
    /// Routing preferences.
    #[serde(default)]
    pub routing_rules: RoutingRules,
    /// Fallback defaults.
    #[serde(default)]
    pub fallback_config: FallbackConfig,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

impl PipelineConfiguration {
    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Re-validates the configuration after a partial-field merge.
    ///
    /// # Errors
    ///
    /// Same conditions as [`NewPipelineConfiguration::validate`].
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }
        validate_stages(&self.stages)?;
        validate_weights(&self.routing_rules)?;
        Ok(())
    }
}

/// Payload for creating a pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPipelineConfiguration {
    /// Configuration name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Whether this configuration becomes the default.
    #[serde(default)]
    pub is_default: bool,
    /// Whether the configuration is active.
    pub is_active: bool,
    /// Owning user, or [`SYSTEM_OWNER`] for system defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_user_id: Option<String>,
    /// Ordered stages.
    pub stages: Vec<PipelineStage>,
    /// Routing preferences.
    #[serde(default)]
    pub routing_rules: RoutingRules,
    /// Fallback defaults.
    #[serde(default)]
    pub fallback_config: FallbackConfig,
}

impl NewPipelineConfiguration {
    /// Creates a new configuration payload with no stages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_default: false,
            is_active: true,
            owning_user_id: None,
            stages: Vec::new(),
            routing_rules: RoutingRules::new(),
            fallback_config: FallbackConfig::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks this configuration as the default.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Sets the owning user.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owning_user_id = Some(owner.into());
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the routing rules.
    #[must_use]
    pub fn with_routing_rules(mut self, rules: RoutingRules) -> Self {
        self.routing_rules = rules;
        self
    }

    /// Sets the fallback config.
    #[must_use]
    pub fn with_fallback_config(mut self, config: FallbackConfig) -> Self {
        self.fallback_config = config;
        self
    }

    /// Validates the configuration payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, a stage id repeats, an
    /// `input.from` reference does not name another stage in the pipeline,
    /// or a selection weight falls outside [0, 1].
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }
        validate_stages(&self.stages)?;
        validate_weights(&self.routing_rules)?;
        Ok(())
    }

    /// The system-owned default thought-to-visual pipeline.
    #[must_use]
    pub fn thought_to_visual_default() -> Self {
        Self::new("thought-to-visual")
            .with_description("Transforms a raw thought into imagery with motion and narration")
            .as_default()
            .with_owner(SYSTEM_OWNER)
            .with_stage(
                PipelineStage::new("expand_thought", ServiceType::TextGeneration)
                    .with_name("Expand thought")
                    .with_description("Expands the raw thought into a structured narrative")
                    .with_output(StageOutputSpec::new("text")),
            )
            .with_stage(
                PipelineStage::new("visual_brief", ServiceType::TextGeneration)
                    .with_name("Visual brief")
                    .with_description("Distills the narrative into an imagery prompt")
                    .with_input(StageInputSpec::from_stage("text", "expand_thought"))
                    .with_output(StageOutputSpec::new("text")),
            )
            .with_stage(
                PipelineStage::new("imagery", ServiceType::ImageGeneration)
                    .with_name("Imagery")
                    .with_input(StageInputSpec::from_stage("text", "visual_brief"))
                    .with_output(StageOutputSpec::new("image"))
                    .with_fallback(
                        FallbackStrategy::alternative_service(["stable-diffusion-xl"])
                            .with_max_attempts(3),
                    )
                    .with_retry(StageRetryConfig::new().with_initial_delay_ms(500)),
            )
            .with_stage(
                PipelineStage::new("motion", ServiceType::VideoGeneration)
                    .with_name("Motion")
                    .optional()
                    .with_input(StageInputSpec::from_stage("image", "imagery"))
                    .with_output(StageOutputSpec::new("video"))
                    .with_timeout_ms(120_000),
            )
            .with_stage(
                PipelineStage::new("narration", ServiceType::AudioGeneration)
                    .with_name("Narration")
                    .optional()
                    .with_input(StageInputSpec::from_stage("text", "expand_thought"))
                    .with_output(StageOutputSpec::new("audio")),
            )
            .with_fallback_config(
                FallbackConfig::new()
                    .with_global_max_attempts(2)
                    .with_fallback_providers(ServiceType::ImageGeneration, ["deepinfra"]),
            )
    }
}

/// Partial-field merge payload for updating a configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfigurationUpdate {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New default flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    /// New active flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// Replacement stage list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<PipelineStage>>,
    /// Replacement routing rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_rules: Option<RoutingRules>,
    /// Replacement fallback config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_config: Option<FallbackConfig>,
}

impl PipelineConfigurationUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the default flag.
    #[must_use]
    pub fn with_is_default(mut self, is_default: bool) -> Self {
        self.is_default = Some(is_default);
        self
    }

    /// Sets the active flag.
    #[must_use]
    pub fn with_is_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    /// Sets the replacement stages.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<PipelineStage>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Sets the replacement routing rules.
    #[must_use]
    pub fn with_routing_rules(mut self, rules: RoutingRules) -> Self {
        self.routing_rules = Some(rules);
        self
    }

    /// Applies this update onto an existing configuration, in place.
    ///
    /// The caller re-validates and stamps `updated_at`.
    pub fn apply_to(self, config: &mut PipelineConfiguration) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(description) = self.description {
            config.description = description;
        }
        if let Some(is_default) = self.is_default {
            config.is_default = is_default;
        }
        if let Some(is_active) = self.is_active {
            config.is_active = is_active;
        }
        if let Some(stages) = self.stages {
            config.stages = stages;
        }
        if let Some(rules) = self.routing_rules {
            config.routing_rules = rules;
        }
        if let Some(fallback) = self.fallback_config {
            config.fallback_config = fallback;
        }
    }
}

/// Validates stage ids and input references.
///
/// # Errors
///
/// Returns an error on duplicate stage ids or `from` references that do not
/// name another stage in the same pipeline.
pub fn validate_stages(stages: &[PipelineStage]) -> Result<(), ConfigValidationError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for stage in stages {
        if !seen.insert(&stage.id) {
            return Err(ConfigValidationError::new(format!(
                "Duplicate stage id '{}'",
                stage.id
            ))
            .with_stages(vec![stage.id.clone()]));
        }
    }

    for stage in stages {
        if let Some(from) = stage.input.as_ref().and_then(|i| i.from.as_deref()) {
            if from == stage.id {
                return Err(ConfigValidationError::new(format!(
                    "Stage '{}' cannot take input from itself",
                    stage.id
                ))
                .with_stages(vec![stage.id.clone()]));
            }
            if !seen.contains(from) {
                return Err(ConfigValidationError::new(format!(
                    "Stage '{}' references unknown input stage '{from}'",
                    stage.id
                ))
                .with_stages(vec![stage.id.clone(), from.to_string()]));
            }
        }
    }
    Ok(())
}

fn validate_weights(rules: &RoutingRules) -> Result<(), ConfigValidationError> {
    for (service_type, weights) in &rules.selection_weights {
        if !weights.in_range() {
            return Err(ConfigValidationError::new(format!(
                "Selection weights for {service_type} must be within [0, 1]"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_default_pipeline() {
        let config = NewPipelineConfiguration::thought_to_visual_default();
        assert!(config.validate().is_ok());
        assert!(config.is_default);
        assert_eq!(config.owning_user_id.as_deref(), Some(SYSTEM_OWNER));
        assert_eq!(config.stages.len(), 5);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = NewPipelineConfiguration::new("   ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_stage_ids() {
        let config = NewPipelineConfiguration::new("dup")
            .with_stage(PipelineStage::new("echo", ServiceType::TextGeneration))
            .with_stage(PipelineStage::new("echo", ServiceType::TextGeneration));

        let err = config.validate().unwrap_err();
        assert!(err.message.contains("Duplicate stage id"));
        assert_eq!(err.stages, vec!["echo".to_string()]);
    }

    #[test]
    fn test_validate_rejects_unknown_input_reference() {
        let config = NewPipelineConfiguration::new("dangling").with_stage(
            PipelineStage::new("render", ServiceType::ImageGeneration)
                .with_input(StageInputSpec::from_stage("text", "missing")),
        );

        let err = config.validate().unwrap_err();
        assert!(err.message.contains("unknown input stage 'missing'"));
    }

    #[test]
    fn test_validate_rejects_self_reference() {
        let config = NewPipelineConfiguration::new("selfref").with_stage(
            PipelineStage::new("echo", ServiceType::TextGeneration)
                .with_input(StageInputSpec::from_stage("text", "echo")),
        );

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_weights() {
        let config = NewPipelineConfiguration::new("weighted")
            .with_stage(PipelineStage::new("echo", ServiceType::TextGeneration))
            .with_routing_rules(RoutingRules::new().with_weights(
                ServiceType::TextGeneration,
                SelectionWeights::new(1.2, 0.5, 0.3),
            ));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_forward_reference_is_allowed() {
        // Input wiring is by reference, not order; a later stage may feed an
        // earlier-declared one as long as the id exists.
        let config = NewPipelineConfiguration::new("forward")
            .with_stage(
                PipelineStage::new("late", ServiceType::TextGeneration)
                    .with_input(StageInputSpec::from_stage("text", "early")),
            )
            .with_stage(PipelineStage::new("early", ServiceType::TextGeneration));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_update_partial_merge() {
        let mut config = PipelineConfiguration {
            id: Uuid::new_v4(),
            name: "before".to_string(),
            description: "old".to_string(),
            is_default: false,
            is_active: true,
            owning_user_id: None,
            stages: Vec::new(),
            routing_rules: RoutingRules::new(),
            fallback_config: FallbackConfig::new(),
            created_at: crate::utils::now_utc(),
            updated_at: crate::utils::now_utc(),
        };

        PipelineConfigurationUpdate::new()
            .with_name("after")
            .with_is_default(true)
            .apply_to(&mut config);

        assert_eq!(config.name, "after");
        assert!(config.is_default);
        assert_eq!(config.description, "old");
    }
}
