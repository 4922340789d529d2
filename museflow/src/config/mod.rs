//! Pipeline configuration models.
//!
//! This module provides:
//! - Stage definitions with input wiring and fallback strategies
//! - Pipeline configurations with routing rules
//! - Save-time validation of stage references and weights

mod pipeline;
mod stage;

pub use pipeline::{
    FallbackConfig, NewPipelineConfiguration, PipelineConfiguration,
    PipelineConfigurationUpdate, RoutingRules, SelectionWeights, SYSTEM_OWNER,
};
pub use stage::{
    FallbackKind, FallbackStrategy, PipelineStage, ServiceType, StageInputSpec,
    StageOutputSpec, StageRetryConfig,
};
