//! # Museflow
//!
//! A pipeline orchestration engine that routes each stage of a
//! thought-to-visual transformation to one of several interchangeable AI
//! service backends.
//!
//! Museflow provides:
//!
//! - **Configurable pipelines**: ordered stages with input wiring,
//!   required/optional semantics, and per-stage fallback strategies
//! - **Health-aware routing**: candidate selection over a service registry
//!   with preferred-provider ordering and priorities
//! - **Fallback execution**: attempt budgets, per-invocation timeouts, and
//!   inter-attempt backoff
//! - **Lifecycle management**: persisted execution records with
//!   synchronous and fire-and-forget invocation, status polling, and
//!   cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use museflow::prelude::*;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let manager = ExecutionManager::new(storage.clone(), invoker);
//!
//! manager.initialize_pipeline_system().await?;
//! let outcome = manager
//!     .run_pipeline(None, serde_json::json!("a quiet forest"), RunOptions::sync())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod execution;
pub mod executor;
pub mod invoker;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod storage;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        FallbackConfig, FallbackKind, FallbackStrategy, NewPipelineConfiguration,
        PipelineConfiguration, PipelineConfigurationUpdate, PipelineStage, RoutingRules,
        SelectionWeights, ServiceType, StageInputSpec, StageRetryConfig,
    };
    pub use crate::context::PipelineContext;
    pub use crate::errors::{
        ConfigValidationError, InvokeError, OrchestratorError, StorageError,
    };
    pub use crate::execution::{
        ExecutionMetrics, ExecutionStatus, PipelineExecution, StageMetrics,
    };
    pub use crate::executor::{PipelineExecutor, StageExecution, StageExecutor};
    pub use crate::invoker::{Invocation, ServiceInvoker};
    pub use crate::lifecycle::{ExecutionManager, ExecutionStatusView, RunOptions, RunOutcome};
    pub use crate::registry::{HealthStatus, NewServiceEntry, PerformanceMetrics, ServiceEntry};
    pub use crate::routing::StageRouter;
    pub use crate::storage::{MemoryStorage, Storage};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
