//! Testing utilities for museflow pipelines.
//!
//! This module provides:
//! - A scripted mock service invoker
//! - Configuration and registry fixtures

mod fixtures;
mod mocks;

pub use fixtures::{echo_pipeline, register_text_service, single_stage_pipeline};
pub use mocks::{MockInvoker, MockResponse};
