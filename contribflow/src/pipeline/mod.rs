//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipeline definitions with strictly ordered stages
//! - A validating pipeline builder
//! - Retry helpers for transient collaborator failures

mod builder;
mod retry;
mod runner;

pub use builder::PipelineBuilder;
pub use retry::{
    should_retry, with_retry, with_retry_if, BackoffStrategy, JitterStrategy, RetryConfig,
    RetryDecision, RetryState,
};
pub use runner::{Pipeline, RunSummary};
