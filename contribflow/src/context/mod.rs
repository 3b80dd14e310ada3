//! Per-run execution context.
//!
//! This module provides:
//! - A namespaced data bag shared by the stages of one run
//! - The mutable execution context threaded through a pipeline
//! - Progress status reporting to external observers

mod bags;
mod execution;

pub use bags::ContextBag;
pub use execution::{percent, ExecutionContext, PipelineStatus, StatusObserver};
