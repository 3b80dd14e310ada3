//! Turning a pipeline type into a recorded run.
//!
//! [`PipelineRegistry`] maps each [`crate::core::PipelineType`] to a typed
//! factory, [`PipelineExecutor`] runs a freshly built pipeline against a fresh
//! context and records the outcome in history, and [`PipelineControl`] is the
//! operator-facing start/stop/restart surface.

mod control;
mod executor;
mod registry;

pub use control::{ControlResponse, PipelineControl};
pub use executor::{PipelineExecutor, RunOutcome};
pub use registry::{PipelineFactory, PipelineRegistry};
