//! Core domain model types for contribflow.
//!
//! This module contains the small enums shared by every subsystem:
//! - Pipeline type identifiers
//! - Pipeline run status
//! - Free-form parameter maps

mod status;

pub use status::{PipelineType, RunStatus, UnknownPipelineType};

use std::collections::HashMap;

/// Free-form parameters attached to a schedule or a manual start request.
pub type Parameters = HashMap<String, serde_json::Value>;
