//! Testing utilities for contribflow pipelines.
//!
//! This module provides:
//! - Stub stages with scripted behaviour
//! - A pipeline factory over fixed stages
//! - An in-memory GitHub fake and an event collector
//! - Record fixtures

pub mod fixtures;
mod github;
mod mocks;

pub use github::FakeGitHubClient;
pub use mocks::{
    CollectingSubscriber, FailingStage, RecordingStage, SharedLog, SlowStage, StaticPipelineFactory,
};
