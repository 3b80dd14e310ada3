//! # Contribflow
//!
//! Staged data pipelines over GitHub contribution data, with cron scheduling,
//! run history and sitemap publishing.
//!
//! Contribflow provides:
//!
//! - **Sequential pipelines**: ordered stages sharing one mutable execution context
//! - **Batch-and-cursor stages**: extraction, enrichment, ranking and sitemap generation
//!   over an upsert-by-natural-key entity store
//! - **Scheduling**: cron schedules that never overlap with themselves
//! - **Run history**: one durable record per run, closed exactly once
//! - **Notifications**: a bounded, newest-first log of scheduler events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contribflow::prelude::*;
//!
//! let app = App::build(AppConfig::from_env()?, Collaborators::in_memory(github))?;
//! app.ensure_default_schedules().await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let tasks = app.spawn_background(&shutdown_rx);
//!
//! let response = app.control().start(PipelineType::SitemapGeneration, Parameters::new()).await;
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

pub mod app;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod execution;
pub mod github;
pub mod history;
pub mod models;
pub mod notifications;
pub mod observability;
pub mod pipeline;
pub mod pipelines;
pub mod scheduler;
pub mod sitemap;
pub mod stages;
pub mod store;
pub mod testing;

#[cfg(test)]
mod scenario_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::{App, Collaborators};
    pub use crate::config::AppConfig;
    pub use crate::context::{ContextBag, ExecutionContext, PipelineStatus};
    pub use crate::core::{Parameters, PipelineType, RunStatus};
    pub use crate::errors::{
        ContribflowError, PipelineError, PipelineValidationError, ScheduleError, StageError,
        StoreError,
    };
    pub use crate::events::{EventBus, EventSubscriber, SchedulerEvent, SchedulerEventKind};
    pub use crate::execution::{ControlResponse, PipelineControl, PipelineExecutor, PipelineFactory};
    pub use crate::history::{HistoryStore, PipelineHistory};
    pub use crate::notifications::{Notification, NotificationQuery, NotificationService};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, RunSummary};
    pub use crate::scheduler::{CronExpression, NewSchedule, Schedule, Scheduler};
    pub use crate::stages::{Stage, StageConfig};
    pub use crate::store::{EntityStore, EntityType, Filter};
}
