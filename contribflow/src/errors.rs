//! Error types for the contribflow framework.
//!
//! Each subsystem owns a small error enum; [`ContribflowError`] aggregates them
//! for callers that drive several subsystems at once.

use std::collections::HashMap;
use thiserror::Error;

/// The main error type for contribflow operations.
#[derive(Debug, Error)]
pub enum ContribflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A pipeline run failed.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// The entity store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The GitHub collaborator failed.
    #[error("{0}")]
    GitHub(#[from] GitHubError),

    /// Sitemap output failed.
    #[error("{0}")]
    Sitemap(#[from] SitemapError),

    /// Pipeline history failed.
    #[error("{0}")]
    History(#[from] HistoryError),

    /// A schedule operation failed.
    #[error("{0}")]
    Schedule(#[from] ScheduleError),

    /// A pipeline could not be executed.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Configuration was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A notification operation failed.
    #[error("{0}")]
    Notification(#[from] NotificationError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a pipeline definition is rejected at build time.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error returned by a stage. Aborts the pipeline run it occurs in.
#[derive(Debug, Error)]
pub enum StageError {
    /// Business or validation failure inside the stage.
    #[error("{0}")]
    Invalid(String),

    /// A value the stage needs was not present in the execution context.
    #[error("Missing context value: {0}")]
    MissingContext(String),

    /// The entity store failed after its own retries.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The GitHub collaborator failed after its own retries.
    #[error("{0}")]
    GitHub(#[from] GitHubError),

    /// Sitemap output failed.
    #[error("{0}")]
    Sitemap(#[from] SitemapError),

    /// A record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StageError {
    /// Creates a business-logic stage error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Error returned by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage failed; the remaining stages were not run.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The failing stage.
        stage: String,
        /// The stage error.
        #[source]
        source: StageError,
    },

    /// The pipeline could not be constructed for this run.
    #[error("{0}")]
    Build(#[from] PipelineValidationError),
}

impl PipelineError {
    /// Returns the failing stage name, if a stage failed.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. } => Some(stage),
            Self::Build(_) => None,
        }
    }
}

/// Errors from the entity store collaborator.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Temporary failure (connection reset, timeout). Safe to retry.
    #[error("Store temporarily unavailable: {0}")]
    Unavailable(String),

    /// A record is missing its natural key.
    #[error("Record for '{entity}' is missing key field '{key}'")]
    MissingKey {
        /// The entity type.
        entity: String,
        /// The key field.
        key: String,
    },

    /// A record was not a JSON object.
    #[error("Record for '{entity}' is not an object")]
    InvalidRecord {
        /// The entity type.
        entity: String,
    },

    /// Any other terminal failure.
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if the error may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from the GitHub API collaborator.
#[derive(Debug, Clone, Error)]
pub enum GitHubError {
    /// The API rate limit was hit.
    #[error("GitHub rate limit exceeded (reset in {reset_after_secs}s)")]
    RateLimited {
        /// Seconds until the limit resets.
        reset_after_secs: u64,
    },

    /// Network or 5xx failure.
    #[error("GitHub request failed: {0}")]
    Transient(String),

    /// The response could not be understood.
    #[error("Unexpected GitHub response: {0}")]
    InvalidResponse(String),

    /// Authentication was rejected.
    #[error("GitHub authentication failed")]
    Unauthorized,
}

impl GitHubError {
    /// Returns true if the error may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Errors from sitemap rendering and storage.
#[derive(Debug, Error)]
pub enum SitemapError {
    /// XML could not be written.
    #[error("Sitemap XML error: {0}")]
    Xml(String),

    /// The page exceeds the configured maximum.
    #[error("Sitemap page '{file}' has {count} URLs, maximum is {max}")]
    PageTooLarge {
        /// The page file name.
        file: String,
        /// URLs in the page.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Storage failure.
    #[error("Sitemap storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the pipeline history store.
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    /// No record with this id.
    #[error("History record not found: {0}")]
    NotFound(String),

    /// The record already reached a terminal state.
    #[error("History record {id} is already {status}")]
    AlreadyTerminal {
        /// Record id.
        id: String,
        /// Its terminal status.
        status: String,
    },

    /// The backing store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Errors that prevent a pipeline run from being recorded at all.
///
/// Failures inside the run are not errors here; they end up in the history record.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// No pipeline factory is registered for the type.
    #[error("No pipeline registered for type '{0}'")]
    UnknownPipeline(String),

    /// History could not be written.
    #[error("{0}")]
    History(#[from] HistoryError),
}

/// Errors from schedule management.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    /// No schedule with this id.
    #[error("Schedule not found: {0}")]
    NotFound(String),

    /// The cron expression was rejected.
    #[error("{0}")]
    Cron(#[from] CronError),

    /// No pipeline factory is registered for the type.
    #[error("No pipeline registered for type '{0}'")]
    UnknownPipeline(String),

    /// The schedule repository failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Error raised when a cron expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    /// The offending expression.
    pub expression: String,
    /// What was wrong with it.
    pub reason: String,
}

impl CronError {
    /// Creates a new cron error.
    #[must_use]
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    Invalid {
        /// Environment key.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A value is out of its allowed range.
    #[error("{key} out of range: {message}")]
    OutOfRange {
        /// Environment key.
        key: String,
        /// Explanation.
        message: String,
    },

    /// A cron expression in the configuration is invalid.
    #[error("{0}")]
    Cron(#[from] CronError),
}

/// Errors from the notification read API.
#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    /// No notification with this id is retained.
    #[error("Notification not found: {0}")]
    NotFound(String),

    /// A delivery channel failed.
    #[error("Delivery via {channel} failed: {reason}")]
    Delivery {
        /// Channel name.
        channel: String,
        /// Failure reason.
        reason: String,
    },
}

/// Converts an error chain into a flat map for structured notification details.
///
/// Transparent wrappers repeat their source's text; a cause identical to the
/// previous one is listed once.
#[must_use]
pub fn error_details(err: &(dyn std::error::Error + 'static)) -> HashMap<String, serde_json::Value> {
    let mut map = HashMap::new();
    map.insert("message".to_string(), serde_json::json!(err.to_string()));

    let mut causes: Vec<String> = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if causes.last() != Some(&text) {
            causes.push(text);
        }
        source = cause.source();
    }
    if !causes.is_empty() {
        map.insert("causes".to_string(), serde_json::json!(causes));
    }
    map
}
