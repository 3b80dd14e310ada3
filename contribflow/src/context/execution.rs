//! Mutable execution context for a single pipeline run.

use super::ContextBag;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, Span};
use uuid::Uuid;

/// Callback invoked whenever a stage reports progress.
pub type StatusObserver = Arc<dyn Fn(&PipelineStatus) + Send + Sync>;

/// Progress of a run as seen by external observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Percent complete, 0..=100.
    pub progress: u8,
    /// Human-readable description of the current step.
    pub message: String,
}

/// The mutable state threaded through every stage of one pipeline run.
///
/// A context is created per run and owned by it; it is never shared between
/// concurrent runs.
pub struct ExecutionContext {
    run_id: Uuid,
    pipeline_name: String,
    logger: Span,
    /// Stage-to-stage data, keyed by namespace.
    pub data: ContextBag,
    status: PipelineStatus,
    observer: Option<StatusObserver>,
    items_processed: u64,
}

impl ExecutionContext {
    /// Creates a new context for a run of `pipeline_name`.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        let pipeline_name = pipeline_name.into();
        let run_id = Uuid::new_v4();
        let logger = tracing::info_span!("pipeline_run", pipeline = %pipeline_name, run_id = %run_id);
        Self {
            run_id,
            pipeline_name,
            logger,
            data: ContextBag::new(),
            status: PipelineStatus::default(),
            observer: None,
            items_processed: 0,
        }
    }

    /// Sets the status observer.
    #[must_use]
    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Seeds the data bag.
    #[must_use]
    pub fn with_data(mut self, data: ContextBag) -> Self {
        self.data = data;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Returns the run's logging span.
    #[must_use]
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    /// Records progress and notifies the observer, if any.
    ///
    /// Progress above 100 is clamped.
    pub fn update_status(&mut self, progress: u8, message: impl Into<String>) {
        self.status = PipelineStatus {
            progress: progress.min(100),
            message: message.into(),
        };
        debug!(
            parent: &self.logger,
            progress = self.status.progress,
            message = %self.status.message,
            "Status updated"
        );
        if let Some(observer) = &self.observer {
            observer(&self.status);
        }
    }

    /// Resets status to zero progress. Called at the start of every run.
    pub(crate) fn reset_status(&mut self) {
        self.update_status(0, "Starting");
    }

    /// Adds to the count of records committed during this run.
    pub fn add_items_processed(&mut self, count: u64) {
        self.items_processed += count;
    }

    /// Returns the number of records committed during this run.
    #[must_use]
    pub fn items_processed(&self) -> u64 {
        self.items_processed
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("pipeline_name", &self.pipeline_name)
            .field("status", &self.status)
            .field("items_processed", &self.items_processed)
            .finish_non_exhaustive()
    }
}

/// Computes a progress percentage, saturating at 100.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = done.saturating_mul(100) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_new_context() {
        let ctx = ExecutionContext::new("sitemap");
        assert_eq!(ctx.pipeline_name(), "sitemap");
        assert_eq!(ctx.status().progress, 0);
        assert_eq!(ctx.items_processed(), 0);
        assert!(ctx.data.is_empty());
    }

    #[test]
    fn test_update_status_notifies_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut ctx = ExecutionContext::new("test")
            .with_observer(Arc::new(move |status: &PipelineStatus| {
                sink.lock().push(status.clone());
            }));

        ctx.update_status(40, "batch 2");
        ctx.update_status(250, "done");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].progress, 40);
        assert_eq!(seen[1].progress, 100);
        assert_eq!(ctx.status().message, "done");
    }

    #[test]
    fn test_items_processed_accumulates() {
        let mut ctx = ExecutionContext::new("test");
        ctx.add_items_processed(50);
        ctx.add_items_processed(7);
        assert_eq!(ctx.items_processed(), 57);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(20, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
