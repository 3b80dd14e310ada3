//! Periodic recovery of runs left `running` by a crashed process.

use super::HistoryStore;
use crate::errors::HistoryError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marks running history records older than a window as failed.
pub struct StaleRunSweeper {
    history: Arc<dyn HistoryStore>,
    window: Duration,
    interval: Duration,
}

impl StaleRunSweeper {
    /// Creates a sweeper that checks every `interval` for runs older than `window`.
    #[must_use]
    pub fn new(history: Arc<dyn HistoryStore>, window: Duration, interval: Duration) -> Self {
        Self {
            history,
            window,
            interval,
        }
    }

    /// Sweeps once and returns the ids marked failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store fails.
    pub async fn sweep_once(&self) -> Result<Vec<Uuid>, HistoryError> {
        let window = chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let swept = self.history.sweep_stale(cutoff).await?;
        for record in &swept {
            info!(
                history_id = %record.id,
                pipeline_type = %record.pipeline_type,
                started_at = %record.started_at,
                "Marked stale run as failed"
            );
        }
        Ok(swept.into_iter().map(|r| r.id).collect())
    }

    /// Sweeps on every interval until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Stale run sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Stale run sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Parameters, PipelineType, RunStatus};
    use crate::history::{InMemoryHistoryStore, PipelineHistory};

    #[tokio::test]
    async fn test_sweep_once_uses_window() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let stale = PipelineHistory::start(
            PipelineType::DataEnrichment,
            Parameters::new(),
            Utc::now() - chrono::Duration::hours(2),
        );
        store.insert(stale.clone());
        let live = store
            .create(PipelineType::DataEnrichment, Parameters::new())
            .await
            .unwrap();

        let sweeper = StaleRunSweeper::new(store.clone(), Duration::from_secs(3_600), Duration::from_secs(60));
        let swept = sweeper.sweep_once().await.unwrap();

        assert_eq!(swept, vec![stale.id]);
        assert_eq!(store.get(live.id).await.unwrap().unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let sweeper = StaleRunSweeper::new(store, Duration::from_secs(60), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
