//! Application wiring.
//!
//! Every long-lived component is constructed here and handed to the ones
//! that need it. Nothing is registered globally.

use crate::config::AppConfig;
use crate::errors::ContribflowError;
use crate::events::{EventBus, LoggingSubscriber};
use crate::execution::{PipelineControl, PipelineExecutor, PipelineRegistry};
use crate::github::{GitHubClient, RetryingGitHubClient};
use crate::history::{HistoryStore, InMemoryHistoryStore, StaleRunSweeper};
use crate::notifications::{DeliveryChannel, NotificationLog, NotificationService};
use crate::pipelines::{ContributorRankingPipeline, DataEnrichmentPipeline, EntityExtractionPipeline};
use crate::scheduler::{InMemoryScheduleRepository, Schedule, ScheduleRepository, Scheduler};
use crate::sitemap::{FsSitemapStorage, SitemapGenerationPipeline, SitemapStorage};
use crate::store::{EntityStore, InMemoryEntityStore, RetryingEntityStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// External collaborators the application is built around.
pub struct Collaborators {
    /// Entity persistence.
    pub store: Arc<dyn EntityStore>,
    /// GitHub API access.
    pub github: Arc<dyn GitHubClient>,
    /// Pipeline history persistence.
    pub history: Arc<dyn HistoryStore>,
    /// Schedule persistence.
    pub schedules: Arc<dyn ScheduleRepository>,
    /// Sitemap output. Defaults to the configured output directory.
    pub sitemap_storage: Option<Arc<dyn SitemapStorage>>,
    /// Channels for critical notifications.
    pub delivery_channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl Collaborators {
    /// In-memory persistence around the given GitHub client.
    #[must_use]
    pub fn in_memory(github: Arc<dyn GitHubClient>) -> Self {
        Self {
            store: Arc::new(InMemoryEntityStore::new()),
            github,
            history: Arc::new(InMemoryHistoryStore::new()),
            schedules: Arc::new(InMemoryScheduleRepository::new()),
            sitemap_storage: None,
            delivery_channels: Vec::new(),
        }
    }
}

/// A fully wired contribflow instance.
pub struct App {
    config: AppConfig,
    store: Arc<dyn EntityStore>,
    executor: Arc<PipelineExecutor>,
    scheduler: Arc<Scheduler>,
    control: PipelineControl,
    notifications: Arc<NotificationService>,
}

impl App {
    /// Validates `config` and wires every component.
    ///
    /// Store and GitHub calls are wrapped in the configured retry policy. The
    /// notification service and a logging subscriber are subscribed to
    /// scheduler events.
    pub fn build(config: AppConfig, collaborators: Collaborators) -> Result<Self, ContribflowError> {
        config.validate()?;
        let retry = config.retry.to_retry_config();

        let store: Arc<dyn EntityStore> = Arc::new(RetryingEntityStore::new(collaborators.store, retry.clone()));
        let github: Arc<dyn GitHubClient> = Arc::new(RetryingGitHubClient::new(collaborators.github, retry));
        let storage: Arc<dyn SitemapStorage> = match collaborators.sitemap_storage {
            Some(storage) => storage,
            None => Arc::new(FsSitemapStorage::new(config.sitemap.output_dir.clone())),
        };

        let registry = PipelineRegistry::new()
            .with(Arc::new(EntityExtractionPipeline::new(store.clone(), github.clone(), &config)))
            .with(Arc::new(DataEnrichmentPipeline::new(store.clone(), github, &config)))
            .with(Arc::new(ContributorRankingPipeline::new(store.clone(), &config)))
            .with(Arc::new(SitemapGenerationPipeline::new(
                store.clone(),
                storage,
                config.sitemap.clone(),
            )));
        let executor = Arc::new(PipelineExecutor::new(Arc::new(registry), collaborators.history));

        let notifications = Arc::new(
            collaborators
                .delivery_channels
                .into_iter()
                .fold(NotificationService::new(Arc::new(NotificationLog::new())), |service, channel| {
                    service.with_channel(channel)
                }),
        );
        let events = Arc::new(EventBus::new());
        events.subscribe(Arc::new(LoggingSubscriber));
        events.subscribe(notifications.clone());

        let scheduler = Arc::new(Scheduler::new(
            collaborators.schedules,
            executor.clone(),
            events,
            config.scheduler.tick_interval(),
        ));
        let control = PipelineControl::new(executor.clone());

        Ok(Self {
            config,
            store,
            executor,
            scheduler,
            control,
            notifications,
        })
    }

    /// Creates the default schedules missing from the repository.
    pub async fn ensure_default_schedules(&self) -> Result<Vec<Schedule>, ContribflowError> {
        let created = self.scheduler.ensure_defaults(&self.config.scheduler).await?;
        if !created.is_empty() {
            info!(count = created.len(), "Default schedules created");
        }
        Ok(created)
    }

    /// Starts the scheduler loop and the stale-run sweeper.
    ///
    /// Both stop once `shutdown` turns true.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let sweeper = StaleRunSweeper::new(
            self.executor.history().clone(),
            self.config.scheduler.stale_window(),
            self.config.scheduler.tick_interval(),
        );
        vec![
            tokio::spawn(self.scheduler.clone().run(shutdown.clone())),
            tokio::spawn(sweeper.run(shutdown.clone())),
        ]
    }

    /// Closes the event bus and waits for subscribers to drain.
    pub async fn shutdown(&self) {
        self.scheduler.events().shutdown().await;
    }

    /// The validated configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The entity store, with retries.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// The pipeline executor.
    pub fn executor(&self) -> &Arc<PipelineExecutor> {
        &self.executor
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Start, stop and restart by pipeline type.
    pub fn control(&self) -> &PipelineControl {
        &self.control
    }

    /// The notification read API.
    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("pipelines", &self.executor.registry().types())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Parameters, PipelineType, RunStatus};
    use crate::sitemap::InMemorySitemapStorage;
    use crate::testing::{fixtures, FakeGitHubClient};
    use serde_json::json;
    use std::time::Duration;

    fn app() -> (App, Arc<InMemorySitemapStorage>, Arc<FakeGitHubClient>) {
        let github = Arc::new(FakeGitHubClient::new());
        let storage = Arc::new(InMemorySitemapStorage::new());
        let mut collaborators = Collaborators::in_memory(github.clone());
        collaborators.sitemap_storage = Some(storage.clone());
        let app = App::build(AppConfig::default(), collaborators).unwrap();
        (app, storage, github)
    }

    #[tokio::test]
    async fn test_registers_every_pipeline() {
        let (app, _, _) = app();
        assert_eq!(app.executor().registry().types(), PipelineType::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_default_schedules_created_once() {
        let (app, _, _) = app();
        let created = app.ensure_default_schedules().await.unwrap();
        assert_eq!(created.len(), PipelineType::ALL.len());
        assert!(app.ensure_default_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipelines_feed_each_other() {
        let (app, storage, github) = app();
        github.add_pull_requests(
            "acme/widgets",
            vec![
                fixtures::pull_request(1, 10, Some(11), &[10]),
                fixtures::pull_request(2, 11, None, &[11, 12]),
            ],
        );

        let params = Parameters::from([("repositories".to_string(), json!(["acme/widgets"]))]);
        let executor = app.executor();
        for (pipeline_type, params) in [
            (PipelineType::EntityExtraction, params),
            (PipelineType::DataEnrichment, Parameters::new()),
            (PipelineType::ContributorRanking, Parameters::new()),
            (PipelineType::SitemapGeneration, Parameters::new()),
        ] {
            let outcome = executor.execute(pipeline_type, &params).await.unwrap();
            assert_eq!(outcome.status, RunStatus::Completed, "{pipeline_type}: {:?}", outcome.error);
        }

        let files = storage.list().await.unwrap();
        assert_eq!(
            files,
            vec!["contributors-1.xml", "merge_requests-1.xml", "repositories-1.xml", "sitemap.xml"]
        );
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let (app, _, _) = app();
        let (tx, rx) = watch::channel(false);
        let handles = app.spawn_background(&rx);
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
        app.shutdown().await;
    }
}
