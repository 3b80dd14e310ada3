//! End-to-end scenarios across pipelines, scheduling, history and notifications.

use crate::config::{AppConfig, SitemapConfig};
use crate::core::{Parameters, PipelineType, RunStatus};
use crate::errors::{GitHubError, HistoryError};
use crate::events::{EventBus, SchedulerEventKind};
use crate::execution::{PipelineExecutor, PipelineFactory, PipelineRegistry, RunOutcome};
use crate::history::{HistoryQuery, HistoryStore, InMemoryHistoryStore};
use crate::notifications::{Notification, NotificationLevel, NotificationLog, NotificationQuery};
use crate::pipelines::{DataEnrichmentPipeline, EntityExtractionPipeline};
use crate::scheduler::{InMemoryScheduleRepository, NewSchedule, Scheduler, TriggerOutcome};
use crate::sitemap::{
    page_file_name, parse_locs, InMemorySitemapStorage, SitemapGenerationPipeline, SitemapStorage, INDEX_FILE,
};
use crate::stages::Stage;
use crate::store::{EntityStore, EntityType, Filter, InMemoryEntityStore};
use crate::testing::{fixtures, CollectingSubscriber, FakeGitHubClient, SlowStage, StaticPipelineFactory};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn executor_with(factory: Arc<dyn PipelineFactory>) -> (PipelineExecutor, Arc<InMemoryHistoryStore>) {
    let history = Arc::new(InMemoryHistoryStore::new());
    let registry = Arc::new(PipelineRegistry::new().with(factory));
    (PipelineExecutor::new(registry, history.clone()), history)
}

fn sitemap_config(max_urls: usize) -> SitemapConfig {
    SitemapConfig {
        base_url: "https://contrib.example".to_string(),
        max_urls_per_file: max_urls,
        ..SitemapConfig::default()
    }
}

async fn generate(
    store: Arc<InMemoryEntityStore>,
    max_urls: usize,
) -> (Arc<InMemorySitemapStorage>, RunOutcome) {
    let storage = Arc::new(InMemorySitemapStorage::new());
    let factory = SitemapGenerationPipeline::new(store, storage.clone(), sitemap_config(max_urls));
    let (executor, _) = executor_with(Arc::new(factory));
    let outcome = executor
        .execute(PipelineType::SitemapGeneration, &Parameters::new())
        .await
        .unwrap();
    (storage, outcome)
}

async fn page_locs(storage: &InMemorySitemapStorage, entity: EntityType) -> Vec<Vec<String>> {
    let mut pages = Vec::new();
    for page in 1.. {
        let Some(xml) = storage.read(&page_file_name(entity, page)).await.unwrap() else {
            break;
        };
        pages.push(parse_locs(&xml).unwrap());
    }
    pages
}

#[tokio::test]
async fn extraction_twice_creates_no_duplicates() {
    let store = Arc::new(InMemoryEntityStore::new());
    let github = Arc::new(FakeGitHubClient::new());
    github.add_pull_requests(
        "acme/widgets",
        (1..=30).map(|i| fixtures::pull_request(i, i % 7, (i % 3 == 0).then_some(1), &[i % 5, i % 7])).collect(),
    );
    let factory = EntityExtractionPipeline::new(store.clone(), github, &AppConfig::default());
    let (executor, history) = executor_with(Arc::new(factory));
    let params = Parameters::from([("repositories".to_string(), json!(["acme/widgets"]))]);

    let first = executor.execute(PipelineType::EntityExtraction, &params).await.unwrap();
    let counts = |store: &InMemoryEntityStore| {
        [
            EntityType::Repository,
            EntityType::Contributor,
            EntityType::MergeRequest,
            EntityType::Commit,
        ]
        .map(|e| store.len(e))
    };
    let after_first = counts(store.as_ref());
    let second = executor.execute(PipelineType::EntityExtraction, &params).await.unwrap();

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.items_processed, 30);
    assert_eq!(second.items_processed, 0);
    assert_eq!(counts(store.as_ref()), after_first);
    assert_eq!(after_first, [1, 7, 30, 60]);
    assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn sitemap_pages_are_complete_for_any_size() {
    for (count, max_urls) in [(1u64, 5usize), (5, 5), (6, 5), (23, 4), (40, 7)] {
        let store = Arc::new(InMemoryEntityStore::new());
        fixtures::seed_repositories(store.as_ref(), count).await.unwrap();

        let (storage, outcome) = generate(store, max_urls).await;
        assert!(outcome.is_success());

        let pages = page_locs(&storage, EntityType::Repository).await;
        let expected_pages = usize::try_from(count).unwrap().div_ceil(max_urls);
        assert_eq!(pages.len(), expected_pages, "{count} urls, {max_urls} per page");
        assert!(pages.iter().all(|p| p.len() <= max_urls && !p.is_empty()));

        let all: Vec<&String> = pages.iter().flatten().collect();
        let unique: HashSet<&String> = all.iter().copied().collect();
        assert_eq!(all.len() as u64, count);
        assert_eq!(unique.len(), all.len());
        assert!(unique.contains(&"https://contrib.example/owner0/repo0".to_string()));
    }
}

#[tokio::test]
async fn sitemap_for_125k_repositories() {
    let store = Arc::new(InMemoryEntityStore::new());
    fixtures::seed_repositories(store.as_ref(), 125_000).await.unwrap();

    let (storage, outcome) = generate(store, 49_000).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.items_processed, 125_000);

    let sizes: Vec<usize> = page_locs(&storage, EntityType::Repository)
        .await
        .iter()
        .map(Vec::len)
        .collect();
    assert_eq!(sizes, vec![49_000, 49_000, 27_000]);

    let index = parse_locs(&storage.read(INDEX_FILE).await.unwrap().unwrap()).unwrap();
    assert_eq!(
        index,
        vec![
            "https://contrib.example/sitemaps/repositories-1.xml",
            "https://contrib.example/sitemaps/repositories-2.xml",
            "https://contrib.example/sitemaps/repositories-3.xml",
            "https://contrib.example/",
        ]
    );
}

#[tokio::test]
async fn overlapping_triggers_execute_once() {
    let stage: Arc<dyn Stage> = Arc::new(SlowStage::new("slow", Duration::from_millis(150)));
    let factory = StaticPipelineFactory::new(PipelineType::ContributorRanking, vec![stage]);
    let (executor, history) = executor_with(Arc::new(factory));
    let events = Arc::new(EventBus::new());
    let collector = Arc::new(CollectingSubscriber::new());
    events.subscribe(collector.clone());
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(InMemoryScheduleRepository::new()),
        Arc::new(executor),
        events,
        Duration::from_secs(30),
    ));
    let schedule = scheduler
        .create(NewSchedule::new(PipelineType::ContributorRanking, "every minute", "* * * * *"))
        .await
        .unwrap();

    let first = scheduler.trigger(&schedule.id).await.unwrap();
    let second = scheduler.trigger(&schedule.id).await.unwrap();
    assert!(matches!(second, TriggerOutcome::AlreadyRunning));
    let TriggerOutcome::Started(handle) = first else {
        panic!("first trigger did not start");
    };
    assert!(handle.await.unwrap().success);

    assert!(collector.wait_for(3, Duration::from_secs(1)).await);
    assert_eq!(collector.of_kind(SchedulerEventKind::Executing).len(), 1);
    assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().len(), 1);
    assert!(scheduler.trigger(&schedule.id).await.unwrap().is_started());
}

#[tokio::test]
async fn finished_history_records_are_never_mutated() {
    let factory = StaticPipelineFactory::noop(PipelineType::SitemapGeneration);
    let (executor, history) = executor_with(Arc::new(factory));

    let first = executor
        .execute(PipelineType::SitemapGeneration, &Parameters::new())
        .await
        .unwrap();
    let snapshot = history.get(first.history_id).await.unwrap().unwrap();
    let second = executor
        .execute(PipelineType::SitemapGeneration, &Parameters::new())
        .await
        .unwrap();

    assert_ne!(first.history_id, second.history_id);
    assert_eq!(history.get(first.history_id).await.unwrap().unwrap(), snapshot);
    assert!(matches!(
        history.fail(first.history_id, "late failure", 0).await,
        Err(HistoryError::AlreadyTerminal { .. })
    ));
    assert!(matches!(
        history.complete(first.history_id, 99).await,
        Err(HistoryError::AlreadyTerminal { .. })
    ));
    assert_eq!(history.get(first.history_id).await.unwrap().unwrap(), snapshot);
}

#[test]
fn notification_log_keeps_newest_hundred() {
    let log = NotificationLog::new();
    for i in 0..150 {
        log.push(Notification::new("schedule:completed", NotificationLevel::Success, format!("run {i}"), ""));
    }

    let page = log.query(&NotificationQuery::default());
    assert_eq!(page.count, 100);
    assert_eq!(page.data[0].title, "run 149");
    assert_eq!(page.data[99].title, "run 50");
    assert!(page.data.iter().all(|n| n.title != "run 49"));
}

#[tokio::test]
async fn enrichment_failure_mid_batch_keeps_committed_batches() {
    let store = Arc::new(InMemoryEntityStore::new());
    fixtures::seed_repositories(store.as_ref(), 120).await.unwrap();
    let github = Arc::new(FakeGitHubClient::new());
    // Record 37 of the second batch of 50 is request 87.
    github.fail_on_request(87, GitHubError::InvalidResponse("truncated body".to_string()));

    let factory = DataEnrichmentPipeline::new(store.clone(), github, &AppConfig::default());
    let (executor, history) = executor_with(Arc::new(factory));
    let params = Parameters::from([("batch_size".to_string(), json!(50))]);
    let outcome = executor.execute(PipelineType::DataEnrichment, &params).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    let record = history.get(outcome.history_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.items_processed, 50);
    assert!(record.error_message.unwrap().contains("truncated body"));

    let enriched = store
        .fetch_batch(EntityType::Repository, 200, 0, &Filter::flag("is_enriched", true))
        .await
        .unwrap();
    assert_eq!(enriched.len(), 50);
    let first_batch: HashSet<u64> = (0..50).collect();
    assert!(enriched
        .iter()
        .all(|r| first_batch.contains(&r["github_id"].as_u64().unwrap())));
}
