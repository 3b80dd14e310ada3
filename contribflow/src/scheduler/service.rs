//! Schedule management and cron-driven triggering.

use super::{CronExpression, NewSchedule, Schedule, ScheduleRepository, ScheduleResult, ScheduleUpdate};
use crate::config::SchedulerConfig;
use crate::core::PipelineType;
use crate::errors::{CronError, ScheduleError};
use crate::events::{EventBus, SchedulerEvent, SchedulerEventKind};
use crate::execution::PipelineExecutor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of asking a schedule to run.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A run was spawned; the handle resolves to its result.
    Started(JoinHandle<ScheduleResult>),
    /// The previous run is still executing; nothing was started.
    AlreadyRunning,
}

impl TriggerOutcome {
    /// Returns true if a run was started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Releases a schedule's in-flight flag when the run ends, however it ends.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Parses `expression` and returns its first firing time after `now`.
///
/// An expression that never fires, such as February 30th, is rejected.
fn first_run(expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    CronExpression::parse(expression)?
        .next_after(now)
        .ok_or_else(|| CronError::new(expression, "never fires").into())
}

/// Owns the schedules and fires their pipelines.
pub struct Scheduler {
    repository: Arc<dyn ScheduleRepository>,
    executor: Arc<PipelineExecutor>,
    events: Arc<EventBus>,
    in_flight: DashMap<String, Arc<AtomicBool>>,
    tick_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ScheduleRepository>,
        executor: Arc<PipelineExecutor>,
        events: Arc<EventBus>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            repository,
            executor,
            events,
            in_flight: DashMap::new(),
            tick_interval,
        }
    }

    /// The event bus lifecycle events are published on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Creates a schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the cron expression is invalid, the pipeline type
    /// is not registered, or the repository fails.
    pub async fn create(&self, request: NewSchedule) -> Result<Schedule, ScheduleError> {
        let next_run_at = first_run(&request.cron_expression, Utc::now())?;
        if !self.executor.registry().contains(request.pipeline_type) {
            return Err(ScheduleError::UnknownPipeline(request.pipeline_type.to_string()));
        }

        let schedule = Schedule::from_new(request, Some(next_run_at));
        self.repository.save(&schedule).await?;
        info!(
            schedule_id = %schedule.id,
            pipeline_type = %schedule.pipeline_type,
            cron = %schedule.cron_expression,
            next_run_at = ?schedule.next_run_at,
            "Schedule created"
        );
        self.events
            .publish(SchedulerEvent::new(SchedulerEventKind::Created, &schedule));
        Ok(schedule)
    }

    /// Applies a partial edit. The next run time is recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule does not exist, the new cron
    /// expression is invalid, or the repository fails.
    pub async fn update(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.require(id).await?;

        let now = Utc::now();
        if let Some(expression) = update.cron_expression {
            first_run(&expression, now)?;
            schedule.cron_expression = expression;
        }
        if let Some(name) = update.name {
            schedule.name = name;
        }
        if let Some(is_active) = update.is_active {
            schedule.is_active = is_active;
        }
        if let Some(parameters) = update.parameters {
            schedule.parameters = parameters;
        }

        schedule.next_run_at = Some(first_run(&schedule.cron_expression, now)?);
        schedule.updated_at = now;
        self.repository.save(&schedule).await?;

        info!(schedule_id = %schedule.id, next_run_at = ?schedule.next_run_at, "Schedule updated");
        self.events
            .publish(SchedulerEvent::new(SchedulerEventKind::Updated, &schedule));
        Ok(schedule)
    }

    /// Deletes a schedule. A run already in flight finishes normally.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule does not exist or the repository fails.
    pub async fn delete(&self, id: &str) -> Result<Schedule, ScheduleError> {
        let schedule = self
            .repository
            .delete(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        self.in_flight
            .remove_if(id, |_, flag| !flag.load(Ordering::Acquire));

        info!(schedule_id = %schedule.id, "Schedule deleted");
        self.events
            .publish(SchedulerEvent::new(SchedulerEventKind::Deleted, &schedule));
        Ok(schedule)
    }

    /// Gets a schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn get(&self, id: &str) -> Result<Option<Schedule>, ScheduleError> {
        Ok(self.repository.get(id).await?)
    }

    /// Lists every schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn list(&self) -> Result<Vec<Schedule>, ScheduleError> {
        Ok(self.repository.list().await?)
    }

    /// Returns true if a run of the schedule is in flight.
    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.in_flight
            .get(id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Creates a schedule for every registered pipeline type that has none,
    /// using the configured default cron expressions.
    ///
    /// # Errors
    ///
    /// Returns an error if a default cron expression is invalid or the repository fails.
    pub async fn ensure_defaults(&self, config: &SchedulerConfig) -> Result<Vec<Schedule>, ScheduleError> {
        let existing = self.repository.list().await?;
        let mut created = Vec::new();
        for pipeline_type in PipelineType::ALL {
            if !self.executor.registry().contains(pipeline_type)
                || existing.iter().any(|s| s.pipeline_type == pipeline_type)
            {
                continue;
            }
            let Some(cron) = config.default_crons.get(&pipeline_type) else {
                continue;
            };
            let request = NewSchedule::new(pipeline_type, format!("Default {pipeline_type}"), cron.clone());
            created.push(self.create(request).await?);
        }
        Ok(created)
    }

    /// Runs a schedule now, regardless of its next run time.
    ///
    /// The in-flight flag is claimed before this returns, so a second trigger
    /// issued while the first run executes reports [`TriggerOutcome::AlreadyRunning`].
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule does not exist or the repository fails.
    pub async fn trigger(self: &Arc<Self>, id: &str) -> Result<TriggerOutcome, ScheduleError> {
        let schedule = self.require(id).await?;
        Ok(self.launch(schedule))
    }

    /// Triggers every active schedule due at `now`. Returns the ids started.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<String>, ScheduleError> {
        let mut started = Vec::new();
        for schedule in self.repository.list().await? {
            if !schedule.is_due(now) {
                continue;
            }
            let id = schedule.id.clone();
            if self.launch(schedule).is_started() {
                started.push(id);
            }
        }
        Ok(started)
    }

    /// Ticks on the configured interval until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_interval_secs = self.tick_interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(started) if !started.is_empty() => {
                            debug!(count = started.len(), "Due schedules triggered");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    async fn require(&self, id: &str) -> Result<Schedule, ScheduleError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }

    fn try_acquire(&self, id: &str) -> Option<InFlightGuard> {
        let flag = self
            .in_flight
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag })
    }

    fn launch(self: &Arc<Self>, schedule: Schedule) -> TriggerOutcome {
        let Some(guard) = self.try_acquire(&schedule.id) else {
            info!(
                schedule_id = %schedule.id,
                pipeline_type = %schedule.pipeline_type,
                "Schedule still executing, skipping trigger"
            );
            return TriggerOutcome::AlreadyRunning;
        };

        let scheduler = Arc::clone(self);
        TriggerOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            scheduler.execute(schedule).await
        }))
    }

    async fn execute(&self, schedule: Schedule) -> ScheduleResult {
        let started_at = Utc::now();
        info!(schedule_id = %schedule.id, pipeline_type = %schedule.pipeline_type, "Schedule executing");

        let outcome = match self.executor.begin(schedule.pipeline_type, &schedule.parameters).await {
            Ok(record) => {
                self.events.publish(
                    SchedulerEvent::new(SchedulerEventKind::Executing, &schedule).with_history(record.id),
                );
                self.executor.run_recorded(&record).await
            }
            Err(e) => {
                self.events
                    .publish(SchedulerEvent::new(SchedulerEventKind::Executing, &schedule));
                Err(e)
            }
        };

        let result = match &outcome {
            Ok(run) => ScheduleResult {
                success: run.is_success(),
                error: run.error.clone(),
                history_id: Some(run.history_id),
                items_processed: run.items_processed,
            },
            Err(e) => ScheduleResult {
                success: false,
                error: Some(e.to_string()),
                history_id: None,
                items_processed: 0,
            },
        };

        let updated = self.record_result(&schedule, started_at, &result).await;
        let mut event = SchedulerEvent::new(
            if result.success {
                SchedulerEventKind::Completed
            } else {
                SchedulerEventKind::Failed
            },
            &updated,
        );
        if let Some(id) = result.history_id {
            event = event.with_history(id);
        }
        if let Ok(run) = &outcome {
            event = event.with_result(run.items_processed, run.duration_ms);
        }
        if let Some(error) = &result.error {
            event = event.with_error(error.clone());
        }
        self.events.publish(event);
        result
    }

    // Failures advance next_run_at too, so a failing pipeline does not block later attempts.
    async fn record_result(&self, schedule: &Schedule, started_at: DateTime<Utc>, result: &ScheduleResult) -> Schedule {
        let now = Utc::now();
        // Reload so edits made while the run executed are kept.
        let current = match self.repository.get(&schedule.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(schedule_id = %schedule.id, "Schedule deleted during run");
                return schedule.clone();
            }
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "Could not reload schedule after run");
                schedule.clone()
            }
        };

        let mut updated = current;
        updated.last_run_at = Some(started_at);
        updated.last_result = Some(result.clone());
        updated.next_run_at = CronExpression::parse(&updated.cron_expression)
            .ok()
            .and_then(|cron| cron.next_after(now));
        updated.updated_at = now;

        if let Err(e) = self.repository.save(&updated).await {
            error!(schedule_id = %updated.id, error = %e, "Could not record schedule result");
        }
        updated
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick_interval", &self.tick_interval)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::execution::PipelineRegistry;
    use crate::history::{HistoryStore, InMemoryHistoryStore};
    use crate::scheduler::InMemoryScheduleRepository;
    use crate::stages::Stage;
    use crate::testing::{CollectingSubscriber, FailingStage, SlowStage, StaticPipelineFactory};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        scheduler: Arc<Scheduler>,
        history: Arc<InMemoryHistoryStore>,
        events: Arc<CollectingSubscriber>,
    }

    fn harness(stage: Arc<dyn Stage>) -> Harness {
        let history = Arc::new(InMemoryHistoryStore::new());
        let factory = StaticPipelineFactory::new(PipelineType::SitemapGeneration, vec![stage]);
        let registry = Arc::new(PipelineRegistry::new().with(Arc::new(factory)));
        let executor = Arc::new(PipelineExecutor::new(registry, history.clone()));
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(CollectingSubscriber::new());
        bus.subscribe(events.clone());
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(InMemoryScheduleRepository::new()),
            executor,
            bus,
            Duration::from_millis(10),
        ));
        Harness {
            scheduler,
            history,
            events,
        }
    }

    fn nightly() -> NewSchedule {
        NewSchedule::new(PipelineType::SitemapGeneration, "nightly", "0 3 * * *")
    }

    #[tokio::test]
    async fn test_create_validates_and_schedules() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let schedule = h.scheduler.create(nightly()).await.unwrap();
        assert!(schedule.next_run_at.unwrap() > Utc::now());

        let err = h
            .scheduler
            .create(NewSchedule::new(PipelineType::SitemapGeneration, "bad", "61 * * * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Cron(_)));

        let err = h
            .scheduler
            .create(NewSchedule::new(PipelineType::DataEnrichment, "missing", "@daily"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownPipeline(_)));

        assert!(h.events.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(h.events.kinds(), vec![SchedulerEventKind::Created]);
    }

    #[tokio::test]
    async fn test_expression_that_never_fires_is_rejected() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let err = h
            .scheduler
            .create(NewSchedule::new(PipelineType::SitemapGeneration, "feb 30", "0 0 30 2 *"))
            .await
            .unwrap_err();
        assert!(matches!(&err, ScheduleError::Cron(e) if e.reason == "never fires"));
        assert!(h.scheduler.list().await.unwrap().is_empty());

        let schedule = h.scheduler.create(nightly()).await.unwrap();
        let err = h
            .scheduler
            .update(
                &schedule.id,
                ScheduleUpdate {
                    cron_expression: Some("0 0 30 2 *".to_string()),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Cron(_)));
        let stored = h.scheduler.get(&schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.cron_expression, "0 3 * * *");
    }

    #[tokio::test]
    async fn test_update_recomputes_next_run_and_delete() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let schedule = h.scheduler.create(nightly()).await.unwrap();

        let updated = h
            .scheduler
            .update(
                &schedule.id,
                ScheduleUpdate {
                    cron_expression: Some("* * * * *".to_string()),
                    is_active: Some(false),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert!(updated.next_run_at.unwrap() <= Utc::now() + ChronoDuration::minutes(1));

        h.scheduler.delete(&schedule.id).await.unwrap();
        assert!(h.scheduler.get(&schedule.id).await.unwrap().is_none());
        assert!(matches!(
            h.scheduler.delete(&schedule.id).await,
            Err(ScheduleError::NotFound(_))
        ));

        assert!(h.events.wait_for(3, Duration::from_secs(1)).await);
        assert_eq!(
            h.events.kinds(),
            vec![
                SchedulerEventKind::Created,
                SchedulerEventKind::Updated,
                SchedulerEventKind::Deleted
            ]
        );
    }

    #[tokio::test]
    async fn test_second_trigger_while_executing_is_skipped() {
        let h = harness(Arc::new(SlowStage::new("slow", Duration::from_millis(100))));
        let schedule = h.scheduler.create(nightly()).await.unwrap();

        let first = h.scheduler.trigger(&schedule.id).await.unwrap();
        let second = h.scheduler.trigger(&schedule.id).await.unwrap();
        assert!(h.scheduler.is_running(&schedule.id));
        assert!(matches!(second, TriggerOutcome::AlreadyRunning));

        let TriggerOutcome::Started(handle) = first else {
            panic!("first trigger should start a run");
        };
        let result = handle.await.unwrap();
        assert!(result.success);
        assert!(!h.scheduler.is_running(&schedule.id));

        assert!(h.events.wait_for(3, Duration::from_secs(1)).await);
        let executing = h
            .events
            .kinds()
            .into_iter()
            .filter(|k| *k == SchedulerEventKind::Executing)
            .count();
        assert_eq!(executing, 1);

        // Free again once the first run finished.
        assert!(h.scheduler.trigger(&schedule.id).await.unwrap().is_started());
    }

    #[tokio::test]
    async fn test_failure_records_result_and_advances() {
        let h = harness(Arc::new(FailingStage::new("boom", "store exploded")));
        let schedule = h.scheduler.create(nightly()).await.unwrap();

        let TriggerOutcome::Started(handle) = h.scheduler.trigger(&schedule.id).await.unwrap() else {
            panic!("expected a run");
        };
        let result = handle.await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("store exploded"));

        let stored = h.scheduler.get(&schedule.id).await.unwrap().unwrap();
        assert!(stored.last_run_at.is_some());
        assert_eq!(stored.last_result, Some(result.clone()));
        assert!(stored.next_run_at.unwrap() > Utc::now());

        let record = h.history.get(result.history_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);

        assert!(h.events.wait_for(3, Duration::from_secs(1)).await);
        let failed = h.events.of_kind(SchedulerEventKind::Failed);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.is_some());
    }

    #[tokio::test]
    async fn test_tick_runs_only_due_active_schedules() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let due = h.scheduler.create(nightly()).await.unwrap();
        let inactive = h.scheduler.create(nightly().active(false)).await.unwrap();

        let later = due.next_run_at.unwrap() + ChronoDuration::seconds(1);
        let started = h.scheduler.tick(later).await.unwrap();
        assert_eq!(started, vec![due.id.clone()]);
        assert!(!started.contains(&inactive.id));

        assert!(h.scheduler.tick(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_defaults_creates_missing_only() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let config = SchedulerConfig::default();

        let created = h.scheduler.ensure_defaults(&config).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].pipeline_type, PipelineType::SitemapGeneration);
        assert!(h.scheduler.ensure_defaults(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let h = harness(Arc::new(SlowStage::new("s", Duration::ZERO)));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(h.scheduler.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
