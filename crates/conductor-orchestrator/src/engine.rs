use crate::config::OrchestratorConfig;
use crate::deps::{check_dependencies, DependencyCheck, DependencyTracker, Unblocked};
use crate::effects::SideWrites;
use crate::entry::QueueEntry;
use crate::metrics::{Gauges, Metrics, MetricsSnapshot};
use crate::priority::{DecisionMatrix, PriorityClassifier};
use crate::queue::{PriorityQueue, QueuedTaskView};
use crate::recovery::RecoveryStats;
use crate::retry::RetryPolicy;
use crate::scheduler::{ScheduleBook, ScheduleView};
use chrono::Utc;
use conductor_channels::Notifier;
use conductor_core::{
    short_id, ConductorError, ConductorResult, Executor, Submission, TaskId, TaskRecord,
    TaskStatus, TaskUpdate,
};
use conductor_memory::{HistoryHit, HistorySink};
use conductor_store::{StatusCache, TaskFilter, TaskStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of results returned by [`Orchestrator::search_similar`].
const SIMILAR_LIMIT: usize = 5;
/// Minimum cosine score for [`Orchestrator::search_similar`].
const SIMILAR_THRESHOLD: f32 = 0.3;
/// Guarded cancel attempts before giving up on a task that keeps changing status.
const CANCEL_ATTEMPTS: usize = 5;

/// State shared by submission, dispatch, unblock and cascade.
///
/// Everything here sits behind one async mutex which is held across the
/// dependency lookups and cascade writes.
#[derive(Default)]
pub(crate) struct Coordination {
    pub(crate) deps: DependencyTracker,
    pub(crate) in_flight: HashMap<TaskId, InFlight>,
    pub(crate) backing_off: HashMap<TaskId, CancellationToken>,
    next_dispatch: u64,
}

/// One execution unit of a task. A task can be dispatched again (after an
/// API retry) while the previous unit is still finishing, so units are told
/// apart by `dispatch`.
pub(crate) struct InFlight {
    pub(crate) dispatch: u64,
    pub(crate) token: CancellationToken,
}

impl Coordination {
    /// Registers a new execution unit for `id`, replacing any older one.
    pub(crate) fn track(&mut self, id: TaskId, token: CancellationToken) -> u64 {
        self.next_dispatch += 1;
        let dispatch = self.next_dispatch;
        self.in_flight.insert(id, InFlight { dispatch, token });
        dispatch
    }

    /// Unregisters `id` if `dispatch` is still its current unit.
    pub(crate) fn release(&mut self, id: TaskId, dispatch: u64) -> bool {
        if self
            .in_flight
            .get(&id)
            .is_some_and(|unit| unit.dispatch == dispatch)
        {
            self.in_flight.remove(&id);
            true
        } else {
            false
        }
    }
}

/// Where an accepted entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Queued,
    Blocked,
    Cancelled,
}

pub(crate) struct Inner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) side: SideWrites,
    pub(crate) classifier: PriorityClassifier,
    pub(crate) retry: RetryPolicy,
    pub(crate) queue: PriorityQueue,
    pub(crate) metrics: Metrics,
    pub(crate) schedules: ScheduleBook,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) running: AtomicBool,
    pub(crate) shutdown: parking_lot::Mutex<CancellationToken>,
    pub(crate) handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    pub(crate) state: Mutex<Coordination>,
}

/// Builds an [`Orchestrator`] from its collaborators.
///
/// Only the store and the executor are required. Without a cache, history
/// sink or notifier the corresponding best-effort writes are skipped.
pub struct OrchestratorBuilder {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn Executor>,
    config: OrchestratorConfig,
    cache: Option<Arc<dyn StatusCache>>,
    history: Option<Arc<dyn HistorySink>>,
    notifier: Option<Arc<dyn Notifier>>,
    matrix: Option<DecisionMatrix>,
}

impl OrchestratorBuilder {
    /// Starts a builder with default configuration.
    pub fn new(store: Arc<dyn TaskStore>, executor: Arc<dyn Executor>) -> Self {
        Self {
            store,
            executor,
            config: OrchestratorConfig::default(),
            cache: None,
            history: None,
            notifier: None,
            matrix: None,
        }
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a status cache.
    pub fn cache(mut self, cache: Arc<dyn StatusCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches a history sink.
    pub fn history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// Attaches a notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Uses `matrix` instead of the configured decision rules.
    pub fn decision_matrix(mut self, matrix: DecisionMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Validates the configuration and assembles the orchestrator.
    pub fn build(self) -> ConductorResult<Orchestrator> {
        let config = self.config;
        if config.max_concurrent == 0 {
            return Err(ConductorError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if config.recovery_page_size == 0 {
            return Err(ConductorError::Config(
                "recovery_page_size must be at least 1".to_string(),
            ));
        }
        let matrix = self
            .matrix
            .unwrap_or_else(|| DecisionMatrix::with_overrides(&config.decision_rules));
        let side = SideWrites::new(
            self.cache,
            self.history,
            self.notifier,
            config.cache_ttl(),
            config.history_collection.clone(),
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                executor: self.executor,
                side,
                classifier: PriorityClassifier::new(matrix),
                retry: config.retry,
                queue: PriorityQueue::new(),
                metrics: Metrics::new(),
                schedules: ScheduleBook::new(),
                permits: Arc::new(Semaphore::new(config.max_concurrent)),
                running: AtomicBool::new(false),
                shutdown: parking_lot::Mutex::new(CancellationToken::new()),
                handles: parking_lot::Mutex::new(Vec::new()),
                state: Mutex::new(Coordination::default()),
                config,
            }),
        })
    }
}

/// Accepts submissions, orders them by priority and runs them through an
/// [`Executor`] under a concurrency ceiling.
///
/// Cloning is cheap; every clone drives the same engine.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    /// Shorthand for [`OrchestratorBuilder::new`].
    pub fn builder(store: Arc<dyn TaskStore>, executor: Arc<dyn Executor>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store, executor)
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Whether the dispatch and scheduler loops are running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Persists a submission and queues it, or parks it behind its dependencies.
    ///
    /// Returns as soon as the task is accepted. A dependency that already
    /// failed or was cancelled cancels the new task on the spot.
    pub async fn submit(&self, submission: Submission) -> ConductorResult<TaskRecord> {
        submission.validate()?;
        let record = self.inner.store.create_task(&submission).await?;
        let priority = self
            .inner
            .classifier
            .classify(submission.risk, submission.urgency);
        let entry = QueueEntry::new(record.id, priority, submission);

        self.inner.side.cache_status(&record, Some(priority)).await;
        let admission = self.admit(entry).await?;
        self.inner.metrics.record_submitted();

        info!(
            task_id = %record.id,
            priority = %priority,
            origin = %record.origin,
            admission = ?admission,
            "Task submitted"
        );

        if admission == Admission::Cancelled {
            return Ok(self.inner.store.get_task(record.id).await?.unwrap_or(record));
        }
        Ok(record)
    }

    /// Fetches a persisted task.
    pub async fn get_task(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        self.inner.store.get_task(id).await
    }

    /// Lists persisted tasks, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> ConductorResult<Vec<TaskRecord>> {
        self.inner.store.list_tasks(filter).await
    }

    /// Cancels a task wherever it is: queued, parked, backing off or executing.
    ///
    /// Terminal tasks are returned unchanged. Every transitive dependent is
    /// cancelled as well.
    pub async fn cancel(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        for _ in 0..CANCEL_ATTEMPTS {
            let Some(record) = self.inner.store.get_task(id).await? else {
                return Ok(None);
            };
            if record.status.is_terminal() {
                debug!(task_id = %id, status = %record.status, "Cancel on finished task ignored");
                return Ok(Some(record));
            }

            {
                let mut state = self.inner.state.lock().await;
                if let Some(unit) = state.in_flight.get(&id) {
                    unit.token.cancel();
                }
                if let Some(token) = state.backing_off.remove(&id) {
                    token.cancel();
                }
                state.deps.forget(id);
            }
            self.inner.queue.remove(id);

            let update = TaskUpdate::status(TaskStatus::Cancelled)
                .message("cancelled by request")
                .success(false)
                .only_if(record.status);
            match self.inner.store.update_task(id, update).await {
                Ok(Some(cancelled)) => {
                    self.inner.side.clear(id).await;
                    self.inner.metrics.record_cancelled();
                    info!(task_id = %id, previous = %record.status, "Task cancelled");
                    self.cascade(id).await?;
                    return Ok(Some(cancelled));
                }
                Ok(None) => return Ok(None),
                Err(ConductorError::StatusConflict { actual, .. }) => {
                    debug!(task_id = %id, status = %actual, "Status moved during cancel, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ConductorError::Orchestrator(format!(
            "task {id} kept changing status while being cancelled"
        )))
    }

    /// Puts a FAILED task back in the queue with a fresh retry budget.
    ///
    /// Any other status is returned unchanged.
    pub async fn retry(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        let Some(record) = self.inner.store.get_task(id).await? else {
            return Ok(None);
        };
        if record.status != TaskStatus::Failed {
            warn!(task_id = %id, status = %record.status, "Only failed tasks can be retried");
            return Ok(Some(record));
        }

        let update = TaskUpdate::status(TaskStatus::Pending)
            .clear_result()
            .only_if(TaskStatus::Failed);
        let record = match self.inner.store.update_task(id, update).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(ConductorError::StatusConflict { .. }) => {
                return self.inner.store.get_task(id).await;
            }
            Err(e) => return Err(e),
        };

        let priority = self.inner.classifier.classify(record.risk, record.urgency);
        let entry = QueueEntry::new(id, priority, record.to_submission("retry"));
        self.inner.queue.push(entry);
        self.inner.side.cache_status(&record, Some(priority)).await;
        info!(task_id = %id, priority = %priority, "Failed task requeued");
        Ok(Some(record))
    }

    /// Registers a recurring submission; see [`parse_interval`](crate::parse_interval).
    pub fn schedule(
        &self,
        submission: Submission,
        expression: &str,
        id: Option<String>,
    ) -> ConductorResult<String> {
        let id = self.inner.schedules.add(submission, expression, id)?;
        info!(schedule = %id, every = %expression.trim(), "Schedule registered");
        Ok(id)
    }

    /// Removes a recurring submission.
    pub fn unschedule(&self, id: &str) -> bool {
        let removed = self.inner.schedules.remove(id);
        if removed {
            info!(schedule = %id, "Schedule removed");
        }
        removed
    }

    /// Registered schedules.
    pub fn schedules(&self) -> Vec<ScheduleView> {
        self.inner.schedules.list()
    }

    /// Counters and gauges.
    pub async fn metrics(&self) -> MetricsSnapshot {
        let state = self.inner.state.lock().await;
        let gauges = Gauges {
            queue_depth: self.inner.queue.len(),
            blocked: state.deps.blocked_count(),
            in_flight: state.in_flight.len(),
        };
        drop(state);
        self.inner.metrics.snapshot(gauges)
    }

    /// Past outcomes similar to `query`.
    pub async fn search_similar(&self, query: &str) -> Vec<HistoryHit> {
        self.inner
            .side
            .search(query, SIMILAR_LIMIT, SIMILAR_THRESHOLD)
            .await
    }

    /// Queued entries in dequeue order.
    pub fn queue_snapshot(&self) -> Vec<QueuedTaskView> {
        self.inner.queue.snapshot()
    }

    /// Recovers persisted work, then starts the dispatcher and scheduler loops.
    pub async fn start(&self) -> ConductorResult<RecoveryStats> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ConductorError::Orchestrator(
                "orchestrator is already running".to_string(),
            ));
        }

        let shutdown = CancellationToken::new();
        *self.inner.shutdown.lock() = shutdown.clone();

        let stats = match self.recover().await {
            Ok(stats) => stats,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                shutdown.cancel();
                return Err(e);
            }
        };

        let dispatcher = {
            let this = self.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { this.dispatch_loop(token).await })
        };
        let scheduler = {
            let this = self.clone();
            tokio::spawn(async move { this.scheduler_loop(shutdown).await })
        };
        self.inner.handles.lock().extend([dispatcher, scheduler]);

        info!(
            max_concurrent = self.inner.config.max_concurrent,
            downgraded = stats.downgraded,
            requeued = stats.requeued,
            blocked = stats.blocked,
            cancelled = stats.cancelled,
            "Orchestrator started"
        );
        Ok(stats)
    }

    /// Stops dispatching and waits up to the grace period for executions in flight.
    ///
    /// Queued and parked work stays PENDING in the store.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.lock().cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }

        let all = u32::try_from(self.inner.config.max_concurrent).unwrap_or(u32::MAX);
        match tokio::time::timeout(
            self.inner.config.shutdown_grace(),
            self.inner.permits.acquire_many(all),
        )
        .await
        {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(e)) => warn!(error = %e, "Permit pool closed during shutdown"),
            Err(_) => {
                let in_flight = self.inner.state.lock().await.in_flight.len();
                warn!(in_flight, "Shutdown grace elapsed with executions still running");
            }
        }
        info!(queued = self.inner.queue.len(), "Orchestrator stopped");
    }

    /// Submits every schedule that is due now. Returns how many were submitted.
    ///
    /// A schedule whose submission fails stays due and is tried again next tick.
    pub(crate) async fn fire_due_schedules(&self) -> usize {
        let now = Utc::now();
        let mut fired = 0;
        for (id, template) in self.inner.schedules.due(now) {
            match self.submit(template.with_origin("scheduler")).await {
                Ok(record) => {
                    self.inner.schedules.mark_fired(&id, now);
                    fired += 1;
                    info!(schedule = %id, task_id = %record.id, "Scheduled task submitted");
                }
                Err(e) => warn!(schedule = %id, error = %e, "Scheduled submission failed"),
            }
        }
        fired
    }

    async fn scheduler_loop(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.scheduler_tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.fire_due_schedules().await;
                    self.inner.side.purge_cache().await;
                }
            }
        }
        debug!("Scheduler loop exited");
    }

    /// Routes an entry to the queue, the dependency tracker or straight to CANCELLED.
    pub(crate) async fn admit(&self, entry: QueueEntry) -> ConductorResult<Admission> {
        let id = entry.id;
        let mut state = self.inner.state.lock().await;
        match check_dependencies(self.inner.store.as_ref(), &entry.submission.depends_on).await? {
            DependencyCheck::Ready => {
                self.inner.queue.push(entry);
                Ok(Admission::Queued)
            }
            DependencyCheck::Blocked(unmet) => {
                debug!(task_id = %id, waiting_on = unmet.len(), "Task parked on dependencies");
                let parked = entry.clone();
                state.deps.block(entry, unmet);
                drop(state);
                self.inner.side.cache_parked(&parked).await;
                Ok(Admission::Blocked)
            }
            DependencyCheck::Doomed(blocker) => {
                drop(state);
                let update = TaskUpdate::status(TaskStatus::Cancelled)
                    .message(format!("dependency {} did not complete", short_id(&blocker)))
                    .success(false)
                    .only_if(TaskStatus::Pending);
                if settled(id, self.inner.store.update_task(id, update).await)?.is_some() {
                    self.inner.metrics.record_cancelled();
                    self.inner.side.clear(id).await;
                    info!(task_id = %id, blocker = %blocker, "Task cancelled, dependency already finished unsuccessfully");
                }
                Ok(Admission::Cancelled)
            }
        }
    }

    /// Releases dependents of a completed task into the queue.
    pub(crate) async fn unblock(&self, completed: TaskId) -> ConductorResult<usize> {
        let mut state = self.inner.state.lock().await;
        let released = state.deps.resolve(completed);
        let count = released.len();
        for Unblocked { id, entry } in released {
            let entry = match entry {
                Some(entry) => Some(entry),
                None => match self.inner.side.parked_entry(id).await {
                    Some(entry) => Some(entry),
                    None => self.rebuild_entry(id).await?,
                },
            };
            match entry {
                Some(entry) => {
                    debug!(task_id = %id, after = %completed, "Dependent released");
                    self.inner.queue.push(entry);
                }
                None => warn!(task_id = %id, "Released dependent is no longer pending"),
            }
            self.inner.side.clear_parked(id).await;
        }
        Ok(count)
    }

    /// Cancels every transitive dependent of `root`.
    ///
    /// All dependents are visited even when a store write fails; the first
    /// such error is returned afterwards.
    pub(crate) async fn cascade(&self, root: TaskId) -> ConductorResult<usize> {
        let mut state = self.inner.state.lock().await;
        let doomed = state.deps.cascade(root);
        let mut cancelled = 0;
        let mut first_error = None;

        for (dependent, blocker) in doomed {
            let update = TaskUpdate::status(TaskStatus::Cancelled)
                .message(format!("dependency {} did not complete", short_id(&blocker)))
                .success(false)
                .only_if(TaskStatus::Pending);
            match settled(dependent, self.inner.store.update_task(dependent, update).await) {
                Ok(Some(_)) => {
                    cancelled += 1;
                    self.inner.metrics.record_cancelled();
                    self.inner.side.clear(dependent).await;
                    info!(task_id = %dependent, blocker = %blocker, "Dependent cancelled");
                }
                Ok(None) => {}
                Err(e) => {
                    error!(task_id = %dependent, error = %e, "Could not cancel dependent");
                    first_error.get_or_insert(e);
                }
            }
        }
        drop(state);

        match first_error {
            Some(e) => Err(e),
            None => Ok(cancelled),
        }
    }

    async fn rebuild_entry(&self, id: TaskId) -> ConductorResult<Option<QueueEntry>> {
        let Some(record) = self.inner.store.get_task(id).await? else {
            return Ok(None);
        };
        if record.status != TaskStatus::Pending {
            return Ok(None);
        }
        let priority = self.inner.classifier.classify(record.risk, record.urgency);
        let submission = record.to_submission(record.origin.clone());
        Ok(Some(QueueEntry::new(id, priority, submission)))
    }
}

/// Turns a guarded-update conflict into `Ok(None)`.
///
/// A conflict means another path already moved the task on, which is not an
/// error for the caller.
pub(crate) fn settled(
    id: TaskId,
    result: ConductorResult<Option<TaskRecord>>,
) -> ConductorResult<Option<TaskRecord>> {
    match result {
        Err(ConductorError::StatusConflict {
            expected, actual, ..
        }) => {
            debug!(task_id = %id, %expected, %actual, "Task moved on, update skipped");
            Ok(None)
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use async_trait::async_trait;
    use conductor_core::{ExecutionOutcome, ExecutionRequest, RiskLevel, UrgencyLevel};
    use conductor_store::{InMemoryStatusCache, InMemoryTaskStore};
    use std::sync::atomic::AtomicUsize;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn run(
            &self,
            _request: ExecutionRequest,
            _cancel: CancellationToken,
        ) -> ConductorResult<ExecutionOutcome> {
            Ok(ExecutionOutcome::success("ok"))
        }
    }

    /// Rejects the first `failures` creations of `description`.
    struct FlakyStore {
        inner: InMemoryTaskStore,
        description: &'static str,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn create_task(&self, submission: &Submission) -> ConductorResult<TaskRecord> {
            if submission.description == self.description
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(ConductorError::Store("disk full".into()));
            }
            self.inner.create_task(submission).await
        }

        async fn get_task(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
            self.inner.get_task(id).await
        }

        async fn update_task(
            &self,
            id: TaskId,
            changes: TaskUpdate,
        ) -> ConductorResult<Option<TaskRecord>> {
            self.inner.update_task(id, changes).await
        }

        async fn list_tasks(&self, filter: &TaskFilter) -> ConductorResult<Vec<TaskRecord>> {
            self.inner.list_tasks(filter).await
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<InMemoryTaskStore>, Arc<InMemoryStatusCache>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let cache = Arc::new(InMemoryStatusCache::new());
        let orch = Orchestrator::builder(store.clone(), Arc::new(Noop))
            .cache(cache.clone())
            .build()
            .unwrap();
        (orch, store, cache)
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Orchestrator::builder(Arc::new(InMemoryTaskStore::new()), Arc::new(Noop))
            .config(OrchestratorConfig {
                max_concurrent: 0,
                ..OrchestratorConfig::default()
            })
            .build();
        assert!(matches!(result, Err(ConductorError::Config(_))));
    }

    #[tokio::test]
    async fn test_blank_submission_has_no_effect() {
        let (orch, store, _) = orchestrator();
        let err = orch.submit(Submission::new("   ")).await.unwrap_err();
        assert!(matches!(err, ConductorError::InvalidInput(_)));
        assert!(store.is_empty().await);
        assert_eq!(orch.metrics().await.total_submitted, 0);
    }

    #[tokio::test]
    async fn test_submit_queues_by_priority_and_caches_status() {
        let (orch, _, cache) = orchestrator();
        let low = orch.submit(Submission::new("tidy logs")).await.unwrap();
        let critical = orch
            .submit(
                Submission::new("contain breach")
                    .with_risk(RiskLevel::High)
                    .with_urgency(UrgencyLevel::High),
            )
            .await
            .unwrap();

        let snapshot = orch.queue_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, critical.id);
        assert_eq!(snapshot[0].priority, Priority::Critical);
        assert_eq!(snapshot[1].id, low.id);

        let cached = cache.get_status(&low.id.to_string()).await.unwrap().unwrap();
        assert_eq!(cached["status"], "pending");
        assert_eq!(cached["origin"], "api");
        assert_eq!(orch.metrics().await.total_submitted, 2);
    }

    #[tokio::test]
    async fn test_blocked_submission_is_parked_not_queued() {
        let (orch, _, cache) = orchestrator();
        let first = orch.submit(Submission::new("build")).await.unwrap();
        let second = orch
            .submit(Submission::new("deploy").with_dependencies([first.id]))
            .await
            .unwrap();

        assert_eq!(orch.queue_snapshot().len(), 1);
        assert!(orch.inner.state.lock().await.deps.is_blocked(second.id));
        let parked = cache
            .get_status(&format!("{}:queued", second.id))
            .await
            .unwrap();
        assert!(parked.is_some());

        let metrics = orch.metrics().await;
        assert_eq!(metrics.by_status["pending"], 2);
    }

    #[tokio::test]
    async fn test_dependency_on_failed_task_cancels_immediately() {
        let (orch, store, _) = orchestrator();
        let broken = orch.submit(Submission::new("broken")).await.unwrap();
        store
            .update_task(broken.id, TaskUpdate::status(TaskStatus::Failed))
            .await
            .unwrap();

        let record = orch
            .submit(Submission::new("after").with_dependencies([broken.id]))
            .await
            .unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(
            record.result_message.as_deref(),
            Some(format!("dependency {} did not complete", short_id(&broken.id)).as_str())
        );
        assert_eq!(orch.metrics().await.total_cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_queued_task_cascades_to_dependents() {
        let (orch, _, cache) = orchestrator();
        let root = orch.submit(Submission::new("root")).await.unwrap();
        let child = orch
            .submit(Submission::new("child").with_dependencies([root.id]))
            .await
            .unwrap();
        let grandchild = orch
            .submit(Submission::new("grandchild").with_dependencies([child.id]))
            .await
            .unwrap();

        let cancelled = orch.cancel(root.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.result_message.as_deref(), Some("cancelled by request"));
        assert!(orch.queue_snapshot().is_empty());
        assert!(cache.get_status(&root.id.to_string()).await.unwrap().is_none());

        for id in [child.id, grandchild.id] {
            let record = orch.get_task(id).await.unwrap().unwrap();
            assert_eq!(record.status, TaskStatus::Cancelled);
        }
        let metrics = orch.metrics().await;
        assert_eq!(metrics.total_cancelled, 3);
        assert_eq!(metrics.by_status["pending"], 0);

        let again = orch.cancel(root.id).await.unwrap().unwrap();
        assert_eq!(again.updated_at, cancelled.updated_at);
        assert_eq!(orch.metrics().await.total_cancelled, 3);
    }

    #[tokio::test]
    async fn test_cancel_and_retry_unknown_ids() {
        let (orch, _, _) = orchestrator();
        let ghost = uuid::Uuid::new_v4();
        assert!(orch.cancel(ghost).await.unwrap().is_none());
        assert!(orch.retry(ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_only_from_failed() {
        let (orch, store, _) = orchestrator();
        let record = orch
            .submit(Submission::new("flaky").with_risk(RiskLevel::Medium))
            .await
            .unwrap();

        let unchanged = orch.retry(record.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Pending);
        assert_eq!(orch.queue_snapshot().len(), 1);

        orch.inner.queue.remove(record.id);
        store
            .update_task(
                record.id,
                TaskUpdate::status(TaskStatus::Failed)
                    .message("boom")
                    .success(false),
            )
            .await
            .unwrap();

        let retried = orch.retry(record.id).await.unwrap().unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert!(retried.result_message.is_none());
        assert!(retried.result_success.is_none());

        let entry = orch.inner.queue.try_pop().unwrap();
        assert_eq!(entry.id, record.id);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.submission.origin, "retry");
    }

    #[tokio::test]
    async fn test_unblock_releases_parked_dependent() {
        let (orch, _, _) = orchestrator();
        let first = orch.submit(Submission::new("first")).await.unwrap();
        let second = orch
            .submit(Submission::new("second").with_dependencies([first.id]))
            .await
            .unwrap();
        orch.inner.queue.remove(first.id);

        assert_eq!(orch.unblock(first.id).await.unwrap(), 1);
        assert_eq!(orch.inner.queue.try_pop().unwrap().id, second.id);
        assert_eq!(orch.unblock(first.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_entry_only_for_pending_records() {
        let (orch, store, _) = orchestrator();
        let record = orch
            .submit(Submission::new("rebuild me").with_risk(RiskLevel::High))
            .await
            .unwrap();

        let entry = orch.rebuild_entry(record.id).await.unwrap().unwrap();
        assert_eq!(entry.id, record.id);
        assert_eq!(entry.priority, Priority::Medium);
        assert_eq!(entry.submission.description, "rebuild me");

        store
            .update_task(record.id, TaskUpdate::status(TaskStatus::Completed))
            .await
            .unwrap();
        assert!(orch.rebuild_entry(record.id).await.unwrap().is_none());
        assert!(orch.rebuild_entry(uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schedules_fire_once_per_interval() {
        let (orch, store, _) = orchestrator();
        orch.schedule(Submission::new("rotate"), "every_1h", Some("rotate".into()))
            .unwrap();
        assert!(orch.schedule(Submission::new("bad"), "hourly", None).is_err());

        assert_eq!(orch.fire_due_schedules().await, 1);
        assert_eq!(orch.fire_due_schedules().await, 0);

        let records = store.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, "scheduler");

        assert_eq!(orch.schedules().len(), 1);
        assert!(orch.unschedule("rotate"));
        assert!(orch.schedules().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let (orch, _, _) = orchestrator();
        orch.start().await.unwrap();
        assert!(matches!(
            orch.start().await,
            Err(ConductorError::Orchestrator(_))
        ));
        orch.stop().await;
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_failed_scheduled_submission_stays_due() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryTaskStore::new(),
            description: "check disk",
            failures: AtomicUsize::new(1),
        });
        let orch = Orchestrator::builder(store.clone(), Arc::new(Noop))
            .build()
            .unwrap();
        orch.schedule(Submission::new("check disk"), "every_15m", Some("disk".into()))
            .unwrap();
        orch.schedule(Submission::new("check certs"), "every_1h", Some("certs".into()))
            .unwrap();

        assert_eq!(orch.fire_due_schedules().await, 1);
        let views = orch.schedules();
        assert!(views.iter().find(|v| v.id == "disk").unwrap().last_run.is_none());
        assert!(views.iter().find(|v| v.id == "certs").unwrap().last_run.is_some());

        assert_eq!(orch.fire_due_schedules().await, 1);
        assert_eq!(orch.fire_due_schedules().await, 0);

        let mut described: Vec<String> = store
            .list_tasks(&TaskFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.description)
            .collect();
        described.sort();
        assert_eq!(described, vec!["check certs", "check disk"]);
    }

    #[test]
    fn test_release_ignores_superseded_dispatch() {
        let mut state = Coordination::default();
        let id = uuid::Uuid::new_v4();
        let first = state.track(id, CancellationToken::new());
        let second = state.track(id, CancellationToken::new());
        assert_ne!(first, second);

        assert!(!state.release(id, first));
        assert_eq!(state.in_flight.len(), 1);
        assert!(state.release(id, second));
        assert!(state.in_flight.is_empty());
        assert!(!state.release(id, second));
    }
}
