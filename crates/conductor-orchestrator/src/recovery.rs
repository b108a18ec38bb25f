use crate::engine::{settled, Admission, Orchestrator};
use crate::entry::QueueEntry;
use conductor_core::{ConductorResult, TaskRecord, TaskStatus, TaskUpdate};
use conductor_store::TaskFilter;
use serde::Serialize;
use tracing::{info, warn};

/// What [`Orchestrator::start`] found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// RUNNING tasks reset to PENDING.
    pub downgraded: usize,
    /// PENDING tasks pushed onto the queue.
    pub requeued: usize,
    /// PENDING tasks parked behind unfinished dependencies.
    pub blocked: usize,
    /// PENDING tasks cancelled because a dependency already failed.
    pub cancelled: usize,
}

impl Orchestrator {
    /// Reloads persisted work left over from a previous process.
    ///
    /// RUNNING tasks were interrupted mid-execution and go back to PENDING.
    /// Every PENDING task not already held in memory gets a fresh entry
    /// with origin `recovery`, and its dependency edges are rebuilt.
    pub(crate) async fn recover(&self) -> ConductorResult<RecoveryStats> {
        let mut stats = RecoveryStats::default();

        for record in self.list_all(TaskStatus::Running).await? {
            let update = TaskUpdate::status(TaskStatus::Pending).only_if(TaskStatus::Running);
            if settled(record.id, self.inner.store.update_task(record.id, update).await)?.is_some() {
                stats.downgraded += 1;
            }
        }

        for record in self.list_all(TaskStatus::Pending).await? {
            if self.is_held(&record).await {
                continue;
            }
            let priority = self.inner.classifier.classify(record.risk, record.urgency);
            let entry = QueueEntry::new(record.id, priority, record.to_submission("recovery"));
            match self.admit(entry).await? {
                Admission::Queued => stats.requeued += 1,
                Admission::Blocked => stats.blocked += 1,
                Admission::Cancelled => stats.cancelled += 1,
            }
        }

        if stats != RecoveryStats::default() {
            info!(
                downgraded = stats.downgraded,
                requeued = stats.requeued,
                blocked = stats.blocked,
                cancelled = stats.cancelled,
                "Recovered persisted tasks"
            );
        }
        Ok(stats)
    }

    /// Whether an entry for this task already lives in memory.
    async fn is_held(&self, record: &TaskRecord) -> bool {
        let state = self.inner.state.lock().await;
        self.inner.queue.contains(record.id)
            || state.deps.is_blocked(record.id)
            || state.backing_off.contains_key(&record.id)
            || state.in_flight.contains_key(&record.id)
    }

    /// Collects every record with `status`, one page at a time.
    ///
    /// All pages are read before anything is modified so that status
    /// changes cannot shift the paging window.
    async fn list_all(&self, status: TaskStatus) -> ConductorResult<Vec<TaskRecord>> {
        let page_size = self.inner.config.recovery_page_size;
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let filter = TaskFilter::with_status(status).limit(page_size).offset(offset);
            let page = self.inner.store.list_tasks(&filter).await?;
            let fetched = page.len();
            records.extend(page);
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }
        if records.len() > page_size {
            warn!(status = %status, count = records.len(), "Large recovery backlog");
        }
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use async_trait::async_trait;
    use conductor_core::{
        ConductorResult, ExecutionOutcome, ExecutionRequest, Executor, Submission, TaskId,
    };
    use conductor_store::{InMemoryTaskStore, TaskStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

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

    fn orchestrator(store: Arc<InMemoryTaskStore>, page_size: usize) -> Orchestrator {
        Orchestrator::builder(store, Arc::new(Noop))
            .config(OrchestratorConfig {
                recovery_page_size: page_size,
                ..OrchestratorConfig::default()
            })
            .build()
            .unwrap()
    }

    async fn persisted(store: &InMemoryTaskStore, submission: Submission, status: TaskStatus) -> TaskId {
        let record = store.create_task(&submission).await.unwrap();
        store
            .update_task(record.id, TaskUpdate::status(status))
            .await
            .unwrap();
        record.id
    }

    #[tokio::test]
    async fn test_running_tasks_are_downgraded_and_requeued_across_pages() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(persisted(&store, Submission::new(format!("job {i}")), TaskStatus::Running).await);
        }
        persisted(&store, Submission::new("done"), TaskStatus::Completed).await;

        let orch = orchestrator(store.clone(), 2);
        let stats = orch.recover().await.unwrap();
        assert_eq!(stats.downgraded, 5);
        assert_eq!(stats.requeued, 5);

        for id in &ids {
            let record = store.get_task(*id).await.unwrap().unwrap();
            assert_eq!(record.status, TaskStatus::Pending);
        }
        let snapshot = orch.queue_snapshot();
        assert_eq!(snapshot.len(), 5);
        let entry = orch.inner.queue.try_pop().unwrap();
        assert_eq!(entry.submission.origin, "recovery");
        assert_eq!(entry.retry_count, 0);
    }

    #[tokio::test]
    async fn test_second_recovery_queues_nothing_twice() {
        let store = Arc::new(InMemoryTaskStore::new());
        persisted(&store, Submission::new("a"), TaskStatus::Pending).await;
        let orch = orchestrator(store, 1_000);

        assert_eq!(orch.recover().await.unwrap().requeued, 1);
        let again = orch.recover().await.unwrap();
        assert_eq!(again, RecoveryStats::default());
        assert_eq!(orch.queue_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_edges_are_rebuilt() {
        let store = Arc::new(InMemoryTaskStore::new());
        let done = persisted(&store, Submission::new("done"), TaskStatus::Completed).await;
        let waiting_on = persisted(&store, Submission::new("still running"), TaskStatus::Running).await;
        let failed = persisted(&store, Submission::new("failed"), TaskStatus::Failed).await;

        let ready = persisted(
            &store,
            Submission::new("ready").with_dependencies([done]),
            TaskStatus::Pending,
        )
        .await;
        let blocked = persisted(
            &store,
            Submission::new("blocked").with_dependencies([done, waiting_on]),
            TaskStatus::Pending,
        )
        .await;
        let doomed = persisted(
            &store,
            Submission::new("doomed").with_dependencies([failed]),
            TaskStatus::Pending,
        )
        .await;

        let orch = orchestrator(store.clone(), 1_000);
        let stats = orch.recover().await.unwrap();
        assert_eq!(
            stats,
            RecoveryStats {
                downgraded: 1,
                requeued: 2,
                blocked: 1,
                cancelled: 1,
            }
        );

        let queued: Vec<TaskId> = orch.queue_snapshot().iter().map(|v| v.id).collect();
        assert!(queued.contains(&ready));
        assert!(queued.contains(&waiting_on));
        assert!(orch.inner.state.lock().await.deps.is_blocked(blocked));
        assert_eq!(
            store.get_task(doomed).await.unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
    }
}
