use crate::engine::{settled, Orchestrator};
use crate::entry::QueueEntry;
use crate::retry::RetryDecision;
use conductor_core::{
    ConductorResult, ExecutionOutcome, ExecutionRequest, TaskRecord, TaskStatus, TaskUpdate,
};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executor name recorded when a submission carries no hint.
pub const DEFAULT_EXECUTOR: &str = "default";

/// How one execution unit ended.
enum Settled {
    /// Reached a terminal state or was dropped; the unit cleans up after itself.
    Done,
    /// Handed over to a backoff timer, which now owns the task.
    BackingOff,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "executor panicked".to_string()
    }
}

fn unexpected(text: String) -> ExecutionOutcome {
    ExecutionOutcome::failure(format!("Unexpected error: {text}"), vec![text])
}

impl Orchestrator {
    /// Pops entries and hands each to its own execution unit once a permit is free.
    pub(crate) async fn dispatch_loop(self, shutdown: CancellationToken) {
        let inner = &self.inner;
        debug!("Dispatcher loop started");
        loop {
            let popped = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                popped = inner.queue.pop_timeout(inner.config.dequeue_timeout()) => popped,
            };
            let Some(entry) = popped else {
                continue;
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    inner.queue.push(entry);
                    break;
                }
                permit = inner.permits.clone().acquire_owned() => permit,
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Permit pool closed, dispatcher exiting");
                    inner.queue.push(entry);
                    break;
                }
            };

            let token = CancellationToken::new();
            let dispatch = inner.state.lock().await.track(entry.id, token.clone());
            let unit = self.clone();
            tokio::spawn(async move { unit.execute(entry, dispatch, token, permit).await });
        }
        debug!(queued = inner.queue.len(), "Dispatcher loop exited");
    }

    async fn execute(
        self,
        entry: QueueEntry,
        dispatch: u64,
        token: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) {
        let id = entry.id;
        let settled = match self.run_entry(entry, dispatch, &token).await {
            Ok(settled) => settled,
            Err(e) => {
                error!(task_id = %id, error = %e, "Execution unit failed");
                Settled::Done
            }
        };
        if matches!(settled, Settled::Done) {
            self.inner.state.lock().await.release(id, dispatch);
        }
        drop(permit);
    }

    async fn run_entry(
        &self,
        entry: QueueEntry,
        dispatch: u64,
        token: &CancellationToken,
    ) -> ConductorResult<Settled> {
        let id = entry.id;
        let executor = entry
            .submission
            .target_executor
            .clone()
            .unwrap_or_else(|| DEFAULT_EXECUTOR.to_string());

        let start = TaskUpdate::status(TaskStatus::Running)
            .executor(Some(executor.clone()))
            .only_if(TaskStatus::Pending);
        if settled(id, self.inner.store.update_task(id, start).await)?.is_none() {
            debug!(task_id = %id, "Dispatched entry is no longer pending, dropped");
            return Ok(Settled::Done);
        }

        info!(
            task_id = %id,
            priority = %entry.priority,
            executor = %executor,
            attempt = entry.retry_count,
            "Executing task"
        );
        let request = ExecutionRequest::from_submission(id, &entry.submission, entry.retry_count);
        let call = AssertUnwindSafe(self.inner.executor.run(request, token.clone())).catch_unwind();

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                info!(task_id = %id, "Execution abandoned after cancellation");
                return Ok(Settled::Done);
            }
            result = call => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => unexpected(e.to_string()),
                Err(panic) => unexpected(panic_message(panic.as_ref())),
            },
        };

        if outcome.success {
            self.on_success(&entry, outcome).await?;
            Ok(Settled::Done)
        } else {
            self.on_failure(entry, dispatch, outcome).await
        }
    }

    async fn on_success(&self, entry: &QueueEntry, outcome: ExecutionOutcome) -> ConductorResult<()> {
        let id = entry.id;
        let update = TaskUpdate::status(TaskStatus::Completed)
            .message(outcome.message)
            .success(true)
            .errors(outcome.errors)
            .only_if(TaskStatus::Running);
        let Some(record) = settled(id, self.inner.store.update_task(id, update).await)? else {
            return Ok(());
        };

        info!(task_id = %id, executor = ?record.executor, "Task completed");
        self.inner.side.cache_status(&record, Some(entry.priority)).await;
        self.inner.side.record_outcome(&record).await;
        self.inner.metrics.record_completed(record.executor.as_deref());
        self.unblock(id).await?;
        Ok(())
    }

    async fn on_failure(
        &self,
        mut entry: QueueEntry,
        dispatch: u64,
        outcome: ExecutionOutcome,
    ) -> ConductorResult<Settled> {
        let id = entry.id;
        let max_retries = entry.submission.max_retries;
        match self.inner.retry.decide(entry.retry_count, max_retries) {
            RetryDecision::Retry { retry_count, delay } => {
                let update = TaskUpdate::status(TaskStatus::Pending)
                    .message(outcome.message.clone())
                    .success(false)
                    .errors(outcome.errors)
                    .only_if(TaskStatus::Running);
                if settled(id, self.inner.store.update_task(id, update).await)?.is_none() {
                    return Ok(Settled::Done);
                }

                warn!(
                    task_id = %id,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    message = %outcome.message,
                    "Task failed, retrying after backoff"
                );
                entry.retry_count = retry_count;
                let timer = CancellationToken::new();
                {
                    let mut state = self.inner.state.lock().await;
                    state.release(id, dispatch);
                    state.backing_off.insert(id, timer.clone());
                }
                let shutdown = self.inner.shutdown.lock().clone();
                let this = self.clone();
                tokio::spawn(async move { this.requeue_after(entry, delay, timer, shutdown).await });
                Ok(Settled::BackingOff)
            }
            RetryDecision::GiveUp => {
                let update = TaskUpdate::status(TaskStatus::Failed)
                    .message(outcome.message)
                    .success(false)
                    .errors(outcome.errors)
                    .only_if(TaskStatus::Running);
                let Some(record) = settled(id, self.inner.store.update_task(id, update).await)?
                else {
                    return Ok(Settled::Done);
                };
                self.finish_failed(&entry, &record).await?;
                Ok(Settled::Done)
            }
        }
    }

    async fn finish_failed(&self, entry: &QueueEntry, record: &TaskRecord) -> ConductorResult<()> {
        error!(
            task_id = %record.id,
            retries = entry.retry_count,
            message = record.result_message.as_deref().unwrap_or_default(),
            "Task failed permanently"
        );
        self.inner.side.cache_status(record, Some(entry.priority)).await;
        self.inner.side.record_outcome(record).await;
        self.inner.metrics.record_failed();
        let cascaded = self.cascade(record.id).await;
        self.inner.side.notify_failure(record).await;
        cascaded.map(|_| ())
    }

    /// Waits out a backoff, then pushes the entry back unless cancelled or shut down.
    async fn requeue_after(
        self,
        entry: QueueEntry,
        delay: Duration,
        timer: CancellationToken,
        shutdown: CancellationToken,
    ) {
        let elapsed = tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = timer.cancelled() => false,
            _ = shutdown.cancelled() => false,
        };

        let mut state = self.inner.state.lock().await;
        state.backing_off.remove(&entry.id);
        if elapsed && !timer.is_cancelled() && self.inner.running.load(Ordering::SeqCst) {
            debug!(task_id = %entry.id, retry = entry.retry_count, "Backoff elapsed, requeued");
            self.inner.queue.push(entry);
        }
    }
}
