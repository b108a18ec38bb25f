use crate::entry::QueueEntry;
use crate::priority::Priority;
use chrono::{DateTime, Utc};
use conductor_core::TaskId;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;

/// Read-only view of a queued entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTaskView {
    /// Task id.
    pub id: TaskId,
    /// Dispatch priority.
    pub priority: Priority,
    /// First 100 characters of the description.
    pub description: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl From<&QueueEntry> for QueuedTaskView {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id,
            priority: entry.priority,
            description: entry.submission.description.chars().take(100).collect(),
            retry_count: entry.retry_count,
            created_at: entry.created_at,
        }
    }
}

/// Thread-safe min-priority queue of [`QueueEntry`] with a bounded blocking pop.
#[derive(Default)]
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    available: Notify,
}

impl PriorityQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry and wakes one waiting consumer.
    pub fn push(&self, entry: QueueEntry) {
        self.heap.lock().push(Reverse(entry));
        self.available.notify_one();
    }

    /// Removes the most urgent entry without waiting.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.heap.lock().pop().map(|Reverse(entry)| entry)
    }

    /// Removes the most urgent entry, waiting at most `wait` for one to arrive.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<QueueEntry> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Removes the entry for `id`, if queued.
    pub fn remove(&self, id: TaskId) -> Option<QueueEntry> {
        let mut heap = self.heap.lock();
        let mut removed = None;
        heap.retain(|Reverse(entry)| {
            if entry.id == id && removed.is_none() {
                removed = Some(entry.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Whether an entry for `id` is queued.
    pub fn contains(&self, id: TaskId) -> bool {
        self.heap.lock().iter().any(|Reverse(entry)| entry.id == id)
    }

    /// Queued entries in dequeue order.
    pub fn snapshot(&self) -> Vec<QueuedTaskView> {
        let mut entries: Vec<QueueEntry> = self
            .heap
            .lock()
            .iter()
            .map(|Reverse(entry)| entry.clone())
            .collect();
        entries.sort();
        entries.iter().map(QueuedTaskView::from).collect()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
