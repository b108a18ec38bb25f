use crate::priority::Priority;
use chrono::{DateTime, Utc};
use conductor_core::{Submission, TaskId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// The in-memory, to-be-executed form of a submission.
///
/// Entries order by priority, then creation time, then insertion sequence.
/// A retried entry keeps its creation time and sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Identity shared with the persisted task record.
    pub id: TaskId,
    /// Dispatch priority.
    pub priority: Priority,
    /// The original submission.
    pub submission: Submission,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    sequence: u64,
}

impl QueueEntry {
    /// A fresh entry with no retries.
    pub fn new(id: TaskId, priority: Priority, submission: Submission) -> Self {
        Self {
            id,
            priority,
            submission,
            retry_count: 0,
            created_at: Utc::now(),
            sequence: NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    fn sort_key(&self) -> (Priority, DateTime<Utc>, u64, TaskId) {
        (self.priority, self.created_at, self.sequence, self.id)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
