use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters of one orchestrator.
#[derive(Debug, Default)]
pub struct Metrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    by_executor: Mutex<HashMap<String, u64>>,
}

/// Point-in-time view returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted.
    pub total_submitted: u64,
    /// Tasks completed.
    pub total_completed: u64,
    /// Tasks that failed terminally.
    pub total_failed: u64,
    /// Tasks cancelled, directly or through a dependency.
    pub total_cancelled: u64,
    /// Entries waiting in the queue.
    pub queue_depth: usize,
    /// Tasks currently executing.
    pub in_flight: usize,
    /// completed / (completed + failed), 0 before any terminal outcome.
    pub success_rate: f64,
    /// Completed tasks per executor.
    pub by_executor: BTreeMap<String, u64>,
    /// Counts by status.
    pub by_status: BTreeMap<String, u64>,
}

/// Live gauges sampled by the orchestrator when taking a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    /// Entries in the queue.
    pub queue_depth: usize,
    /// Tasks parked on dependencies.
    pub blocked: usize,
    /// Tasks executing.
    pub in_flight: usize,
}

impl Metrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an accepted submission.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a completion, attributed to `executor` when known.
    pub fn record_completed(&self, executor: Option<&str>) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(name) = executor {
            *self.by_executor.lock().entry(name.to_string()).or_insert(0) += 1;
        }
    }

    /// Counts a terminal failure.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a cancellation.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Combines counters with live gauges.
    pub fn snapshot(&self, gauges: Gauges) -> MetricsSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);

        let finished = completed + failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            completed as f64 / finished as f64
        };

        let by_status = BTreeMap::from([
            ("pending".to_string(), (gauges.queue_depth + gauges.blocked) as u64),
            ("running".to_string(), gauges.in_flight as u64),
            ("completed".to_string(), completed),
            ("failed".to_string(), failed),
            ("cancelled".to_string(), cancelled),
        ]);

        MetricsSnapshot {
            total_submitted: submitted,
            total_completed: completed,
            total_failed: failed,
            total_cancelled: cancelled,
            queue_depth: gauges.queue_depth,
            in_flight: gauges.in_flight,
            success_rate,
            by_executor: self
                .by_executor
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            by_status,
        }
    }
}
