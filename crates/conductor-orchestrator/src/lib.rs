//! Priority-ordered task orchestration with dependencies, retries and scheduling.
//!
//! Submissions are persisted through a [`TaskStore`](conductor_store::TaskStore),
//! classified into a [`Priority`] by a decision table, and dispatched to an
//! [`Executor`](conductor_core::Executor) by a single dispatcher loop under a
//! fixed number of permits. Failed attempts back off exponentially, failures
//! and cancellations cascade to dependents, and unfinished work is recovered
//! from the store on start.
//!
//! # Main types
//!
//! - [`Orchestrator`] — The engine: submit, cancel, retry, schedule, start, stop.
//! - [`OrchestratorBuilder`] — Wires the store, executor and optional side channels.
//! - [`OrchestratorConfig`] — Concurrency, retry, timing and cache settings.
//! - [`PriorityQueue`] — Min-priority queue with a bounded blocking pop.
//! - [`DependencyTracker`] — Blocked tasks and who waits on whom.
//! - [`ScheduleBook`] — Recurring submissions on `every_<N>m` / `every_<N>h` intervals.

/// Orchestrator settings.
pub mod config;
/// Dependency checks and the blocked-task graph.
pub mod deps;
/// Dispatcher loop and execution units.
mod dispatcher;
/// Best-effort cache, history and notification writes.
mod effects;
/// Orchestrator engine and builder.
pub mod engine;
/// Queue entries and their ordering.
pub mod entry;
/// Counters and snapshots.
pub mod metrics;
/// Priority levels and the decision table.
pub mod priority;
/// Priority queue.
pub mod queue;
/// Startup recovery of persisted work.
pub mod recovery;
/// Retry ceiling and backoff.
pub mod retry;
/// Recurring submissions.
pub mod scheduler;

pub use config::OrchestratorConfig;
pub use deps::{check_dependencies, DependencyCheck, DependencyTracker};
pub use dispatcher::DEFAULT_EXECUTOR;
pub use engine::{Orchestrator, OrchestratorBuilder};
pub use entry::QueueEntry;
pub use metrics::{Metrics, MetricsSnapshot};
pub use priority::{ActionType, DecisionMatrix, DecisionRule, Priority, PriorityClassifier};
pub use queue::{PriorityQueue, QueuedTaskView};
pub use recovery::RecoveryStats;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{parse_interval, ScheduleBook, ScheduleSpec, ScheduleView, ScheduledEntry};
