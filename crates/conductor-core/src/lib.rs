//! Core types and error definitions for the Conductor task orchestrator.
//!
//! This crate provides the foundational types shared across all Conductor
//! crates: the error enum, the task data model, and the executor contract.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Submission`] — Caller-supplied description of a unit of work.
//! - [`TaskRecord`] — The persisted, authoritative state of a task.
//! - [`TaskUpdate`] — A set of field changes applied to a [`TaskRecord`].
//! - [`Executor`] — Trait implemented by whatever performs the actual work.

/// Executor contract: request, outcome and trait.
pub mod executor;
/// Task data model: levels, status, submissions and records.
pub mod task;

pub use executor::{ExecutionOutcome, ExecutionRequest, Executor};
pub use task::{
    short_id, RiskLevel, Submission, TaskId, TaskRecord, TaskStatus, TaskUpdate, UrgencyLevel,
};

// --- Error types ---

/// Top-level error type for Conductor.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// A caller supplied an invalid submission or argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The referenced task does not exist in the store.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A guarded update found the task in a different status than expected.
    #[error("Task {id} is {actual}, expected {expected}")]
    StatusConflict {
        /// Task whose update was rejected.
        id: TaskId,
        /// Status the caller expected.
        expected: TaskStatus,
        /// Status actually found in the store.
        actual: TaskStatus,
    },

    /// An error related to task persistence.
    #[error("Store error: {0}")]
    Store(String),

    /// An error from the status cache.
    #[error("Cache error: {0}")]
    Cache(String),

    /// An error from the semantic history sink.
    #[error("History error: {0}")]
    History(String),

    /// An error from a notification channel (e.g. Telegram).
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error raised by an executor while running a task.
    #[error("Executor error: {0}")]
    Executor(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the orchestrator itself (lifecycle misuse, shutdown).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;
