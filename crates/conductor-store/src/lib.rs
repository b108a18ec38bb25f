//! Persistence and cache backends for Conductor task state.
//!
//! # Main types
//!
//! - [`TaskStore`] — Durable, authoritative task records.
//! - [`FileTaskStore`] — One pretty-printed JSON file per task.
//! - [`InMemoryTaskStore`] — Process-local store for tests and embedding.
//! - [`StatusCache`] — Best-effort key/value cache with per-entry TTL.
//! - [`InMemoryStatusCache`] — Process-local [`StatusCache`].

/// Best-effort status cache.
pub mod cache;
/// Durable task record storage.
pub mod store;

pub use cache::{InMemoryStatusCache, StatusCache};
pub use store::{FileTaskStore, InMemoryTaskStore, TaskFilter, TaskStore};
