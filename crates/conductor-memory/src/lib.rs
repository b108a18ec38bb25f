//! Semantic task history for Conductor.
//!
//! Finished tasks are recorded as short texts ("what was asked -> what
//! happened") so later submissions can look up similar past work.
//!
//! # Main types
//!
//! - [`HistorySink`] — Trait for storing and searching history records.
//! - [`VectorHistory`] — Embedding-backed sink with optional JSONL persistence.
//! - [`LocalEmbedding`] — Hashed bag-of-words embedding, no external API.

/// Embedding provider trait and local implementation.
pub mod embedding;
/// History sink trait and vector-backed implementation.
pub mod history;

pub use embedding::{cosine_similarity, EmbeddingProvider, LocalEmbedding};
pub use history::{HistoryHit, HistoryRecord, HistorySink, VectorHistory};
