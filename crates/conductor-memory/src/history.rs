use crate::embedding::{cosine_similarity, EmbeddingProvider, LocalEmbedding};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One stored history text with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Record identifier (caller-supplied or generated).
    pub id: String,
    /// Collection the record belongs to.
    pub collection: String,
    /// The stored text.
    pub text: String,
    /// Embedding of `text`.
    pub embedding: Vec<f32>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the record was stored.
    pub created_at: DateTime<Utc>,
}

/// A search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryHit {
    /// Record identifier.
    pub id: String,
    /// The stored text.
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
    /// Metadata stored with the record.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Best-effort semantic store of past task outcomes.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Stores `text` in `collection`, replacing any record with the same `id`.
    async fn store(
        &self,
        collection: &str,
        text: &str,
        metadata: HashMap<String, serde_json::Value>,
        id: Option<String>,
    ) -> ConductorResult<String>;

    /// Returns up to `limit` records of `collection` scoring at least `threshold`, best first.
    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> ConductorResult<Vec<HistoryHit>>;
}

/// Brute-force cosine search over embedded records.
///
/// With a path, records are loaded from a JSONL file on open, appended on
/// insert and the file is rewritten when a record is replaced.
pub struct VectorHistory {
    embedder: Box<dyn EmbeddingProvider>,
    records: RwLock<Vec<HistoryRecord>>,
    path: Option<PathBuf>,
}

impl Default for VectorHistory {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl VectorHistory {
    /// Process-local history using [`LocalEmbedding`].
    pub fn in_memory() -> Self {
        Self::with_embedder(Box::new(LocalEmbedding::default()))
    }

    /// Process-local history using a custom embedder.
    pub fn with_embedder(embedder: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            records: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Opens a JSONL-backed history at `path`, loading existing records.
    pub async fn open(path: PathBuf) -> ConductorResult<Self> {
        let mut records = Vec::new();
        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            for line in data.lines().filter(|l| !l.trim().is_empty()) {
                let record: HistoryRecord = serde_json::from_str(line)
                    .map_err(|e| ConductorError::History(format!("Invalid JSONL entry: {e}")))?;
                records.push(record);
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            embedder: Box::new(LocalEmbedding::default()),
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    /// Number of stored records across all collections.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn append(&self, record: &HistoryRecord) -> ConductorResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn rewrite(&self, records: &[HistoryRecord]) -> ConductorResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut data = String::new();
        for record in records {
            data.push_str(&serde_json::to_string(record)?);
            data.push('\n');
        }
        tokio::fs::write(path, data.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl HistorySink for VectorHistory {
    async fn store(
        &self,
        collection: &str,
        text: &str,
        metadata: HashMap<String, serde_json::Value>,
        id: Option<String>,
    ) -> ConductorResult<String> {
        let embedding = self.embedder.embed(text).await?;
        let record = HistoryRecord {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            collection: collection.to_string(),
            text: text.to_string(),
            embedding,
            metadata,
            created_at: Utc::now(),
        };
        let id = record.id.clone();

        let mut records = self.records.write().await;
        let existing = records
            .iter()
            .position(|r| r.collection == record.collection && r.id == record.id);
        match existing {
            Some(pos) => {
                records[pos] = record;
                self.rewrite(&records).await?;
            }
            None => {
                self.append(&record).await?;
                records.push(record);
            }
        }
        Ok(id)
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> ConductorResult<Vec<HistoryHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let records = self.records.read().await;
        let mut hits: Vec<HistoryHit> = records
            .iter()
            .filter(|r| r.collection == collection)
            .map(|r| HistoryHit {
                id: r.id.clone(),
                text: r.text.clone(),
                score: cosine_similarity(&query_embedding, &r.embedding),
                metadata: r.metadata.clone(),
            })
            .filter(|hit| hit.score >= threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
