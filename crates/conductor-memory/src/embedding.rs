use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> ConductorResult<Vec<f32>>;

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Hashed bag-of-words embedding.
///
/// Each token contributes its term frequency to three hashed buckets with
/// decreasing weight; the result is L2-normalized.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Creates an embedding of `dimension` buckets (at least one).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

const PROBE_WEIGHTS: [f32; 3] = [1.0, 0.7, 0.5];

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_owned)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> ConductorResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ConductorError::History("Cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let words = tokens(text);
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word.as_str()).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            for (probe, weight) in PROBE_WEIGHTS.iter().enumerate() {
                let bucket = fnv1a(word.as_bytes(), probe as u8) as usize % self.dimension;
                vector[bucket] += tf * weight;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a over `data` followed by a probe byte (skipped for probe 0).
fn fnv1a(data: &[u8], probe: u8) -> u32 {
    let mut hash: u32 = 2166136261;
    let probe_byte = [probe];
    let tail: &[u8] = if probe == 0 { &[] } else { &probe_byte };
    for &byte in data.iter().chain(tail) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Cosine similarity between two vectors; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
