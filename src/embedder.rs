//! The embedding-model capability the engine consumes but does not own.
//!
//! Model inference lives outside this core as an external collaborator;
//! the engine only needs a deterministic `encode` producing
//! fixed-dimension vectors. Swapping models, batching strategy, or GPU/CPU
//! placement is entirely the implementor's concern.

use crate::error::EmbeddingError;

/// External embedding capability. Implementations must be deterministic for
/// a given model (same text in, same vector out) and must never return NaN
/// components: a violation surfaces as `EmbeddingError` from the caller's
/// perspective, not a panic inside the engine.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts into `dimension()`-sized vectors, one per
    /// input, in order.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The fixed output dimension this embedder produces.
    fn dimension(&self) -> usize;
}

/// A hash-based embedder for tests and examples: deterministic, dependency-free,
/// and good enough to exercise the retrieval pipeline without a real model.
/// Not intended for production use.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0.0f32; dimension];
    for (i, token) in text.split_whitespace().enumerate() {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        (i as u64).hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h as usize) % dimension;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }
    vector
}
