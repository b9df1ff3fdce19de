use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::Embedding;

lazy_static::lazy_static! {
    static ref GLOBAL_CACHE: Arc<EmbeddingCache> = Arc::new(EmbeddingCache::new());
}

/// Content-addressed embedding store keyed by SHA-256 digest and model id,
/// so the same bytes embedded by two models keep both entries.
/// Entries are immutable once written; concurrent misses on the same key
/// may both compute, and the last insert wins.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: DashMap<(String, String), Arc<Embedding>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by every engine that does not bring its own.
    pub fn global() -> Arc<EmbeddingCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Look up the embedding `model_id` produced for a digest.
    pub fn get(&self, digest: &str, model_id: &str) -> Option<Arc<Embedding>> {
        let entry = self.entries.get(&(digest.to_string(), model_id.to_string()))?;
        trace!(digest, model_id, "embedding cache hit");
        Some(Arc::clone(entry.value()))
    }

    /// Store under the digest and the embedding's own model id.
    pub fn insert(&self, digest: String, embedding: Embedding) -> Arc<Embedding> {
        let embedding = Arc::new(embedding);
        let key = (digest, embedding.model_id.clone());
        self.entries.insert(key, Arc::clone(&embedding));
        embedding
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
