pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod exif;
pub mod fingerprint;
pub mod grouping;
pub mod hasher;
pub mod imaging;
pub mod matching;
pub mod ranking;
pub mod scan;

use std::sync::Arc;

pub use crate::config::{EngineConfig, MetadataWeights, PerceptualGate, ScanPolicy};
pub use domain::*;
pub use embedding::cache::EmbeddingCache;
pub use embedding::{ContentEmbedder, EmbedInput, Embedder, Embedding, Modality};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use scan::{CancelToken, ScanProgress};

use embedding::builtin::{HashedTextEmbedder, ThumbnailImageEmbedder};

/// The main entry point: detects duplicate and near-duplicate files in an
/// upload batch. Holds the embedding backends, shared across scans.
pub struct Engine {
    policy: ScanPolicy,
    embedder: ContentEmbedder,
}

impl Engine {
    /// Engine with the built-in embedders and the process-wide embedding cache.
    pub fn new(policy: ScanPolicy) -> Self {
        Self::with_embedders(
            policy,
            Arc::new(HashedTextEmbedder::default()),
            Arc::new(ThumbnailImageEmbedder),
            EmbeddingCache::global(),
        )
    }

    /// Engine with caller-supplied embedding models.
    pub fn with_embedders(
        policy: ScanPolicy,
        text: Arc<dyn Embedder>,
        image: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        let embedder = ContentEmbedder::new(text, image, cache, &policy);
        Self { policy, embedder }
    }

    /// Load the policy from an optional config file plus `RECLAIM_*` variables.
    pub fn from_config(path: Option<&std::path::Path>) -> Result<Self> {
        let cfg = EngineConfig::load(path)?;
        Ok(Self::new(cfg.policy))
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    pub fn embedding_cache(&self) -> &Arc<EmbeddingCache> {
        self.embedder.cache()
    }

    /// Fingerprint a single file.
    pub fn fingerprint(&self, file: &FileRecord) -> Fingerprint {
        fingerprint::extract(file)
    }

    /// Scan a batch and group its duplicates.
    pub fn scan(&self, upload_id: &str, files: &[FileRecord], options: ScanOptions) -> Result<ScanResult> {
        self.scan_with(upload_id, files, options, &CancelToken::new(), None)
    }

    /// Scan with cancellation and progress reporting.
    /// Calls `progress_cb` at every stage boundary if provided.
    pub fn scan_with(
        &self,
        upload_id: &str,
        files: &[FileRecord],
        options: ScanOptions,
        cancel: &CancelToken,
        progress_cb: Option<&mut dyn FnMut(ScanProgress)>,
    ) -> Result<ScanResult> {
        scan::Scan {
            policy: &self.policy,
            embedder: &self.embedder,
            cancel,
        }
        .run(upload_id, files, options, progress_cb)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(ScanPolicy::default())
    }
}
