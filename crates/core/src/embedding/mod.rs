pub mod builtin;
pub mod cache;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScanPolicy;
use crate::domain::{FileRecord, MediaKind};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::imaging::OrientedImage;
use builtin::{HashedTextEmbedder, ThumbnailImageEmbedder};
use cache::EmbeddingCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn for_kind(kind: MediaKind) -> Option<Modality> {
        match kind {
            MediaKind::Image => Some(Modality::Image),
            MediaKind::Text => Some(Modality::Text),
            MediaKind::Other => None,
        }
    }
}

/// A unit-length vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model_id: String,
    pub modality: Modality,
}

impl Embedding {
    /// Cosine similarity clamped to [0, 1]. None when the two vectors
    /// come from different modalities, models or dimensions.
    pub fn similarity(&self, other: &Embedding) -> Option<f64> {
        if self.modality != other.modality
            || self.model_id != other.model_id
            || self.vector.len() != other.vector.len()
        {
            return None;
        }
        Some(cosine_similarity(&self.vector, &other.vector))
    }
}

pub enum EmbedInput<'a> {
    Text(&'a str),
    Image(&'a OrientedImage),
}

/// A model that turns prepared content into vectors.
///
/// `embed_batch` returns one entry per input, in order; `None` means the
/// input could not be embedded. A backend that cannot run at all should
/// return `Error::ModelUnavailable`.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn modality(&self) -> Modality;
    fn dimension(&self) -> usize;

    fn ready(&self) -> Result<()> {
        Ok(())
    }

    fn embed_batch(&self, inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>>;
}

/// Scale `v` to unit length. Returns false for a zero or non-finite vector.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Cosine of two equal-length vectors, clamped to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

/// One distinct digest awaiting a model call, and every input index sharing it.
struct Pending {
    modality: Modality,
    digest: String,
    indices: Vec<usize>,
}

/// Runs the text and image embedders over a batch of files, consulting
/// and filling the shared content-addressed cache.
pub struct ContentEmbedder {
    text: Arc<dyn Embedder>,
    image: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
    max_text_chars: usize,
}

impl ContentEmbedder {
    pub fn new(
        text: Arc<dyn Embedder>,
        image: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        policy: &ScanPolicy,
    ) -> Self {
        Self {
            text,
            image,
            cache,
            batch_size: policy.embed_batch_size.max(1),
            max_text_chars: policy.max_text_chars,
        }
    }

    /// Built-in feature-hashing text model and thumbnail image model.
    pub fn with_builtin(cache: Arc<EmbeddingCache>, policy: &ScanPolicy) -> Self {
        Self::new(
            Arc::new(HashedTextEmbedder::default()),
            Arc::new(ThumbnailImageEmbedder),
            cache,
            policy,
        )
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    fn embedder_for(&self, modality: Modality) -> &dyn Embedder {
        match modality {
            Modality::Text => self.text.as_ref(),
            Modality::Image => self.image.as_ref(),
        }
    }

    /// Both backends must be usable before a content scan starts.
    pub fn ready(&self) -> Result<()> {
        self.text.ready()?;
        self.image.ready()
    }

    /// Embed a single file.
    pub fn embed(&self, file: &FileRecord, fingerprint: &Fingerprint) -> Result<Option<Arc<Embedding>>> {
        let mut out = self.embed_all(std::slice::from_ref(file), std::slice::from_ref(fingerprint))?;
        Ok(out.pop().flatten())
    }

    /// Embed every eligible file, in input order. Files that are failed,
    /// of kind Other, or yield no usable vector come back as None.
    /// Cache hits skip the model; identical contents are embedded once.
    pub fn embed_all(
        &self,
        files: &[FileRecord],
        fingerprints: &[Fingerprint],
    ) -> Result<Vec<Option<Arc<Embedding>>>> {
        let mut out: Vec<Option<Arc<Embedding>>> = vec![None; files.len()];
        let mut pending: Vec<Pending> = Vec::new();
        let mut by_digest: HashMap<(Modality, String), usize> = HashMap::new();
        let mut hits = 0usize;

        for (i, fp) in fingerprints.iter().enumerate().take(files.len()) {
            if fp.is_failed() {
                continue;
            }
            let (Some(modality), Some(digest)) = (Modality::for_kind(fp.kind), fp.sha256()) else {
                continue;
            };
            let model = self.embedder_for(modality);
            if let Some(hit) = self.cache.get(digest, model.model_id()) {
                out[i] = Some(hit);
                hits += 1;
                continue;
            }
            match by_digest.entry((modality, digest.to_string())) {
                Entry::Occupied(e) => pending[*e.get()].indices.push(i),
                Entry::Vacant(e) => {
                    e.insert(pending.len());
                    pending.push(Pending {
                        modality,
                        digest: digest.to_string(),
                        indices: vec![i],
                    });
                }
            }
        }

        debug!(hits, misses = pending.len(), "embedding cache lookup");

        for modality in [Modality::Image, Modality::Text] {
            let items: Vec<&Pending> = pending.iter().filter(|p| p.modality == modality).collect();
            if items.is_empty() {
                continue;
            }
            let model = self.embedder_for(modality);
            let batches = items
                .par_chunks(self.batch_size)
                .map(|chunk| self.embed_chunk(model, files, chunk))
                .collect::<Result<Vec<_>>>()?;

            for (item, embedding) in items.iter().zip(batches.into_iter().flatten()) {
                let Some(embedding) = embedding else { continue };
                let stored = self.cache.insert(item.digest.clone(), embedding);
                for &i in &item.indices {
                    out[i] = Some(Arc::clone(&stored));
                }
            }
        }

        Ok(out)
    }

    /// Prepare and embed one chunk. Always returns one entry per item.
    fn embed_chunk(
        &self,
        model: &dyn Embedder,
        files: &[FileRecord],
        chunk: &[&Pending],
    ) -> Result<Vec<Option<Embedding>>> {
        let prepared: Vec<Option<Prepared>> = chunk
            .iter()
            .map(|item| self.prepare(item.modality, &files[item.indices[0]]))
            .collect();

        let inputs: Vec<EmbedInput<'_>> = prepared
            .iter()
            .flatten()
            .map(|p| match p {
                Prepared::Text(t) => EmbedInput::Text(t.as_str()),
                Prepared::Image(img) => EmbedInput::Image(img),
            })
            .collect();
        if inputs.is_empty() {
            return Ok(vec![None; chunk.len()]);
        }

        let vectors = model.embed_batch(&inputs)?;
        if vectors.len() != inputs.len() {
            return Err(Error::ModelUnavailable {
                model: model.model_id().to_string(),
                reason: format!("returned {} vectors for {} inputs", vectors.len(), inputs.len()),
            });
        }

        let mut vectors = vectors.into_iter();
        let mut out = Vec::with_capacity(chunk.len());
        for (item, p) in chunk.iter().zip(&prepared) {
            if p.is_none() {
                out.push(None);
                continue;
            }
            let embedding = vectors.next().flatten().and_then(|mut v| {
                if v.len() != model.dimension() || !l2_normalize(&mut v) {
                    return None;
                }
                Some(Embedding {
                    vector: v,
                    model_id: model.model_id().to_string(),
                    modality: item.modality,
                })
            });
            out.push(embedding);
        }
        Ok(out)
    }

    fn prepare(&self, modality: Modality, file: &FileRecord) -> Option<Prepared> {
        let bytes = match file.source.read_all() {
            Ok(b) => b,
            Err(e) => {
                debug!(file = %file.id, error = %e, "skipping embedding, read failed");
                return None;
            }
        };
        match modality {
            Modality::Text => {
                let text: String = String::from_utf8_lossy(&bytes)
                    .chars()
                    .take(self.max_text_chars)
                    .collect();
                (!text.trim().is_empty()).then_some(Prepared::Text(text))
            }
            Modality::Image => OrientedImage::decode(&bytes).ok().map(Prepared::Image),
        }
    }
}

enum Prepared {
    Text(String),
    Image(OrientedImage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::extract;
    use chrono::Utc;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Wraps the text model and records every batch it sees.
    struct CountingText {
        inner: HashedTextEmbedder,
        calls: AtomicUsize,
        inputs: AtomicUsize,
        largest_batch: Mutex<usize>,
    }

    impl CountingText {
        fn new() -> Self {
            Self {
                inner: HashedTextEmbedder::default(),
                calls: AtomicUsize::new(0),
                inputs: AtomicUsize::new(0),
                largest_batch: Mutex::new(0),
            }
        }
    }

    impl Embedder for CountingText {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
        fn modality(&self) -> Modality {
            Modality::Text
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        fn embed_batch(&self, inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.fetch_add(inputs.len(), Ordering::SeqCst);
            let mut largest = self.largest_batch.lock().unwrap();
            *largest = (*largest).max(inputs.len());
            self.inner.embed_batch(inputs)
        }
    }

    struct Offline;

    impl Embedder for Offline {
        fn model_id(&self) -> &str {
            "offline"
        }
        fn modality(&self) -> Modality {
            Modality::Text
        }
        fn dimension(&self) -> usize {
            4
        }
        fn ready(&self) -> Result<()> {
            Err(Error::ModelUnavailable {
                model: "offline".to_string(),
                reason: "weights not installed".to_string(),
            })
        }
        fn embed_batch(&self, _inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>> {
            Err(Error::ModelUnavailable {
                model: "offline".to_string(),
                reason: "weights not installed".to_string(),
            })
        }
    }

    /// Returns vectors of the wrong length.
    struct Misshapen;

    impl Embedder for Misshapen {
        fn model_id(&self) -> &str {
            "misshapen"
        }
        fn modality(&self) -> Modality {
            Modality::Text
        }
        fn dimension(&self) -> usize {
            8
        }
        fn embed_batch(&self, inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>> {
            Ok(inputs.iter().map(|_| Some(vec![1.0; 3])).collect())
        }
    }

    fn text(id: &str, body: &str) -> FileRecord {
        FileRecord::in_memory(id, format!("{id}.txt"), "text/plain", Utc::now(), body.as_bytes().to_vec())
    }

    fn png(id: &str) -> FileRecord {
        let img = image::RgbImage::from_fn(24, 24, |x, y| image::Rgb([(x * 9) as u8, (y * 3) as u8, 40]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        FileRecord::in_memory(id, format!("{id}.png"), "image/png", Utc::now(), bytes)
    }

    fn fingerprints(files: &[FileRecord]) -> Vec<Fingerprint> {
        files.iter().map(extract).collect()
    }

    fn policy(batch: usize) -> ScanPolicy {
        ScanPolicy { embed_batch_size: batch, ..Default::default() }
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        let mut zero = vec![0.0; 3];
        assert!(!l2_normalize(&mut zero));
    }

    #[test]
    fn test_cosine_clamps_negative() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_refuses_cross_modality() {
        let a = Embedding { vector: vec![1.0, 0.0], model_id: "m".into(), modality: Modality::Text };
        let b = Embedding { modality: Modality::Image, ..a.clone() };
        assert!(a.similarity(&b).is_none());
        assert_eq!(a.similarity(&a), Some(1.0));
    }

    #[test]
    fn test_embed_all_preserves_order_and_skips_other() {
        let files = vec![
            text("a", "alpha beta gamma"),
            FileRecord::in_memory("z", "z.bin", "application/zip", Utc::now(), vec![1, 2, 3]),
            png("p"),
            text("b", "delta epsilon"),
        ];
        let fps = fingerprints(&files);
        let embedder = ContentEmbedder::with_builtin(Arc::new(EmbeddingCache::new()), &policy(2));
        let out = embedder.embed_all(&files, &fps).unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].as_ref().unwrap().modality, Modality::Text);
        assert!(out[1].is_none());
        assert_eq!(out[2].as_ref().unwrap().modality, Modality::Image);
        assert_ne!(out[0].as_ref().unwrap().vector, out[3].as_ref().unwrap().vector);
    }

    #[test]
    fn test_identical_contents_embedded_once() {
        let counting = Arc::new(CountingText::new());
        let files = vec![
            text("a", "same words here"),
            text("b", "same words here"),
            text("c", "different words entirely"),
        ];
        let fps = fingerprints(&files);
        let embedder = ContentEmbedder::new(
            counting.clone(),
            Arc::new(ThumbnailImageEmbedder),
            Arc::new(EmbeddingCache::new()),
            &policy(32),
        );
        let out = embedder.embed_all(&files, &fps).unwrap();

        assert_eq!(counting.inputs.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(out[0].as_ref().unwrap(), out[1].as_ref().unwrap()));
    }

    #[test]
    fn test_cache_hits_skip_the_model() {
        let counting = Arc::new(CountingText::new());
        let cache = Arc::new(EmbeddingCache::new());
        let embedder =
            ContentEmbedder::new(counting.clone(), Arc::new(ThumbnailImageEmbedder), cache.clone(), &policy(32));
        let files = vec![text("a", "one two three"), text("b", "four five six")];
        let fps = fingerprints(&files);

        embedder.embed_all(&files, &fps).unwrap();
        assert_eq!(counting.inputs.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);

        let again = embedder.embed_all(&files, &fps).unwrap();
        assert_eq!(counting.inputs.load(Ordering::SeqCst), 2);
        assert!(again.iter().all(|e| e.is_some()));
    }

    #[test]
    fn test_batches_respect_batch_size() {
        let counting = Arc::new(CountingText::new());
        let files: Vec<FileRecord> = (0..7).map(|i| text(&format!("f{i}"), &format!("document number {i}"))).collect();
        let fps = fingerprints(&files);
        let embedder = ContentEmbedder::new(
            counting.clone(),
            Arc::new(ThumbnailImageEmbedder),
            Arc::new(EmbeddingCache::new()),
            &policy(3),
        );
        embedder.embed_all(&files, &fps).unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*counting.largest_batch.lock().unwrap(), 3);
    }

    #[test]
    fn test_text_truncated_before_embedding() {
        let long = format!("{} tail words only beyond the limit", "head ".repeat(5));
        let short = "head ".repeat(5);
        let files = vec![text("long", &long), text("short", &short)];
        let fps = fingerprints(&files);
        let p = ScanPolicy { max_text_chars: short.len(), ..Default::default() };
        let embedder = ContentEmbedder::with_builtin(Arc::new(EmbeddingCache::new()), &p);
        let out = embedder.embed_all(&files, &fps).unwrap();

        let sim = out[0].as_ref().unwrap().similarity(out[1].as_ref().unwrap()).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_text_yields_none() {
        let files = vec![text("blank", "   \n  ")];
        let fps = fingerprints(&files);
        let embedder = ContentEmbedder::with_builtin(Arc::new(EmbeddingCache::new()), &policy(4));
        assert!(embedder.embed(&files[0], &fps[0]).unwrap().is_none());
    }

    #[test]
    fn test_unavailable_backend_surfaces() {
        let files = vec![text("a", "words")];
        let fps = fingerprints(&files);
        let embedder = ContentEmbedder::new(
            Arc::new(Offline),
            Arc::new(ThumbnailImageEmbedder),
            Arc::new(EmbeddingCache::new()),
            &policy(4),
        );
        assert!(matches!(embedder.ready(), Err(Error::ModelUnavailable { .. })));
        assert!(matches!(
            embedder.embed_all(&files, &fps),
            Err(Error::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_wrong_dimension_vectors_dropped() {
        let files = vec![text("a", "words and more words")];
        let fps = fingerprints(&files);
        let cache = Arc::new(EmbeddingCache::new());
        let embedder =
            ContentEmbedder::new(Arc::new(Misshapen), Arc::new(ThumbnailImageEmbedder), cache.clone(), &policy(4));
        let out = embedder.embed_all(&files, &fps).unwrap();
        assert!(out[0].is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_fingerprints_not_embedded() {
        let files = vec![FileRecord::in_memory(
            "bad",
            "bad.png",
            "image/png",
            Utc::now(),
            b"not a png".to_vec(),
        )];
        let fps = fingerprints(&files);
        assert!(fps[0].is_failed());
        let embedder = ContentEmbedder::with_builtin(Arc::new(EmbeddingCache::new()), &policy(4));
        assert!(embedder.embed_all(&files, &fps).unwrap()[0].is_none());
    }
}
