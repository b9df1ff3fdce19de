use std::hash::Hasher as _;

use twox_hash::XxHash64;

use super::{l2_normalize, EmbedInput, Embedder, Modality};
use crate::error::Result;
use crate::imaging::{luma, OrientedImage};

pub const TEXT_DIMENSION: usize = 384;
pub const IMAGE_DIMENSION: usize = THUMB_SIDE * THUMB_SIDE + HISTOGRAM_BINS;

const THUMB_SIDE: usize = 16;
const HISTOGRAM_BINS: usize = 64;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Signed feature hashing of lowercase word unigrams and bigrams.
/// Needs no model weights; texts sharing most of their wording land close together.
#[derive(Debug, Clone)]
pub struct HashedTextEmbedder {
    dimension: usize,
}

impl Default for HashedTextEmbedder {
    fn default() -> Self {
        Self::new(TEXT_DIMENSION)
    }
}

impl HashedTextEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let mut v = vec![0f32; self.dimension];
        for token in &tokens {
            self.add_feature(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        l2_normalize(&mut v).then_some(v)
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(feature);
        let h = hasher.finish();
        let idx = (h % self.dimension as u64) as usize;
        // Top bit picks the sign so collisions cancel rather than pile up
        let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
        v[idx] += sign * weight;
    }
}

impl Embedder for HashedTextEmbedder {
    fn model_id(&self) -> &str {
        "hashed-text-v1"
    }

    fn modality(&self) -> Modality {
        Modality::Text
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(inputs
            .iter()
            .map(|input| match input {
                EmbedInput::Text(text) => self.embed_text(text),
                EmbedInput::Image(_) => None,
            })
            .collect())
    }
}

/// 16x16 mean-centred luminance followed by a 4x4x4 RGB histogram.
/// Layout captures structure, the histogram captures palette.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailImageEmbedder;

impl ThumbnailImageEmbedder {
    pub fn embed_image(&self, image: &OrientedImage) -> Option<Vec<f32>> {
        let rgb = image.resize_rgb(THUMB_SIDE as u32, THUMB_SIDE as u32)?;
        let pixels = rgb.len() / 3;
        if pixels == 0 {
            return None;
        }

        let lum: Vec<f32> = rgb
            .chunks_exact(3)
            .map(|p| luma(p[0], p[1], p[2]) as f32 / 255.0)
            .collect();
        let mean = lum.iter().sum::<f32>() / pixels as f32;
        // Scale so the luminance block and the histogram carry similar weight
        let scale = 1.0 / (pixels as f32).sqrt();

        let mut v = Vec::with_capacity(IMAGE_DIMENSION);
        v.extend(lum.iter().map(|l| (l - mean) * scale));

        let mut hist = [0f32; HISTOGRAM_BINS];
        for p in rgb.chunks_exact(3) {
            let bin = (p[0] as usize >> 6) * 16 + (p[1] as usize >> 6) * 4 + (p[2] as usize >> 6);
            hist[bin] += 1.0;
        }
        v.extend(hist.iter().map(|c| c / pixels as f32));

        l2_normalize(&mut v).then_some(v)
    }
}

impl Embedder for ThumbnailImageEmbedder {
    fn model_id(&self) -> &str {
        "thumbnail-image-v1"
    }

    fn modality(&self) -> Modality {
        Modality::Image
    }

    fn dimension(&self) -> usize {
        IMAGE_DIMENSION
    }

    fn embed_batch(&self, inputs: &[EmbedInput<'_>]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(inputs
            .iter()
            .map(|input| match input {
                EmbedInput::Image(image) => self.embed_image(image),
                EmbedInput::Text(_) => None,
            })
            .collect())
    }
}
