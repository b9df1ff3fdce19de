use std::fmt;

use serde::{Deserialize, Serialize};

use crate::imaging::OrientedImage;

/// 64-bit difference hash (dHash) over a 9x8 grayscale grid.
/// Recompressed or resized copies of an image land within a few bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub const BITS: u32 = 64;

    /// Number of differing bits.
    pub fn distance(self, other: PerceptualHash) -> u32 {
        hamming_distance(self.0, other.0)
    }

    /// `1 - distance / BITS`, always in [0, 1].
    pub fn similarity(self, other: PerceptualHash) -> f64 {
        1.0 - self.distance(other) as f64 / Self::BITS as f64
    }

    /// Largest bit distance whose similarity still reaches `threshold`.
    pub fn max_distance_for(threshold: f64) -> u32 {
        let bits = ((1.0 - threshold) * Self::BITS as f64 + 1e-9).floor();
        bits.clamp(0.0, Self::BITS as f64) as u32
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the perceptual hash of a decoded image.
/// Returns None if the image cannot be resized (zero-sized source).
pub fn compute_perceptual_hash(image: &OrientedImage) -> Option<PerceptualHash> {
    let gray = image.resize_gray(9, 8)?;
    let mut pixels = [0u8; 72];
    pixels.copy_from_slice(&gray[..72]);
    Some(PerceptualHash(compute_dhash(&pixels)))
}

/// Compute difference hash (dHash) from 9x8 grayscale pixels.
/// For each row of 9 pixels, compare adjacent pairs → 8 bits per row × 8 rows = 64 bits.
fn compute_dhash(pixels: &[u8; 72]) -> u64 {
    let mut hash: u64 = 0;
    let mut bit = 0;
    for row in 0..8 {
        for col in 0..8 {
            let left = pixels[row * 9 + col];
            let right = pixels[row * 9 + col + 1];
            if left > right {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Compute the Hamming distance between two hash values.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
