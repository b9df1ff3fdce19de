use fast_image_resize::{self as fir, images::Image as FirImage};

use crate::error::Result;
use crate::exif::{self as exif_info, ExifInfo};

/// A decoded RGB8 image with EXIF orientation already applied.
#[derive(Debug, Clone)]
pub struct OrientedImage {
    pub rgb: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub exif: ExifInfo,
}

impl OrientedImage {
    /// Decode any supported raster format and apply its EXIF orientation,
    /// so rotated originals and physically rotated exports look the same.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?;
        let rgb = img.to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);

        let exif = exif_info::read_exif(bytes);
        let (rgb, width, height) = apply_orientation_rgb(rgb.as_raw(), w, h, exif.orientation);

        Ok(Self {
            rgb,
            width,
            height,
            exif,
        })
    }

    /// SIMD-resize to `w` x `h` RGB8. Returns None for degenerate sources.
    pub fn resize_rgb(&self, w: u32, h: u32) -> Option<Vec<u8>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let src = FirImage::from_vec_u8(
            self.width as u32,
            self.height as u32,
            self.rgb.clone(),
            fir::PixelType::U8x3,
        )
        .ok()?;
        let mut dst = FirImage::new(w, h, fir::PixelType::U8x3);
        fir::Resizer::new().resize(&src, &mut dst, None).ok()?;
        Some(dst.buffer().to_vec())
    }

    /// Resize, then convert only the resized pixels to BT.601 grayscale.
    /// Avoids a full-resolution grayscale pass.
    pub fn resize_gray(&self, w: u32, h: u32) -> Option<Vec<u8>> {
        let rgb = self.resize_rgb(w, h)?;
        Some(rgb.chunks_exact(3).map(|p| luma(p[0], p[1], p[2])).collect())
    }
}

/// BT.601 luma.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8
}

/// Apply EXIF orientation to an RGB buffer, returning corrected buffer and new dimensions.
///
/// Orientations:
/// 1: Normal                    5: Mirror + rotate 90° CW
/// 2: Mirror horizontal         6: Rotate 90° CW
/// 3: Rotate 180°               7: Mirror + rotate 90° CCW
/// 4: Mirror vertical           8: Rotate 90° CCW
pub fn apply_orientation_rgb(
    buf: &[u8],
    w: usize,
    h: usize,
    orientation: u8,
) -> (Vec<u8>, usize, usize) {
    if !(2..=8).contains(&orientation) {
        return (buf.to_vec(), w, h);
    }

    let mut out = vec![0u8; w * h * 3];
    let (new_w, new_h) = if orientation >= 5 { (h, w) } else { (w, h) };

    for y in 0..h {
        for x in 0..w {
            let src_idx = (y * w + x) * 3;
            let (dx, dy) = match orientation {
                2 => (w - 1 - x, y),
                3 => (w - 1 - x, h - 1 - y),
                4 => (x, h - 1 - y),
                5 => (y, x),
                6 => (h - 1 - y, x),
                7 => (h - 1 - y, w - 1 - x),
                8 => (y, w - 1 - x),
                _ => (x, y),
            };
            let dst_idx = (dy * new_w + dx) * 3;
            out[dst_idx..dst_idx + 3].copy_from_slice(&buf[src_idx..src_idx + 3]);
        }
    }
    (out, new_w, new_h)
}
