//! Burned-in text (orientation letters, frame counters).

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use ndarray::ArrayViewMut2;

use crate::error::{MosaicError, Result};

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/freefont/FreeSans.ttf";

/// Point size used for every burned-in label.
pub const LABEL_SIZE: f32 = 40.0;

/// Coverage at or above this counts as ink when stamping.
const INK_THRESHOLD: u8 = 128;

/// Rasterizes a line of text into a coverage mask.
pub trait TextRenderer: Send + Sync {
    fn render(&self, text: &str, size: f32) -> Result<GrayImage>;
}

/// Font-backed renderer.
///
/// A font that cannot be loaded only fails the requests that actually
/// need text.
pub struct GlyphRenderer {
    path: PathBuf,
    font: std::result::Result<FontVec, String>,
}

impl GlyphRenderer {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let font = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        Self { path, font }
    }

    pub fn is_available(&self) -> bool {
        self.font.is_ok()
    }
}

impl TextRenderer for GlyphRenderer {
    fn render(&self, text: &str, size: f32) -> Result<GrayImage> {
        let font = self.font.as_ref().map_err(|reason| MosaicError::Font {
            path: self.path.clone(),
            reason: reason.clone(),
        })?;
        let scale = PxScale::from(size);
        let (width, _) = text_size(scale, font, text);
        let mut mask = GrayImage::new(width.max(1), size.ceil() as u32);
        draw_text_mut(&mut mask, Luma([255]), 0, 0, scale, font, text);
        Ok(mask)
    }
}

/// Write `value` wherever `mask` has ink, clipping at the layer edges.
pub fn stamp_layer(mut layer: ArrayViewMut2<'_, u8>, mask: &GrayImage, x: i64, y: i64, value: u8) {
    let (rows, cols) = layer.dim();
    for (mx, my, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] < INK_THRESHOLD {
            continue;
        }
        let (px, py) = (x + mx as i64, y + my as i64);
        if px >= 0 && py >= 0 && (py as usize) < rows && (px as usize) < cols {
            layer[[py as usize, px as usize]] = value;
        }
    }
}

/// Paint `color` wherever `mask` has ink, clipping at the image edges.
pub fn stamp_image(image: &mut RgbImage, mask: &GrayImage, x: i64, y: i64, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for (mx, my, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] < INK_THRESHOLD {
            continue;
        }
        let (px, py) = (x + mx as i64, y + my as i64);
        if px >= 0 && py >= 0 && (px as u64) < width as u64 && (py as u64) < height as u64 {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}
