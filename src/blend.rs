//! Alpha-blending a base mosaic with an overlay mosaic.
//!
//! The overlay is either a binary mask, whose pure-white pixels are painted
//! red, or a label volume coloured through a lookup table. Only exact
//! `(255, 255, 255)` pixels are repainted, so resampled mask edges keep
//! their grey.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::error::{MosaicError, Result};
use crate::mosaic::{
    Coloring, Composite, LabelSource, MosaicOptions, OutputTarget, screenshot_mosaic,
};
use crate::text::TextRenderer;
use crate::volume::Volume;
use crate::volume_loader::VolumeLoader;

pub const MASK_WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const MASK_HIGHLIGHT: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Debug, Clone, PartialEq)]
pub struct BlendOptions {
    /// Overlay weight in `0.0..=1.0`.
    pub blend_val: f32,
    pub is_mask: bool,
    /// Colour the overlay as labels. Ignored for masks.
    pub overlay_labels: Option<LabelSource>,
}

impl Default for BlendOptions {
    fn default() -> Self {
        Self {
            blend_val: 0.5,
            is_mask: false,
            overlay_labels: None,
        }
    }
}

impl BlendOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.blend_val) {
            return Err(MosaicError::Configuration(format!(
                "blend_val must be within [0, 1], got {}",
                self.blend_val
            )));
        }
        Ok(())
    }

    fn overlay_coloring(&self) -> Coloring {
        match (&self.overlay_labels, self.is_mask) {
            (Some(source), false) => Coloring::Labels(source.clone()),
            _ => Coloring::Gray,
        }
    }
}

/// Paint exact white pixels with the mask highlight.
pub fn recolor_mask(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        if *pixel == MASK_WHITE {
            *pixel = MASK_HIGHLIGHT;
        }
    }
}

/// `base * (1 - alpha) + overlay * alpha`, rounded per channel.
pub fn blend_images(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> Result<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        return Err(MosaicError::GeometryMismatch {
            base: base.dimensions(),
            overlay: overlay.dimensions(),
        });
    }
    let pixels: Vec<u8> = base
        .as_raw()
        .iter()
        .zip(overlay.as_raw())
        .map(|(&a, &b)| (a as f32 * (1.0 - alpha) + b as f32 * alpha).round() as u8)
        .collect();
    let (width, height) = base.dimensions();
    Ok(RgbImage::from_raw(width, height, pixels)
        .unwrap_or_else(|| unreachable!("blend keeps the base size")))
}

/// Blend two composites. Two animations blend frame by frame; an animation
/// and a still blend every frame against the still.
pub fn blend_composites(base: &Composite, overlay: &Composite, alpha: f32) -> Result<Composite> {
    match (base, overlay) {
        (Composite::Still(a), Composite::Still(b)) => {
            Ok(Composite::Still(blend_images(a, b, alpha)?))
        }
        (Composite::Animation(a), Composite::Animation(b)) => {
            if a.len() != b.len() {
                return Err(MosaicError::FrameCountMismatch {
                    base: a.len(),
                    overlay: b.len(),
                });
            }
            a.iter()
                .zip(b)
                .map(|(a, b)| blend_images(a, b, alpha))
                .collect::<Result<Vec<_>>>()
                .map(Composite::Animation)
        }
        (Composite::Animation(frames), Composite::Still(still)) => frames
            .iter()
            .map(|frame| blend_images(frame, still, alpha))
            .collect::<Result<Vec<_>>>()
            .map(Composite::Animation),
        (Composite::Still(still), Composite::Animation(frames)) => frames
            .iter()
            .map(|frame| blend_images(still, frame, alpha))
            .collect::<Result<Vec<_>>>()
            .map(Composite::Animation),
    }
}

/// Composite `base` and `overlay` with the same layout and blend them.
///
/// `options.coloring` applies to the base only; orientation letters are
/// never drawn on blends.
pub fn blend_volumes(
    base: &Volume,
    overlay: &Volume,
    options: &MosaicOptions,
    blend: &BlendOptions,
    text: &dyn TextRenderer,
) -> Result<Composite> {
    blend.validate()?;
    let base_options = MosaicOptions {
        orientation_labels: false,
        ..options.clone()
    };
    let overlay_options = MosaicOptions {
        coloring: blend.overlay_coloring(),
        ..base_options.clone()
    };

    let base_composite = screenshot_mosaic(base, &base_options, text)?;
    let mut overlay_composite = screenshot_mosaic(overlay, &overlay_options, text)?;
    if blend.is_mask {
        match &mut overlay_composite {
            Composite::Still(image) => recolor_mask(image),
            Composite::Animation(frames) => frames.iter_mut().for_each(recolor_mask),
        }
    }
    debug!(
        blend_val = blend.blend_val,
        is_mask = blend.is_mask,
        "blending overlay"
    );
    blend_composites(&base_composite, &overlay_composite, blend.blend_val)
}

/// Load both volumes, blend them and write the result named after `image`.
pub fn screenshot_mosaic_blend(
    image: &Path,
    image_blend: &Path,
    options: &MosaicOptions,
    blend: &BlendOptions,
    target: &OutputTarget,
    text: &dyn TextRenderer,
) -> Result<PathBuf> {
    options.validate()?;
    blend.validate()?;
    let base = VolumeLoader::load(image)?;
    let overlay = VolumeLoader::load(image_blend)?;
    let composite = blend_volumes(&base, &overlay, options, blend, text)?;
    let output = target.path_for(image, composite.extension());
    composite.save(&output, options.frame_duration_ms)?;
    Ok(output)
}
