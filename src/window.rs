//! Display range derivation.
//!
//! The range comes from the positive voxels only: `min` is their minimum
//! and `max` their 99th percentile. Volumes whose range collapses to a few
//! integer levels (label maps, binary masks) are widened by
//! [`widen_label_range`].

use ndarray::ArrayView4;
use tracing::debug;

use crate::error::{MosaicError, Result};

/// Ranges narrower than this, ending on an integer, are treated as labels.
pub const LABEL_RANGE_SPAN: f64 = 20.0;

const PRIMARY_PERCENTILE: f64 = 99.0;
const LABEL_PERCENTILE: f64 = 99.99;

/// Intensity window mapped linearly onto `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl DisplayRange {
    /// Map one sample like `np.interp(v, [min, max], [0, 255])` followed by
    /// a truncating cast. A collapsed range maps to 0 below `max` and 255 at
    /// or above it.
    #[inline]
    pub fn map(&self, value: f32) -> u8 {
        let value = value as f64;
        if value >= self.max {
            255
        } else if value <= self.min {
            0
        } else {
            ((value - self.min) / (self.max - self.min) * 255.0) as u8
        }
    }
}

/// Linear-interpolated percentile of an ascending slice, numpy's default.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let position = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Whether `range` looks like it came from a label or mask volume.
///
/// This also catches genuinely low-dynamic-range continuous maps whose 99th
/// percentile happens to land on an integer (a near-binary FA map, say).
pub fn is_label_like(range: DisplayRange) -> bool {
    range.max - range.min < LABEL_RANGE_SPAN && range.max.fract() == 0.0
}

/// Widen a label-like range to `(global min, 99.99th percentile of positives)`.
pub fn widen_label_range(global_min: f64, positives: &[f64]) -> DisplayRange {
    DisplayRange {
        min: global_min,
        max: percentile(positives, LABEL_PERCENTILE),
    }
}

/// Derive the display range of a volume.
///
/// # Errors
///
/// [`MosaicError::DegenerateVolume`] when no voxel is positive.
pub fn display_range(data: ArrayView4<'_, f32>) -> Result<DisplayRange> {
    let mut positives: Vec<f64> = data
        .iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| v as f64)
        .collect();
    if positives.is_empty() {
        return Err(MosaicError::DegenerateVolume);
    }
    positives.sort_unstable_by(f64::total_cmp);

    let primary = DisplayRange {
        min: positives[0],
        max: percentile(&positives, PRIMARY_PERCENTILE),
    };
    if !is_label_like(primary) {
        debug!(min = primary.min, max = primary.max, "display range");
        return Ok(primary);
    }

    let global_min = data.iter().fold(f32::INFINITY, |acc, &v| acc.min(v)) as f64;
    let widened = widen_label_range(global_min, &positives);
    debug!(
        min = widened.min,
        max = widened.max,
        "display range widened for label-like volume"
    );
    Ok(widened)
}
