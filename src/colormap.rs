//! Grayscale-to-colour mapping and label lookup tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use ndarray::{Array4, ArrayView4, Axis};
use palette::{FromColor, Lab, Srgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{MosaicError, Result};

/// Piecewise-linear channel: `(x, y)` control points with ascending `x`
/// covering `0.0..=1.0`.
type Segments = &'static [(f32, f32)];

const ONE: Segments = &[(0.0, 1.0), (1.0, 1.0)];
const ZERO: Segments = &[(0.0, 0.0), (1.0, 0.0)];
const RAMP: Segments = &[(0.0, 0.0), (1.0, 1.0)];
const FALL: Segments = &[(0.0, 1.0), (1.0, 0.0)];

const HOT: [Segments; 3] = [
    &[(0.0, 0.0416), (0.365079, 1.0), (1.0, 1.0)],
    &[(0.0, 0.0), (0.365079, 0.0), (0.746032, 1.0), (1.0, 1.0)],
    &[(0.0, 0.0), (0.746032, 0.0), (1.0, 1.0)],
];

const JET: [Segments; 3] = [
    &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)],
    &[
        (0.0, 0.0),
        (0.125, 0.0),
        (0.375, 1.0),
        (0.64, 1.0),
        (0.91, 0.0),
        (1.0, 0.0),
    ],
    &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)],
];

const BONE: [Segments; 3] = [
    &[(0.0, 0.0), (0.746032, 0.652778), (1.0, 1.0)],
    &[(0.0, 0.0), (0.365079, 0.319444), (0.746032, 0.777778), (1.0, 1.0)],
    &[(0.0, 0.0), (0.365079, 0.444444), (1.0, 1.0)],
];

const COPPER: [Segments; 3] = [
    &[(0.0, 0.0), (0.809524, 1.0), (1.0, 1.0)],
    &[(0.0, 0.0), (1.0, 0.7812)],
    &[(0.0, 0.0), (1.0, 0.4975)],
];

/// 256-entry RGB table sampled from a named colormap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Colormap {
    pub name: String,
    table: [[u8; 3]; 256],
}

impl Colormap {
    /// Look up a colormap by its matplotlib name.
    ///
    /// # Errors
    ///
    /// [`MosaicError::Configuration`] for names outside the supported set.
    pub fn by_name(name: &str) -> Result<Self> {
        let channels: [Segments; 3] = match name.to_ascii_lowercase().as_str() {
            "gray" | "grey" => [RAMP, RAMP, RAMP],
            "hot" => HOT,
            "jet" => JET,
            "bone" => BONE,
            "cool" => [RAMP, FALL, ONE],
            "copper" => COPPER,
            "spring" => [ONE, RAMP, FALL],
            "summer" => [RAMP, &[(0.0, 0.5), (1.0, 1.0)], &[(0.0, 0.4), (1.0, 0.4)]],
            "autumn" => [ONE, RAMP, ZERO],
            "winter" => [ZERO, RAMP, &[(0.0, 1.0), (1.0, 0.5)]],
            other => {
                return Err(MosaicError::Configuration(format!(
                    "unknown colormap '{other}'"
                )));
            }
        };

        let mut table = [[0u8; 3]; 256];
        for (value, entry) in table.iter_mut().enumerate() {
            let x = value as f32 / 255.0;
            for (channel, segments) in entry.iter_mut().zip(channels) {
                *channel = (evaluate(segments, x) * 255.0).round() as u8;
            }
        }
        Ok(Self {
            name: name.to_owned(),
            table,
        })
    }

    #[inline]
    pub fn map(&self, value: u8) -> [u8; 3] {
        self.table[value as usize]
    }
}

fn evaluate(segments: Segments, x: f32) -> f32 {
    let upper = segments
        .iter()
        .position(|&(sx, _)| sx >= x)
        .unwrap_or(segments.len() - 1);
    if upper == 0 {
        return segments[0].1;
    }
    let (x0, y0) = segments[upper - 1];
    let (x1, y1) = segments[upper];
    if x1 <= x0 {
        return y1;
    }
    (y0 + (y1 - y0) * (x - x0) / (x1 - x0)).clamp(0.0, 1.0)
}

/// Mapping from label value to RGB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelLut {
    colors: BTreeMap<i64, [u8; 3]>,
}

impl LabelLut {
    pub fn new(colors: BTreeMap<i64, [u8; 3]>) -> Self {
        Self { colors }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse `id R G B` or FreeSurfer-style `id Name R G B [A]` rows.
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut colors = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fail = |reason: String| MosaicError::LutParse {
                line: number + 1,
                reason,
            };
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 4 {
                return Err(fail(format!("expected at least 4 fields, got {}", tokens.len())));
            }
            let id: i64 = tokens[0]
                .parse()
                .map_err(|_| fail(format!("invalid label id '{}'", tokens[0])))?;
            // A name in the second field shifts the colour one field right;
            // anything after the colour (alpha) is ignored.
            let named = tokens[1].parse::<i64>().is_err();
            let rgb_tokens = if named { tokens.get(2..5) } else { tokens.get(1..4) };
            let rgb_tokens = rgb_tokens.ok_or_else(|| fail("missing colour fields".into()))?;
            let mut rgb = [0u8; 3];
            for (channel, token) in rgb.iter_mut().zip(rgb_tokens) {
                *channel = token
                    .parse()
                    .map_err(|_| fail(format!("invalid colour component '{token}'")))?;
            }
            colors.insert(id, rgb);
        }
        Ok(Self { colors })
    }

    /// Synthesize a lookup table for `labels`: one distinguishable colour
    /// per non-zero label, assigned in ascending label order.
    ///
    /// # Errors
    ///
    /// A configuration error past [`MAX_GENERATED_LABELS`] non-zero labels,
    /// which usually means a continuous volume was taken for a label map.
    pub fn generated(labels: &BTreeSet<i64>, seed: u64) -> Result<Self> {
        let nonzero: Vec<i64> = labels.iter().copied().filter(|&l| l != 0).collect();
        if nonzero.len() > MAX_GENERATED_LABELS {
            return Err(MosaicError::Configuration(format!(
                "{} distinct labels, a generated palette covers at most {MAX_GENERATED_LABELS}",
                nonzero.len()
            )));
        }
        let palette = distinguishable_colors(nonzero.len(), seed);
        Ok(Self {
            colors: nonzero.into_iter().zip(palette).collect(),
        })
    }

    /// Colour of `label`; label 0 is always black.
    ///
    /// # Errors
    ///
    /// [`MosaicError::UnmappedLabel`] when `label` is not in the table.
    pub fn color(&self, label: i64) -> Result<[u8; 3]> {
        if label == 0 {
            return Ok([0, 0, 0]);
        }
        self.colors
            .get(&label)
            .copied()
            .ok_or(MosaicError::UnmappedLabel { label })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

#[inline]
pub fn label_of(value: f32) -> i64 {
    value.round() as i64
}

/// Distinct label values of a volume.
pub fn unique_labels(data: ArrayView4<'_, f32>) -> BTreeSet<i64> {
    data.iter().map(|&v| label_of(v)).collect()
}

/// Resolve a `(X, Y, Z, 1)` label volume into a `(X, Y, Z, 3)` RGB volume.
///
/// Every label present is checked before any voxel is written.
pub fn resolve_labels(data: ArrayView4<'_, f32>, lut: &LabelLut) -> Result<Array4<u8>> {
    let labels = unique_labels(data);
    let resolved: BTreeMap<i64, [u8; 3]> = labels
        .iter()
        .map(|&label| lut.color(label).map(|rgb| (label, rgb)))
        .collect::<Result<_>>()?;
    debug!(labels = labels.len(), "resolved label colours");

    let scalar = data.index_axis(Axis(3), 0);
    let (x, y, z) = scalar.dim();
    let mut rgb = Array4::<u8>::zeros((x, y, z, 3));
    for ((i, j, k), &value) in scalar.indexed_iter() {
        let color = resolved[&label_of(value)];
        for (channel, component) in color.into_iter().enumerate() {
            rgb[[i, j, k, channel]] = component;
        }
    }
    Ok(rgb)
}

const CANDIDATE_POOL: usize = 1024;

/// Most labels a generated palette will colour.
pub const MAX_GENERATED_LABELS: usize = 1024;

/// `count` mutually distinguishable colours, reproducible for a given seed.
///
/// Greedy farthest-point selection in CIE Lab over a seeded pool of random
/// sRGB candidates, with black (the background) pre-selected so no label
/// colour lands near it.
pub fn distinguishable_colors(count: usize, seed: u64) -> Vec<[u8; 3]> {
    if count == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let pool_size = CANDIDATE_POOL.max(count * 8);
    let candidates: Vec<[u8; 3]> = (0..pool_size)
        .map(|_| [rng.random(), rng.random(), rng.random()])
        .collect();
    let labs: Vec<Lab> = candidates.iter().map(|&rgb| to_lab(rgb)).collect();

    let black = to_lab([0, 0, 0]);
    let mut nearest: Vec<f32> = labs.iter().map(|lab| distance(lab, &black)).collect();
    let mut taken = vec![false; pool_size];
    let mut chosen = Vec::with_capacity(count);

    for _ in 0..count {
        let best = (0..pool_size)
            .filter(|&i| !taken[i])
            .max_by(|&a, &b| nearest[a].total_cmp(&nearest[b]))
            .unwrap_or_else(|| unreachable!("pool is larger than count"));
        taken[best] = true;
        chosen.push(candidates[best]);
        let picked = labs[best];
        for (i, lab) in labs.iter().enumerate() {
            nearest[i] = nearest[i].min(distance(lab, &picked));
        }
    }
    chosen
}

fn to_lab(rgb: [u8; 3]) -> Lab {
    let srgb = Srgb::new(rgb[0], rgb[1], rgb[2]).into_format::<f32>();
    Lab::from_color(srgb.into_linear())
}

fn distance(a: &Lab, b: &Lab) -> f32 {
    ((a.l - b.l).powi(2) + (a.a - b.a).powi(2) + (a.b - b.b).powi(2)).sqrt()
}
