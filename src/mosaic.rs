//! Compositor orchestrator.
//!
//! `Load -> Normalize -> Sample+Tile -> BuildStrip -> Stack -> Colour ->
//! Serialize`. A 3D volume (or a 4D RGB one) becomes a single still; any
//! other 4D volume becomes one frame per 4th-axis index, each carrying an
//! `i/N` counter in its top-left corner.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, Rgb, RgbImage, imageops};
use ndarray::{Array3, Array4, ArrayView3, Axis, concatenate, s};
use serde::Deserialize;
use tracing::{debug, info};

use crate::colormap::{Colormap, LabelLut, resolve_labels, unique_labels};
use crate::enums::{ResizeFilter, VolumeKind};
use crate::error::{MosaicError, Result};
use crate::layout::{Layout, tile_grid};
use crate::strip::{build_strip, fit_strip};
use crate::text::{LABEL_SIZE, TextRenderer, stamp_image, stamp_layer};
use crate::volume::Volume;
use crate::volume_loader::VolumeLoader;
use crate::window::display_range;

/// Border added around the grid when orientation letters are drawn.
pub const ORIENTATION_BORDER: usize = 50;

/// Where label colours come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelSource {
    LutFile(PathBuf),
    Generated,
}

/// How display intensities become RGB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Coloring {
    #[default]
    Gray,
    Colormap(String),
    Labels(LabelSource),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MosaicOptions {
    pub skip: usize,
    pub pad: usize,
    pub nb_columns: usize,
    /// Prepend the sagittal/coronal/axial overview strip.
    pub three_axis: bool,
    /// Burn A/P/L/R around the grid of a 3D scalar volume.
    pub orientation_labels: bool,
    pub coloring: Coloring,
    pub max_width: u32,
    pub resize_filter: ResizeFilter,
    pub frame_duration_ms: u32,
    pub palette_seed: u64,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            skip: 1,
            pad: 20,
            nb_columns: 15,
            three_axis: true,
            orientation_labels: false,
            coloring: Coloring::Gray,
            max_width: 1920,
            resize_filter: ResizeFilter::Lanczos3,
            frame_duration_ms: 100,
            palette_seed: 1,
        }
    }
}

impl MosaicOptions {
    pub fn validate(&self) -> Result<Layout> {
        if self.max_width < 1 {
            return Err(MosaicError::Configuration(
                "max_width must be at least 1".into(),
            ));
        }
        if self.frame_duration_ms < 1 {
            return Err(MosaicError::Configuration(
                "frame_duration_ms must be at least 1".into(),
            ));
        }
        Layout::new(self.skip, self.pad, self.nb_columns)
    }
}

/// Rendered output: one still or an ordered frame sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Composite {
    Still(RgbImage),
    Animation(Vec<RgbImage>),
}

impl Composite {
    pub fn frames(&self) -> &[RgbImage] {
        match self {
            Composite::Still(image) => std::slice::from_ref(image),
            Composite::Animation(frames) => frames,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Composite::Still(_) => "png",
            Composite::Animation(_) => "gif",
        }
    }

    /// Write a PNG, or an infinitely looping GIF, to `path`.
    pub fn save(&self, path: &Path, frame_duration_ms: u32) -> Result<()> {
        match self {
            Composite::Still(image) => image.save(path)?,
            Composite::Animation(frames) => {
                let file = BufWriter::new(File::create(path)?);
                let mut encoder = GifEncoder::new(file);
                encoder.set_repeat(Repeat::Infinite)?;
                let delay = Delay::from_numer_denom_ms(frame_duration_ms, 1);
                encoder.encode_frames(frames.iter().map(|frame| {
                    let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
                    Frame::from_parts(rgba, 0, 0, delay)
                }))?;
            }
        }
        info!(path = %path.display(), "wrote mosaic");
        Ok(())
    }
}

/// Output directory and filename prefix for written mosaics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTarget {
    pub directory: PathBuf,
    pub prefix: String,
}

impl OutputTarget {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    /// `<directory>/<prefix><stem>.<ext>`, where `stem` is the input file
    /// name up to its first dot.
    pub fn path_for(&self, input: &Path, extension: &str) -> PathBuf {
        let stem = image_stem(input);
        self.directory
            .join(format!("{}{}.{}", self.prefix, stem, extension))
    }
}

pub fn image_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_owned()
}

/// Display layers plus how to turn them into RGB.
struct Prepared {
    display: Array4<u8>,
    kind: VolumeKind,
    colormap: Option<Colormap>,
}

fn prepare(volume: &Volume, options: &MosaicOptions) -> Result<Prepared> {
    let kind = volume.kind();
    match &options.coloring {
        Coloring::Labels(source) => {
            if volume.is_4d() {
                return Err(MosaicError::Configuration(
                    "label colouring needs a 3D volume".into(),
                ));
            }
            let lut = match source {
                LabelSource::LutFile(path) => LabelLut::from_file(path)?,
                LabelSource::Generated => {
                    LabelLut::generated(&unique_labels(volume.data()), options.palette_seed)?
                }
            };
            Ok(Prepared {
                display: resolve_labels(volume.data(), &lut)?,
                kind: VolumeKind::Rgb,
                colormap: None,
            })
        }
        _ if kind == VolumeKind::Rgb => Ok(Prepared {
            display: volume.to_display_raw(),
            kind,
            colormap: None,
        }),
        coloring => {
            let colormap = match coloring {
                Coloring::Colormap(name) => Some(Colormap::by_name(name)?),
                _ => None,
            };
            let range = display_range(volume.data())?;
            Ok(Prepared {
                display: volume.to_display(range),
                kind,
                colormap,
            })
        }
    }
}

/// Composite a volume into a still or an animation.
///
/// # Errors
///
/// Configuration and degenerate-volume errors are raised before any
/// pixel is written; text errors only when letters or counters are drawn.
pub fn screenshot_mosaic(
    volume: &Volume,
    options: &MosaicOptions,
    text: &dyn TextRenderer,
) -> Result<Composite> {
    let layout = options.validate()?;
    let prepared = prepare(volume, options)?;

    let mut grid = tile_grid(prepared.display.view(), &layout);
    if options.orientation_labels && prepared.kind == VolumeKind::Scalar {
        grid = add_orientation_labels(grid, text)?;
    }

    let stacked = if options.three_axis {
        let (rows_px, cols_px, _) = grid.dim();
        let strip = build_strip(prepared.display.view());
        let strip = fit_strip(strip.view(), (rows_px, cols_px), options.resize_filter);
        concatenate(Axis(0), &[strip.view(), grid.view()])
            .unwrap_or_else(|_| unreachable!("strip is fitted to the grid width"))
    } else {
        grid
    };
    debug!(shape = ?stacked.dim(), kind = ?prepared.kind, "stacked mosaic");

    match prepared.kind {
        VolumeKind::Rgb => {
            let image = rgb_from_channels(stacked.view());
            Ok(Composite::Still(cap_width(image, options)))
        }
        VolumeKind::Scalar => {
            let image = colorize(stacked.view(), 0, prepared.colormap.as_ref());
            Ok(Composite::Still(cap_width(image, options)))
        }
        VolumeKind::Series { frames } => {
            let mut sequence = Vec::with_capacity(frames);
            for frame in 0..frames {
                let image = colorize(stacked.view(), frame, prepared.colormap.as_ref());
                let mut image = cap_width(image, options);
                let label = text.render(&format!("{frame}/{frames}"), LABEL_SIZE)?;
                stamp_image(&mut image, &label, 0, 0, Rgb([255, 255, 255]));
                sequence.push(image);
            }
            Ok(Composite::Animation(sequence))
        }
    }
}

/// Pad the grid and draw `A` (top), `P` (bottom), `L` (left), `R` (right).
fn add_orientation_labels(grid: Array3<u8>, text: &dyn TextRenderer) -> Result<Array3<u8>> {
    let (rows, cols, layers) = grid.dim();
    let border = ORIENTATION_BORDER;
    let (height, width) = (rows + 2 * border, cols + 2 * border);
    let mut padded = Array3::<u8>::zeros((height, width, layers));
    padded
        .slice_mut(s![border..border + rows, border..border + cols, ..])
        .assign(&grid);

    let edge = LABEL_SIZE as i64;
    let (h, w) = (height as i64, width as i64);
    let placements = [
        ("A", w / 2, 0),
        ("P", w / 2, h - edge),
        ("L", 0, h / 2),
        ("R", w - edge, h / 2),
    ];
    for (letter, x, y) in placements {
        let mask = text.render(letter, LABEL_SIZE)?;
        for layer in 0..layers {
            stamp_layer(padded.index_axis_mut(Axis(2), layer), &mask, x, y, 255);
        }
    }
    Ok(padded)
}

fn colorize(stacked: ArrayView3<'_, u8>, layer: usize, colormap: Option<&Colormap>) -> RgbImage {
    let plane = stacked.index_axis(Axis(2), layer);
    let (height, width) = plane.dim();
    let mut pixels = Vec::with_capacity(height * width * 3);
    for &value in plane.iter() {
        match colormap {
            Some(colormap) => pixels.extend_from_slice(&colormap.map(value)),
            None => pixels.extend_from_slice(&[value, value, value]),
        }
    }
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .unwrap_or_else(|| unreachable!("buffer matches the plane size"))
}

fn rgb_from_channels(stacked: ArrayView3<'_, u8>) -> RgbImage {
    let (height, width, _) = stacked.dim();
    let pixels: Vec<u8> = stacked.slice(s![.., .., 0..3]).iter().copied().collect();
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .unwrap_or_else(|| unreachable!("buffer matches the raster size"))
}

/// Downscale proportionally when wider than `max_width`.
fn cap_width(image: RgbImage, options: &MosaicOptions) -> RgbImage {
    let (width, height) = image.dimensions();
    if width <= options.max_width {
        return image;
    }
    let new_width = options.max_width;
    let new_height = ((height as f64 * new_width as f64 / width as f64) as u32).max(1);
    debug!(width, height, new_width, new_height, "capping mosaic width");
    imageops::resize(&image, new_width, new_height, options.resize_filter.into())
}

/// Load `path`, composite it and write it under `target`.
///
/// Returns the path of the written PNG or GIF.
pub fn screenshot_mosaic_wrapper(
    path: &Path,
    options: &MosaicOptions,
    target: &OutputTarget,
    text: &dyn TextRenderer,
) -> Result<PathBuf> {
    let volume = VolumeLoader::load(path)?;
    debug!(
        path = %path.display(),
        dim = ?volume.dim(),
        layers = volume.layers(),
        voxel_size = ?volume.voxel_size,
        "loaded volume"
    );
    let composite = screenshot_mosaic(&volume, options, text)?;
    let output = target.path_for(path, composite.extension());
    composite.save(&output, options.frame_duration_ms)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use ndarray::{Array3, Array4};
    use std::sync::Mutex;

    /// Renders every string as a solid 2x2 block and remembers it.
    #[derive(Default)]
    struct BlockText {
        seen: Mutex<Vec<String>>,
    }

    impl TextRenderer for BlockText {
        fn render(&self, text: &str, _size: f32) -> Result<GrayImage> {
            self.seen.lock().unwrap().push(text.to_owned());
            Ok(GrayImage::from_pixel(2, 2, image::Luma([255])))
        }
    }

    fn grid_options(pad: usize, nb_columns: usize) -> MosaicOptions {
        MosaicOptions {
            pad,
            nb_columns,
            three_axis: false,
            ..MosaicOptions::default()
        }
    }

    fn ramp_volume() -> Volume {
        Volume::from_3d(Array3::from_shape_fn((8, 6, 4), |(x, y, z)| {
            (x + y * 8 + z * 48) as f32 + 1.0
        }))
        .unwrap()
    }

    #[test]
    fn rejects_bad_layout_before_rendering() {
        let volume = ramp_volume();
        let text = BlockText::default();
        for bad in [
            MosaicOptions {
                nb_columns: 0,
                ..MosaicOptions::default()
            },
            MosaicOptions {
                skip: 0,
                ..MosaicOptions::default()
            },
        ] {
            assert!(matches!(
                screenshot_mosaic(&volume, &bad, &text),
                Err(MosaicError::Configuration(_))
            ));
        }
    }

    #[test]
    fn empty_volume_is_degenerate() {
        let volume = Volume::from_3d(Array3::zeros((4, 4, 4))).unwrap();
        let result = screenshot_mosaic(&volume, &grid_options(2, 2), &BlockText::default());
        assert!(matches!(result, Err(MosaicError::DegenerateVolume)));
    }

    #[test]
    fn strip_matches_grid_width() {
        let volume = ramp_volume();
        let options = MosaicOptions {
            three_axis: true,
            ..grid_options(4, 3)
        };
        let composite = screenshot_mosaic(&volume, &options, &BlockText::default()).unwrap();
        let Composite::Still(image) = composite else {
            panic!("3D volume should give a still");
        };
        // Grid: 2 rows of 6 + 4, 3 columns of 8 + 4, plus outer pad.
        assert_eq!(image.width(), 3 * (8 + 4) + 4);
        assert!(image.height() > 2 * (6 + 4) + 4);
    }

    #[test]
    fn wide_mosaics_are_capped() {
        let volume = ramp_volume();
        let options = MosaicOptions {
            max_width: 50,
            ..grid_options(2, 4)
        };
        let composite = screenshot_mosaic(&volume, &options, &BlockText::default()).unwrap();
        let image = &composite.frames()[0];
        // One row of four slices: 4 * (8 + 2) + 2 = 42 px, under the cap.
        assert_eq!(image.width(), 42);

        let capped = MosaicOptions {
            max_width: 21,
            ..options
        };
        let composite = screenshot_mosaic(&volume, &capped, &BlockText::default()).unwrap();
        let image = &composite.frames()[0];
        assert_eq!(image.width(), 21);
        assert_eq!(image.height(), (6 + 2 + 2) / 2);
    }

    #[test]
    fn series_frames_are_counted_in_order() {
        let data = Array4::from_shape_fn((4, 4, 2, 4), |(x, _, _, t)| (x + t) as f32 + 1.0);
        let volume = Volume::from_4d(data).unwrap();
        let text = BlockText::default();
        let composite = screenshot_mosaic(&volume, &grid_options(2, 2), &text).unwrap();
        let Composite::Animation(frames) = composite else {
            panic!("4D series should animate");
        };
        assert_eq!(frames.len(), 4);
        assert_eq!(
            *text.seen.lock().unwrap(),
            vec!["0/4", "1/4", "2/4", "3/4"]
        );
        for frame in &frames {
            assert_eq!(frame.get_pixel(0, 0), &Rgb([255, 255, 255]));
        }
    }

    #[test]
    fn rgb_volumes_bypass_windowing() {
        let mut data = Array4::<f32>::zeros((2, 2, 1, 3));
        data.slice_mut(s![.., .., .., 0]).fill(12.0);
        data.slice_mut(s![.., .., .., 2]).fill(300.0);
        let volume = Volume::from_4d(data).unwrap();
        let composite = screenshot_mosaic(&volume, &grid_options(0, 1), &BlockText::default()).unwrap();
        let Composite::Still(image) = composite else {
            panic!("RGB volume should give a still");
        };
        assert_eq!(image.dimensions(), (2, 2));
        assert!(image.pixels().all(|p| *p == Rgb([12, 0, 255])));
    }

    #[test]
    fn orientation_labels_pad_scalar_grids() {
        let volume = ramp_volume();
        let text = BlockText::default();
        let options = MosaicOptions {
            orientation_labels: true,
            ..grid_options(2, 4)
        };
        let composite = screenshot_mosaic(&volume, &options, &text).unwrap();
        let image = &composite.frames()[0];
        assert_eq!(image.width() as usize, 42 + 2 * ORIENTATION_BORDER);
        assert_eq!(*text.seen.lock().unwrap(), vec!["A", "P", "L", "R"]);
        assert_eq!(image.get_pixel(image.width() / 2, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn compositing_is_deterministic() {
        let volume = ramp_volume();
        let options = MosaicOptions {
            three_axis: true,
            coloring: Coloring::Colormap("hot".into()),
            ..grid_options(3, 2)
        };
        let first = screenshot_mosaic(&volume, &options, &BlockText::default()).unwrap();
        let second = screenshot_mosaic(&volume, &options, &BlockText::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn output_names_use_stem_before_first_dot() {
        let target = OutputTarget::new("data", "qc_");
        assert_eq!(
            target.path_for(Path::new("/in/sub-01_fa.nii.gz"), "png"),
            PathBuf::from("data/qc_sub-01_fa.png")
        );
    }
}
