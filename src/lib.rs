//! # dMRI QC mosaic library
//!
//! This crate turns 3D and 4D medical volumes into quality-control
//! snapshots: a grid of axial slices, optionally topped by a
//! sagittal/coronal/axial overview strip.
//!
//! Volumes are loaded from NIfTI files (`.nii`, `.nii.gz`), single DICOM
//! files or directories holding a DICOM series. The output depends on
//! the volume:
//!  - 3D scalar volume: one PNG, grayscale or through a named colormap
//!  - 3D label volume: one PNG coloured through a lookup table
//!  - 4D RGB volume (three channels): one PNG in true colour
//!  - any other 4D volume: a looping GIF with one frame per volume
//!
//! Two volumes with the same grid can be alpha-blended, either as a mask
//! painted red or as a label overlay. Many mosaics can be produced at once
//! from a TOML manifest with [`batch::run_batch`].
//!
//! # Examples
//!
//! ## Writing a mosaic for a NIfTI volume
//!
//! ```no_run
//! # use dmriqc_mosaic::{GlyphRenderer, MosaicOptions, OutputTarget, screenshot_mosaic_wrapper};
//! # use std::path::Path;
//! let text = GlyphRenderer::load(dmriqc_mosaic::text::DEFAULT_FONT_PATH);
//! let options = MosaicOptions {
//!     nb_columns: 10,
//!     ..MosaicOptions::default()
//! };
//! let written = screenshot_mosaic_wrapper(
//!     Path::new("sub-01_fa.nii.gz"),
//!     &options,
//!     &OutputTarget::new("qc", "fa_"),
//!     &text,
//! )
//! .expect("should have written qc/fa_sub-01_fa.png");
//! ```

pub mod batch;
pub mod blend;
pub mod colormap;
pub mod enums;
pub mod error;
pub mod layout;
pub mod mosaic;
pub mod strip;
pub mod text;
pub mod volume;
pub mod volume_loader;
pub mod window;

pub use blend::{BlendOptions, screenshot_mosaic_blend};
pub use enums::{Orientation, ResizeFilter, SortBy, VolumeKind};
pub use error::{MosaicError, Result};
pub use mosaic::{
    Coloring, Composite, LabelSource, MosaicOptions, OutputTarget, screenshot_mosaic,
    screenshot_mosaic_wrapper,
};
pub use text::{GlyphRenderer, TextRenderer};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
