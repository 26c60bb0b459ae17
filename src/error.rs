use std::path::PathBuf;

use thiserror::Error;

use crate::volume_loader::VolumeLoaderError;

/// Everything that can stop a single screenshot request.
///
/// Configuration and degenerate-input errors are raised before any pixel
/// work starts. The resource variants (`Volume`, `Font`, `LutParse`, `Io`,
/// `Image`) are fatal for one request only; batch callers keep going.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("volume has no positive voxels, cannot derive a display range")]
    DegenerateVolume,

    #[error("label {label} is present in the volume but missing from the lookup table")]
    UnmappedLabel { label: i64 },

    #[error("frame count mismatch: base has {base} frames, overlay has {overlay}")]
    FrameCountMismatch { base: usize, overlay: usize },

    #[error("raster size mismatch: base is {base:?}, overlay is {overlay:?}")]
    GeometryMismatch {
        base: (u32, u32),
        overlay: (u32, u32),
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unreadable volume: {0}")]
    Volume(#[from] VolumeLoaderError),

    #[error("font {path:?} unavailable: {reason}")]
    Font { path: PathBuf, reason: String },

    #[error("lookup table line {line}: {reason}")]
    LutParse { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, MosaicError>;
