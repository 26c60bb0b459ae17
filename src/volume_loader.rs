use crate::{enums::SortBy, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, ArrayD, Axis, IxDyn, s};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{NiftiObject, ReaderOptions};
use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Unsupported volume format: {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("Unsupported volume shape: {0:?}")]
    UnsupportedShape(Vec<usize>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a NIfTI file, a DICOM file or a directory holding
    /// a DICOM series.
    pub fn load(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::load_from_directory(path, SortBy::default());
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Self::load_nifti(path)
        } else if name.ends_with(".dcm") {
            Self::load_from_file_paths(&[path], SortBy::None)
        } else {
            Err(VolumeLoaderError::UnsupportedFormat(path.to_path_buf()))
        }
    }

    /// Load a `.nii` or `.nii.gz` file with scaling applied.
    pub fn load_nifti(path: &Path) -> Result<Volume, VolumeLoaderError> {
        let object = ReaderOptions::new().read_file(path)?;
        let pixdim = object.header().pixdim;
        let voxel_size = (pixdim[1], pixdim[2], pixdim[3]);
        let array = object.into_volume().into_ndarray::<f32>()?;

        let shape = array.shape().to_vec();
        let samples: Vec<f32> = array.iter().copied().collect();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), samples)
            .map_err(|_| VolumeLoaderError::UnsupportedShape(shape.clone()))?;
        debug!(path = %path.display(), ?shape, "loaded NIfTI volume");
        Self::into_volume(data, Some(voxel_size))
    }

    /// Stack decoded DICOM objects into a single-layer volume.
    ///
    /// Objects without decodable pixel data are skipped. Slices are ordered
    /// by `sort_by`; slices lacking the sort attribute come first.
    ///
    /// # Errors
    ///
    /// [`VolumeLoaderError::NoValidImages`] when nothing decodes and
    /// [`VolumeLoaderError::InconsistentDimensions`] when the images differ
    /// in size.
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<DicomSlice> = dicom_objects
            .iter()
            .filter_map(|object| DicomSlice::decode(object, sort_by))
            .collect();
        let Some(first) = slices.first() else {
            return Err(VolumeLoaderError::NoValidImages);
        };
        let plane = first.pixels.dim();
        if slices.iter().any(|slice| slice.pixels.dim() != plane) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }

        match sort_by {
            SortBy::None => {}
            // Patient Z grows towards the head; stack from the top down.
            SortBy::ImagePositionPatient => slices.sort_by(|a, b| a.order_cmp(b, true)),
            SortBy::TablePosition | SortBy::InstanceNumber => {
                slices.sort_by(|a, b| a.order_cmp(b, false))
            }
        }
        debug!(slices = slices.len(), ?plane, ?sort_by, "stacking DICOM series");

        let planes: Vec<Array2<f32>> = slices.into_iter().map(|slice| slice.pixels).collect();
        let voxel_size = dicom_objects.iter().find_map(voxel_size_of);
        Self::into_volume(stack_planes(&planes).into_dyn(), voxel_size)
    }

    /// Open and stack DICOM files.
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects = paths
            .iter()
            .map(|path| open_file(path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::load_from_dicom_objects(&objects, sort_by)
    }

    /// Stack every `.dcm` file found directly inside `path`.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(path.as_ref())? {
            let candidate = entry?.path();
            let is_dicom = candidate
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"));
            if is_dicom {
                paths.push(candidate);
            }
        }
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        Self::load_from_file_paths(&paths, sort_by)
    }

    /// Squeeze trailing unit axes past the third, promote 2D to a single
    /// slice, and wrap as a [`Volume`].
    pub fn into_volume(
        mut data: ArrayD<f32>,
        voxel_size: Option<(f32, f32, f32)>,
    ) -> Result<Volume, VolumeLoaderError> {
        while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
            let last = data.ndim() - 1;
            data = data.index_axis_move(Axis(last), 0);
        }
        if data.ndim() == 2 {
            data = data.insert_axis(Axis(2));
        }
        let shape = data.shape().to_vec();
        if !(3..=4).contains(&shape.len()) || shape.contains(&0) {
            return Err(VolumeLoaderError::UnsupportedShape(shape));
        }
        Volume::new(data, voxel_size).map_err(|_| VolumeLoaderError::UnsupportedShape(shape))
    }
}

/// One decoded image and the value it is ordered by.
struct DicomSlice {
    order: Option<f32>,
    pixels: Array2<f32>,
}

impl DicomSlice {
    fn decode(object: &FileDicomObject<InMemDicomObject>, sort_by: SortBy) -> Option<Self> {
        // Modality rescale only; display windowing happens later on the
        // whole volume.
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let frames = object
            .decode_pixel_data()
            .ok()?
            .to_ndarray_with_options::<f32>(&options)
            .ok()?;
        Some(Self {
            order: order_of(object, sort_by),
            pixels: frames.slice_move(s![0, .., .., 0]),
        })
    }

    /// Slices without an order value sort first in either direction.
    fn order_cmp(&self, other: &Self, descending: bool) -> Ordering {
        match (self.order, other.order) {
            (Some(a), Some(b)) if descending => b.total_cmp(&a),
            (Some(a), Some(b)) => a.total_cmp(&b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        }
    }
}

fn order_of(object: &FileDicomObject<InMemDicomObject>, sort_by: SortBy) -> Option<f32> {
    match sort_by {
        SortBy::ImagePositionPatient => object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?
            .get(2)
            .copied(),
        SortBy::TablePosition => object.element(tags::TABLE_POSITION).ok()?.to_float32().ok(),
        SortBy::InstanceNumber => object
            .element(tags::INSTANCE_NUMBER)
            .ok()?
            .to_int::<i32>()
            .ok()
            .map(|n| n as f32),
        SortBy::None => None,
    }
}

/// Stack `(rows, cols)` images into `(X, Y, Z)` with X along columns and
/// Y running bottom-up, so that rotating an axial plane for display
/// shows each image upright.
fn stack_planes(planes: &[Array2<f32>]) -> Array3<f32> {
    let (rows, cols) = planes[0].dim();
    let mut volume = Array3::<f32>::zeros((cols, rows, planes.len()));
    for (z, plane) in planes.iter().enumerate() {
        volume.slice_mut(s![.., ..;-1, z]).assign(&plane.t());
    }
    volume
}

/// `(column spacing, row spacing, slice thickness)` in millimetres.
fn voxel_size_of(object: &FileDicomObject<InMemDicomObject>) -> Option<(f32, f32, f32)> {
    let spacing = object
        .element(tags::PIXEL_SPACING)
        .ok()?
        .to_multi_float32()
        .ok()?;
    let thickness = object
        .element(tags::SLICE_THICKNESS)
        .ok()?
        .to_float32()
        .ok()?;
    Some((*spacing.get(1)?, *spacing.first()?, thickness))
}
