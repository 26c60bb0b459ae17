use crate::enums::VolumeKind;
use crate::error::{MosaicError, Result};
use crate::window::DisplayRange;

use ndarray::{Array3, Array4, ArrayD, ArrayView4, Axis, Ix4, Zip};

/// A 3D `(X, Y, Z)` or 4D `(X, Y, Z, W)` array of samples.
///
/// Stored as 4D with a unit 4th axis for 3D input so that slicing and
/// tiling only ever deal with one layout.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array4<f32>,
    four_d: bool,
    pub voxel_size: Option<(f32, f32, f32)>,
}

impl Volume {
    /// Wrap an array, replacing non-finite samples the way `nan_to_num` does.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the array is not 3D/4D or has an
    /// empty axis.
    pub fn new(data: ArrayD<f32>, voxel_size: Option<(f32, f32, f32)>) -> Result<Self> {
        let four_d = match data.ndim() {
            3 => false,
            4 => true,
            n => {
                return Err(MosaicError::Configuration(format!(
                    "expected a 3D or 4D volume, got {n} axes"
                )));
            }
        };
        if data.shape().contains(&0) {
            return Err(MosaicError::Configuration(format!(
                "volume has an empty axis: {:?}",
                data.shape()
            )));
        }
        let data = if four_d { data } else { data.insert_axis(Axis(3)) };
        let mut data = data
            .into_dimensionality::<Ix4>()
            .map_err(|e| MosaicError::Configuration(e.to_string()))?;
        data.mapv_inplace(Self::sanitize);
        Ok(Self {
            data,
            four_d,
            voxel_size,
        })
    }

    pub fn from_3d(data: Array3<f32>) -> Result<Self> {
        Self::new(data.into_dyn(), None)
    }

    pub fn from_4d(data: Array4<f32>) -> Result<Self> {
        Self::new(data.into_dyn(), None)
    }

    #[inline]
    fn sanitize(value: f32) -> f32 {
        if value.is_nan() {
            0.0
        } else if value == f32::INFINITY {
            f32::MAX
        } else if value == f32::NEG_INFINITY {
            f32::MIN
        } else {
            value
        }
    }

    /// Spatial dimensions `(X, Y, Z)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        let (x, y, z, _) = self.data.dim();
        (x, y, z)
    }

    /// Length of the 4th axis, 1 for 3D volumes.
    pub fn layers(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn is_4d(&self) -> bool {
        self.four_d
    }

    pub fn kind(&self) -> VolumeKind {
        match (self.four_d, self.layers()) {
            (true, 3) => VolumeKind::Rgb,
            (true, frames) => VolumeKind::Series { frames },
            (false, _) => VolumeKind::Scalar,
        }
    }

    /// Samples as `(X, Y, Z, W)`, W being 1 for 3D volumes.
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Window every sample into `u8` display intensities, keeping the
    /// `(X, Y, Z, W)` layout.
    pub fn to_display(&self, range: DisplayRange) -> Array4<u8> {
        let mut display = Array4::<u8>::zeros(self.data.raw_dim());
        Zip::from(&mut display)
            .and(&self.data)
            .for_each(|pixel, &value| *pixel = range.map(value));
        display
    }

    /// Clamp samples that already are display intensities (RGB volumes).
    pub fn to_display_raw(&self) -> Array4<u8> {
        self.data.mapv(Self::normalize_to_u8)
    }

    #[inline]
    fn normalize_to_u8(value: f32) -> u8 {
        value.clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_samples_are_sanitized() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = f32::NAN;
        data[[1, 0, 0]] = f32::INFINITY;
        data[[0, 1, 0]] = f32::NEG_INFINITY;
        let volume = Volume::from_3d(data).expect("valid volume");
        let view = volume.data();
        assert_eq!(view[[0, 0, 0, 0]], 0.0);
        assert_eq!(view[[1, 0, 0, 0]], f32::MAX);
        assert_eq!(view[[0, 1, 0, 0]], f32::MIN);
    }

    #[test]
    fn kind_follows_fourth_axis() {
        let scalar = Volume::from_3d(Array3::zeros((2, 2, 2))).unwrap();
        let rgb = Volume::from_4d(Array4::zeros((2, 2, 2, 3))).unwrap();
        let series = Volume::from_4d(Array4::zeros((2, 2, 2, 5))).unwrap();
        let single = Volume::from_4d(Array4::zeros((2, 2, 2, 1))).unwrap();
        assert_eq!(scalar.kind(), VolumeKind::Scalar);
        assert_eq!(rgb.kind(), VolumeKind::Rgb);
        assert_eq!(series.kind(), VolumeKind::Series { frames: 5 });
        assert_eq!(single.kind(), VolumeKind::Series { frames: 1 });
    }

    #[test]
    fn rejects_empty_axis_and_bad_rank() {
        assert!(matches!(
            Volume::from_3d(Array3::zeros((2, 0, 2))),
            Err(MosaicError::Configuration(_))
        ));
        assert!(matches!(
            Volume::new(ndarray::ArrayD::zeros(ndarray::IxDyn(&[2, 2])), None),
            Err(MosaicError::Configuration(_))
        ));
    }

    #[test]
    fn raw_display_clamps() {
        let mut data = Array4::<f32>::zeros((1, 1, 1, 3));
        data[[0, 0, 0, 0]] = 300.0;
        data[[0, 0, 0, 1]] = -4.0;
        data[[0, 0, 0, 2]] = 17.9;
        let volume = Volume::from_4d(data).unwrap();
        let display = volume.to_display_raw();
        assert_eq!(display.iter().copied().collect::<Vec<_>>(), vec![255, 0, 17]);
    }
}
