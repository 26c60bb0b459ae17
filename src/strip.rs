//! Three-axis overview strip: mid-volume sagittal, coronal and axial planes
//! side by side, scaled to sit on top of the slice grid.

use image::{GrayImage, imageops};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis, concatenate, s};
use tracing::debug;

use crate::enums::{Orientation, ResizeFilter};
use crate::layout::rot90;

/// Voxels added to the sagittal index to centre asymmetric brains.
pub const SAGITTAL_OFFSET: usize = 4;

/// Plane indices used for the strip, in [`Orientation::ALL`] order.
pub fn mid_indices(dim: (usize, usize, usize)) -> [usize; 3] {
    let (x, y, z) = dim;
    [(x / 2 + SAGITTAL_OFFSET).min(x - 1), y / 2, z / 2]
}

/// `(size, 3 * size, L)` strip where `size` is the largest spatial extent.
///
/// Each plane is zero-padded to `size x size` with the extra split
/// floor-first (top/left), then rotated for display.
pub fn build_strip(display: ArrayView4<'_, u8>) -> Array3<u8> {
    let (x, y, z, layers) = display.dim();
    let size = x.max(y).max(z);
    let middle = mid_indices((x, y, z));

    let planes: Vec<Array3<u8>> = Orientation::ALL
        .iter()
        .zip(middle)
        .map(|(orientation, index)| {
            let plane = display.index_axis(Axis(orientation.axis()), index);
            let (rows, cols, _) = plane.dim();
            let top = (size - rows) / 2;
            let left = (size - cols) / 2;
            let mut square = Array3::<u8>::zeros((size, size, layers));
            square
                .slice_mut(s![top..top + rows, left..left + cols, ..])
                .assign(&plane);
            rot90(square.view()).to_owned()
        })
        .collect();

    let views: Vec<ArrayView3<'_, u8>> = planes.iter().map(|plane| plane.view()).collect();
    concatenate(Axis(1), &views)
        .unwrap_or_else(|_| unreachable!("planes share the same square shape"))
}

/// Strip size after a uniform rescale that fits inside `(height, width)`.
///
/// The scale factor is `min(height / strip_h, width / strip_w)`, evaluated
/// in integers so a width-limited strip lands exactly on `width`.
pub fn fitted_size(strip: (usize, usize), target: (usize, usize)) -> (usize, usize) {
    let (strip_h, strip_w) = strip;
    let (height, width) = target;
    let (num, den) = if height * strip_w <= width * strip_h {
        (height, strip_h)
    } else {
        (width, strip_w)
    };
    (
        (strip_h * num / den).max(1),
        (strip_w * num / den).clamp(1, width.max(1)),
    )
}

/// Rescale `strip` to fit the grid and centre it on a zero canvas exactly
/// `width` pixels wide. Returns `(fitted_h, width, L)`.
pub fn fit_strip(
    strip: ArrayView3<'_, u8>,
    target: (usize, usize),
    filter: ResizeFilter,
) -> Array3<u8> {
    let (strip_h, strip_w, layers) = strip.dim();
    let (new_h, new_w) = fitted_size((strip_h, strip_w), target);
    let width = target.1;
    let left = (width - new_w) / 2;
    debug!(new_h, new_w, width, left, "fitting overview strip");

    let mut canvas = Array3::<u8>::zeros((new_h, width, layers));
    for layer in 0..layers {
        let resized = resize_layer(strip.index_axis(Axis(2), layer), new_h, new_w, filter);
        canvas
            .slice_mut(s![.., left..left + new_w, layer])
            .assign(&resized);
    }
    canvas
}

fn layer_to_image(layer: ArrayView2<'_, u8>) -> GrayImage {
    let (height, width) = layer.dim();
    let pixels: Vec<u8> = layer.iter().copied().collect();
    GrayImage::from_raw(width as u32, height as u32, pixels)
        .unwrap_or_else(|| unreachable!("buffer matches the layer size"))
}

fn image_to_layer(image: GrayImage) -> Array2<u8> {
    let (width, height) = image.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), image.into_raw())
        .unwrap_or_else(|_| unreachable!("buffer matches the image size"))
}

fn resize_layer(
    layer: ArrayView2<'_, u8>,
    height: usize,
    width: usize,
    filter: ResizeFilter,
) -> Array2<u8> {
    if layer.dim() == (height, width) {
        return layer.to_owned();
    }
    let image = layer_to_image(layer);
    let resized = imageops::resize(&image, width as u32, height as u32, filter.into());
    image_to_layer(resized)
}
