//! Slice sampling and grid tiling.
//!
//! Grid geometry, for `n` sampled slices of display size `h x w`:
//!
//! ```text
//! nb_rows = ceil(n / nb_columns)
//! rows_px = nb_rows    * (h + pad) + pad
//! cols_px = nb_columns * (w + pad) + pad
//! ```
//!
//! Cell `(row, col)` starts at `(row * (h + pad), col * (w + pad))` and its
//! slice sits `pad` pixels in from that corner: `pad / 2` of cell padding
//! on each side of a slice, plus a `pad / 2` outer margin, so every slice
//! has a `pad` gutter all around.

use ndarray::{Array3, ArrayView3, ArrayView4, Axis, s};
use tracing::debug;

use crate::error::{MosaicError, Result};

/// Tiling parameters shared by the grid and the overview strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub skip: usize,
    pub pad: usize,
    pub nb_columns: usize,
}

impl Layout {
    pub fn new(skip: usize, pad: usize, nb_columns: usize) -> Result<Self> {
        if skip < 1 {
            return Err(MosaicError::Configuration("skip must be at least 1".into()));
        }
        if nb_columns < 1 {
            return Err(MosaicError::Configuration(
                "nb_columns must be at least 1".into(),
            ));
        }
        Ok(Self {
            skip,
            pad,
            nb_columns,
        })
    }

    pub fn nb_rows(&self, nb_slices: usize) -> usize {
        nb_slices.div_ceil(self.nb_columns)
    }

    /// `(rows_px, cols_px)` of the grid for `nb_slices` slices of display
    /// size `(height, width)`.
    pub fn grid_shape(&self, nb_slices: usize, height: usize, width: usize) -> (usize, usize) {
        (
            self.nb_rows(nb_slices) * (height + self.pad) + self.pad,
            self.nb_columns * (width + self.pad) + self.pad,
        )
    }

    /// Top-left pixel of the slice placed in the `i`-th cell.
    pub fn slice_origin(&self, i: usize, height: usize, width: usize) -> (usize, usize) {
        let row = i / self.nb_columns;
        let col = i % self.nb_columns;
        (
            row * (height + self.pad) + self.pad,
            col * (width + self.pad) + self.pad,
        )
    }
}

/// Axial slice indices `0, skip, 2 * skip, ...` below `depth`.
pub fn sample_slices(depth: usize, skip: usize) -> Vec<usize> {
    (0..depth).step_by(skip.max(1)).collect()
}

/// `np.rot90` on the first two axes: `out[r][c] = in[c][cols - 1 - r]`.
pub fn rot90<'a, A>(view: ArrayView3<'a, A>) -> ArrayView3<'a, A> {
    let mut rotated = view.permuted_axes([1, 0, 2]);
    rotated.invert_axis(Axis(0));
    rotated
}

/// Tile the sampled axial slices of a `(X, Y, Z, L)` display volume into a
/// `(rows_px, cols_px, L)` grid. Unfilled cells stay zero.
pub fn tile_grid(display: ArrayView4<'_, u8>, layout: &Layout) -> Array3<u8> {
    let (x, y, z, layers) = display.dim();
    let indices = sample_slices(z, layout.skip);
    // Rotated slices are Y rows by X columns.
    let (height, width) = (y, x);
    let (rows_px, cols_px) = layout.grid_shape(indices.len(), height, width);
    debug!(
        slices = indices.len(),
        rows = layout.nb_rows(indices.len()),
        columns = layout.nb_columns,
        rows_px,
        cols_px,
        "tiling grid"
    );

    let mut grid = Array3::<u8>::zeros((rows_px, cols_px, layers));
    for (i, &index) in indices.iter().enumerate() {
        let slice = rot90(display.index_axis(Axis(2), index));
        let (top, left) = layout.slice_origin(i, height, width);
        grid.slice_mut(s![top..top + height, left..left + width, ..])
            .assign(&slice);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    #[test]
    fn sampler_strides_from_zero() {
        assert_eq!(sample_slices(6, 1), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(sample_slices(7, 3), vec![0, 3, 6]);
        assert_eq!(sample_slices(2, 5), vec![0]);
    }

    #[test]
    fn layout_rejects_zero_columns_and_skip() {
        assert!(matches!(
            Layout::new(1, 2, 0),
            Err(MosaicError::Configuration(_))
        ));
        assert!(matches!(
            Layout::new(0, 2, 3),
            Err(MosaicError::Configuration(_))
        ));
    }

    #[test]
    fn rot90_matches_numpy() {
        // [[1, 2, 3], [4, 5, 6]] rotated counter-clockwise is
        // [[3, 6], [2, 5], [1, 4]].
        let input = Array2::from_shape_vec((2, 3), vec![1, 2, 3, 4, 5, 6])
            .unwrap()
            .insert_axis(Axis(2));
        let rotated = rot90(input.view());
        let flat: Vec<i32> = rotated.iter().copied().collect();
        assert_eq!(rotated.dim(), (3, 2, 1));
        assert_eq!(flat, vec![3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn grid_cells_follow_row_major_order() {
        // Each slice is filled with its own index + 1.
        let (x, y, z) = (4, 3, 5);
        let display = Array4::from_shape_fn((x, y, z, 1), |(_, _, k, _)| k as u8 + 1);
        let layout = Layout::new(1, 2, 3).unwrap();
        let grid = tile_grid(display.view(), &layout);

        assert_eq!(layout.nb_rows(5), 2);
        assert_eq!(grid.dim(), (2 * (3 + 2) + 2, 3 * (4 + 2) + 2, 1));
        for i in 0..6 {
            let (top, left) = layout.slice_origin(i, y, x);
            let cell = grid.slice(s![top..top + y, left..left + x, 0]);
            let expected = if i < z { i as u8 + 1 } else { 0 };
            assert!(cell.iter().all(|&v| v == expected), "cell {i}");
        }
    }

    #[test]
    fn gutters_are_background() {
        let display = Array4::from_elem((2, 2, 2, 1), 9u8);
        let layout = Layout::new(1, 4, 2).unwrap();
        let grid = tile_grid(display.view(), &layout);
        assert_eq!(grid.dim(), (1 * (2 + 4) + 4, 2 * (2 + 4) + 4, 1));
        assert_eq!(grid.iter().filter(|&&v| v == 9).count(), 8);
        assert!(grid.slice(s![0..4, .., 0]).iter().all(|&v| v == 0));
        assert!(grid.slice(s![.., 6..10, 0]).iter().all(|&v| v == 0));
    }

    #[test]
    fn skip_selects_every_other_slice() {
        let display = Array4::from_shape_fn((1, 1, 5, 1), |(_, _, k, _)| k as u8);
        let layout = Layout::new(2, 0, 5).unwrap();
        let grid = tile_grid(display.view(), &layout);
        let flat: Vec<u8> = grid.iter().copied().collect();
        assert_eq!(flat, vec![0, 2, 4, 0, 0]);
    }
}
