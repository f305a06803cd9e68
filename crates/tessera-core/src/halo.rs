//! Local grid slices padded with ghost rows.
//!
//! A [`HaloBuffer`] is one contiguous row-major allocation of
//! `(local_rows + 2 * depth) * width` cells:
//!
//! ```text
//! padded row 0            +-----------------------+
//!   ..                    |   top ghost rows      |  <- copy of upper neighbor's edge
//! padded row depth        +-----------------------+
//!   ..                    |   owned rows          |  <- authoritative
//! padded row depth+local  +-----------------------+
//!   ..                    |   bottom ghost rows   |  <- copy of lower neighbor's edge
//!                         +-----------------------+
//! ```
//!
//! Owned cells are addressed through a fixed offset of `depth` rows, so the
//! stencil code can read `row - 1` or `row + depth` without special cases.

use std::ops::Range;

use ndarray::{Array2, ArrayView2};

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct HaloBuffer<T> {
    width: usize,
    local_rows: usize,
    depth: usize,
    cells: Vec<T>,
}

impl<T: Clone + Default> HaloBuffer<T> {
    /// Allocate a buffer with every cell set to `T::default()`.
    pub fn new(local_rows: usize, width: usize, depth: usize) -> Self {
        Self {
            width,
            local_rows,
            depth,
            cells: vec![T::default(); (local_rows + 2 * depth) * width],
        }
    }

    /// Copy a block of owned rows into a new buffer. Ghost rows start at
    /// `T::default()`.
    pub fn from_rows(owned: ArrayView2<'_, T>, depth: usize) -> Self {
        let (local_rows, width) = owned.dim();
        let mut cells = Vec::with_capacity((local_rows + 2 * depth) * width);
        cells.resize(depth * width, T::default());
        cells.extend(owned.iter().cloned());
        cells.resize((local_rows + 2 * depth) * width, T::default());
        Self {
            width,
            local_rows,
            depth,
            cells,
        }
    }

    /// Wrap a flat row-major block of owned cells, as received from a scatter.
    pub fn from_owned_cells(owned: Vec<T>, width: usize, depth: usize) -> Result<Self, CoreError> {
        if width == 0 || owned.is_empty() {
            return Err(CoreError::EmptyGrid {
                width,
                height: if width == 0 { 0 } else { owned.len() / width },
            });
        }
        if owned.len() % width != 0 {
            return Err(CoreError::ShapeMismatch {
                expected: (owned.len() / width + 1) * width,
                actual: owned.len(),
            });
        }
        let local_rows = owned.len() / width;
        let mut cells = Vec::with_capacity((local_rows + 2 * depth) * width);
        cells.resize(depth * width, T::default());
        cells.extend(owned);
        cells.resize((local_rows + 2 * depth) * width, T::default());
        Ok(Self {
            width,
            local_rows,
            depth,
            cells,
        })
    }
}

impl<T> HaloBuffer<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn local_rows(&self) -> usize {
        self.local_rows
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Owned rows plus both ghost blocks.
    pub fn padded_rows(&self) -> usize {
        self.local_rows + 2 * self.depth
    }

    fn span(&self, first_padded_row: usize, rows: usize) -> Range<usize> {
        first_padded_row * self.width..(first_padded_row + rows) * self.width
    }

    /// A row by padded index (`0..padded_rows()`).
    pub fn row(&self, padded_row: usize) -> &[T] {
        &self.cells[self.span(padded_row, 1)]
    }

    pub fn row_mut(&mut self, padded_row: usize) -> &mut [T] {
        let span = self.span(padded_row, 1);
        &mut self.cells[span]
    }

    /// An owned row by local index (`0..local_rows()`).
    pub fn owned_row(&self, local_row: usize) -> &[T] {
        self.row(local_row + self.depth)
    }

    /// All owned cells as one contiguous row-major slice.
    pub fn owned(&self) -> &[T] {
        &self.cells[self.span(self.depth, self.local_rows)]
    }

    pub fn owned_mut(&mut self) -> &mut [T] {
        let span = self.span(self.depth, self.local_rows);
        &mut self.cells[span]
    }

    /// Consume the buffer, keeping only the owned cells.
    pub fn into_owned_cells(mut self) -> Vec<T> {
        let span = self.span(self.depth, self.local_rows);
        self.cells.truncate(span.end);
        self.cells.drain(..span.start);
        self.cells
    }
}

impl<T: Clone> HaloBuffer<T> {
    /// Overwrite padded row `to` with a copy of padded row `from`.
    pub fn copy_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let (from, to) = (self.span(from, 1), self.span(to, 1));
        for (src, dst) in from.zip(to) {
            self.cells[dst] = self.cells[src].clone();
        }
    }

    /// Fill every top ghost row with a copy of the first owned row.
    pub fn replicate_top_edge(&mut self) {
        if self.width == 0 || self.local_rows == 0 {
            return;
        }
        let split = self.depth * self.width;
        let (ghost, rest) = self.cells.split_at_mut(split);
        let first = &rest[..self.width];
        for row in ghost.chunks_mut(self.width) {
            row.clone_from_slice(first);
        }
    }

    /// Fill every bottom ghost row with a copy of the last owned row.
    pub fn replicate_bottom_edge(&mut self) {
        if self.width == 0 || self.local_rows == 0 {
            return;
        }
        let split = (self.depth + self.local_rows) * self.width;
        let (body, ghost) = self.cells.split_at_mut(split);
        let last = &body[split - self.width..];
        for row in ghost.chunks_mut(self.width) {
            row.clone_from_slice(last);
        }
    }

    /// Copy the owned rows out as a `(local_rows, width)` grid.
    pub fn to_grid(&self) -> Array2<T> {
        let owned = self.owned();
        Array2::from_shape_fn((self.local_rows, self.width), |(r, c)| {
            owned[r * self.width + c].clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn numbered(rows: usize, width: usize, depth: usize) -> HaloBuffer<i32> {
        let grid = Array2::from_shape_fn((rows, width), |(r, c)| (r * 10 + c) as i32 + 1);
        HaloBuffer::from_rows(grid.view(), depth)
    }

    #[test]
    fn test_layout_offsets() {
        let buf = numbered(3, 4, 2);
        assert_eq!(buf.padded_rows(), 7);
        assert_eq!(buf.row(0), &[0; 4]);
        assert_eq!(buf.row(1), &[0; 4]);
        assert_eq!(buf.owned_row(0), &[1, 2, 3, 4]);
        assert_eq!(buf.row(2), buf.owned_row(0));
        assert_eq!(buf.owned_row(2), &[21, 22, 23, 24]);
        assert_eq!(buf.row(4), buf.owned_row(2));
        assert_eq!(buf.row(5), &[0; 4]);
        assert_eq!(buf.row(6), &[0; 4]);
    }

    #[test]
    fn test_copy_row_fills_ghosts() {
        let mut buf = numbered(2, 3, 1);
        buf.copy_row(2, 0);
        buf.copy_row(1, 3);
        assert_eq!(buf.row(0), &[11, 12, 13]);
        assert_eq!(buf.row(3), &[1, 2, 3]);
        buf.copy_row(1, 1);
        assert_eq!(buf.owned(), &[1, 2, 3, 11, 12, 13]);
    }

    #[test]
    fn test_replicate_edges_clamps_rows() {
        let mut buf = numbered(2, 3, 2);
        buf.replicate_top_edge();
        buf.replicate_bottom_edge();
        assert_eq!(buf.row(0), &[1, 2, 3]);
        assert_eq!(buf.row(1), &[1, 2, 3]);
        assert_eq!(buf.row(4), &[11, 12, 13]);
        assert_eq!(buf.row(5), &[11, 12, 13]);
        // Owned rows untouched.
        assert_eq!(buf.owned(), &[1, 2, 3, 11, 12, 13]);
    }

    #[test]
    fn test_owned_cells_round_trip() {
        let cells = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let buf = HaloBuffer::from_owned_cells(cells.clone(), 3, 1).unwrap();
        assert_eq!(buf.local_rows(), 2);
        assert_eq!(buf.to_grid(), array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(buf.into_owned_cells(), cells);
    }

    #[test]
    fn test_owned_cells_shape_errors() {
        assert!(matches!(
            HaloBuffer::<u8>::from_owned_cells(vec![1, 2, 3], 2, 1),
            Err(CoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            HaloBuffer::<u8>::from_owned_cells(vec![], 2, 1),
            Err(CoreError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn test_zero_depth_has_no_ghosts() {
        let buf = numbered(2, 2, 0);
        assert_eq!(buf.padded_rows(), 2);
        assert_eq!(buf.owned(), &[1, 2, 11, 12]);
    }
}
