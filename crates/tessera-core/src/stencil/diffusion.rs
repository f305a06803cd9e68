//! 5-point Laplacian average for steady-state heat diffusion.
//!
//! Every owned interior cell becomes the mean of its four neighbours:
//!
//! $$u'_{i,j} = \tfrac14\,(u_{i-1,j} + u_{i+1,j} + u_{i,j-1} + u_{i,j+1})$$
//!
//! Cells on the global grid boundary (row 0, row `height - 1`, column 0,
//! column `width - 1`) hold their Dirichlet value and are copied through
//! unchanged. The ghost rows of a partition at the global top or bottom are
//! therefore never read.

use rayon::prelude::*;

use super::LoopSchedule;
use crate::error::CoreError;
use crate::halo::HaloBuffer;
use crate::partition::Partition;
use crate::types::TemperatureField;

/// Apply one Jacobi sweep to the owned rows of `input`, writing `output`.
///
/// `input` must have its ghost rows refreshed for any side that has a
/// neighbor; `partition` locates the owned rows in the global grid.
pub fn five_point_step(
    input: &HaloBuffer<f64>,
    output: &mut HaloBuffer<f64>,
    partition: &Partition,
    schedule: LoopSchedule,
) -> Result<(), CoreError> {
    if input.depth() < 1 {
        return Err(CoreError::HaloTooShallow {
            depth: input.depth(),
            required: 1,
        });
    }
    if output.width() != input.width() || output.local_rows() != input.local_rows() {
        return Err(CoreError::ShapeMismatch {
            expected: input.owned().len(),
            actual: output.owned().len(),
        });
    }
    if input.local_rows() != partition.local_rows {
        return Err(CoreError::ShapeMismatch {
            expected: partition.local_rows * input.width(),
            actual: input.owned().len(),
        });
    }
    let width = input.width();
    if width == 0 {
        return Err(CoreError::EmptyGrid {
            width,
            height: partition.height,
        });
    }

    let sweep = |(local_row, out): (usize, &mut [f64])| {
        let global_row = partition.start_row + local_row;
        let centre = input.owned_row(local_row);
        if global_row == 0 || global_row + 1 == partition.height || width < 3 {
            out.copy_from_slice(centre);
            return;
        }
        let padded = local_row + input.depth();
        let up = input.row(padded - 1);
        let down = input.row(padded + 1);

        out[0] = centre[0];
        out[width - 1] = centre[width - 1];
        for j in 1..width - 1 {
            out[j] = 0.25 * (up[j] + down[j] + centre[j - 1] + centre[j + 1]);
        }
    };

    match schedule {
        LoopSchedule::Serial => output.owned_mut().chunks_mut(width).enumerate().for_each(sweep),
        LoopSchedule::Threaded => output
            .owned_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(sweep),
    }
    Ok(())
}

/// One Jacobi sweep over a whole field held by a single worker.
pub fn diffuse_field(
    field: &TemperatureField,
    schedule: LoopSchedule,
) -> Result<TemperatureField, CoreError> {
    let (height, width) = field.dim();
    let partition = Partition::new(height, 1, 0)?;
    let input = HaloBuffer::from_rows(field.view(), 1);
    let mut output = HaloBuffer::new(height, width, 1);
    five_point_step(&input, &mut output, &partition, schedule)?;
    Ok(output.to_grid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_single_sweep_values() {
        let field = array![
            [0.0, 100.0, 100.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
        ];
        let next = diffuse_field(&field, LoopSchedule::Serial).unwrap();
        // Boundary rows and columns are pinned.
        assert_eq!(next.row(0), field.row(0));
        assert_eq!(next.row(3), field.row(3));
        assert_abs_diff_eq!(next[[1, 1]], 25.0);
        assert_abs_diff_eq!(next[[1, 2]], 25.0);
        assert_abs_diff_eq!(next[[2, 1]], 0.0);
        assert_eq!(next[[1, 0]], 0.0);
    }

    #[test]
    fn test_uniform_field_is_fixed_point() {
        let field = Array2::from_elem((6, 5), 20.0);
        let next = diffuse_field(&field, LoopSchedule::Serial).unwrap();
        assert_eq!(next, field);
    }

    #[test]
    fn test_narrow_grids_are_all_boundary() {
        let field = Array2::from_shape_fn((5, 2), |(r, c)| (r * 2 + c) as f64);
        assert_eq!(diffuse_field(&field, LoopSchedule::Serial).unwrap(), field);
        let flat = Array2::from_shape_fn((2, 6), |(r, c)| (r + c) as f64);
        assert_eq!(diffuse_field(&flat, LoopSchedule::Serial).unwrap(), flat);
    }

    #[test]
    fn test_threaded_matches_serial() {
        let field = Array2::from_shape_fn((17, 13), |(r, c)| ((r * 31 + c * 7) % 50) as f64);
        let a = diffuse_field(&field, LoopSchedule::Serial).unwrap();
        let b = diffuse_field(&field, LoopSchedule::Threaded).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let partition = Partition::new(4, 1, 0).unwrap();
        let input = HaloBuffer::<f64>::new(4, 4, 1);
        let mut output = HaloBuffer::<f64>::new(3, 4, 1);
        assert!(matches!(
            five_point_step(&input, &mut output, &partition, LoopSchedule::Serial),
            Err(CoreError::ShapeMismatch { .. })
        ));
    }
}
