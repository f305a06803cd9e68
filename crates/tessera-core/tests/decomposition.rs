//! Integration tests for the decomposition and stencil layer.
//!
//! ## Coverage
//! - Partition coverage: contiguous, gap-free, skew of at most one row
//! - Stencils over a hand-assembled decomposition match the single-worker result
//! - Heat sweeps over partitions match the whole-field sweep
//! - Heat iteration on a uniform-interior plate has non-increasing max delta

use approx::assert_abs_diff_eq;
use ndarray::{s, Array2};

use tessera_core::convergence::LocalVerdict;
use tessera_core::stencil::{convolve_image, convolve_rows, diffuse_field, five_point_step};
use tessera_core::{catalog, decompose, HaloBuffer, HeatPlate, Image, LoopSchedule, Pixel};

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

fn test_image(height: usize, width: usize) -> Image {
    Array2::from_shape_fn((height, width), |(y, x)| {
        Pixel::new(
            ((y * 53 + x * 29) % 256) as u8,
            ((y * y + 3 * x) % 256) as u8,
            ((x * x + 7 * y) % 256) as u8,
        )
    })
}

/// Fill a partition's ghost rows straight from the global grid, clamping
/// rows outside `[0, height)` to the nearest edge row.
fn padded_block<T: Clone + Default>(
    grid: &Array2<T>,
    start: usize,
    rows: usize,
    depth: usize,
) -> HaloBuffer<T> {
    let height = grid.nrows();
    let mut buf = HaloBuffer::from_rows(grid.slice(s![start..start + rows, ..]), depth);
    for ghost in 0..depth {
        let above = (start + ghost).saturating_sub(depth);
        let below = (start + rows + ghost).min(height - 1);
        buf.row_mut(ghost).clone_from_slice(grid.row(above).as_slice().unwrap());
        buf.row_mut(depth + rows + ghost)
            .clone_from_slice(grid.row(below).as_slice().unwrap());
    }
    buf
}

// ─────────────────────────────────────────────────────────────
// Partitioner
// ─────────────────────────────────────────────────────────────

#[test]
fn test_partitions_cover_grid_exactly() {
    for height in 1..=40 {
        for workers in 1..=height {
            let parts = decompose(height, workers).unwrap();
            assert_eq!(parts.len(), workers);
            assert_eq!(parts[0].start_row, 0);
            assert_eq!(parts[workers - 1].end_row(), height);
            for pair in parts.windows(2) {
                assert_eq!(pair[0].end_row(), pair[1].start_row, "gap at H={height} W={workers}");
            }
            let min = parts.iter().map(|p| p.local_rows).min().unwrap();
            let max = parts.iter().map(|p| p.local_rows).max().unwrap();
            assert!(min >= 1 && max - min <= 1, "skew at H={height} W={workers}");
            let total: usize = parts.iter().map(|p| p.local_rows).sum();
            assert_eq!(total, height);
        }
        assert!(decompose(height, height + 1).is_err());
    }
}

// ─────────────────────────────────────────────────────────────
// Convolution
// ─────────────────────────────────────────────────────────────

#[test]
fn test_partitioned_convolution_matches_whole_image() {
    let image = test_image(19, 11);
    for kernel in catalog() {
        let whole = convolve_image(&image, &kernel, LoopSchedule::Serial).unwrap();
        for workers in [1, 2, 3, 5, 19] {
            let mut stitched = Vec::with_capacity(image.len());
            for part in decompose(image.nrows(), workers).unwrap() {
                let depth = kernel.halo_depth();
                let buf = padded_block(&image, part.start_row, part.local_rows, depth);
                let mut out = vec![Pixel::default(); part.local_rows * image.ncols()];
                convolve_rows(&buf, &kernel, &mut out, LoopSchedule::Serial).unwrap();
                stitched.extend(out);
            }
            let stitched = Array2::from_shape_vec(image.dim(), stitched).unwrap();
            assert_eq!(stitched, whole, "{} with {workers} workers", kernel.name());
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Heat diffusion
// ─────────────────────────────────────────────────────────────

#[test]
fn test_partitioned_heat_sweep_matches_whole_field() {
    let field = HeatPlate::new(10, 12).unwrap().initial_field();
    let field = diffuse_field(&field, LoopSchedule::Serial).unwrap();
    let whole = diffuse_field(&field, LoopSchedule::Serial).unwrap();

    for workers in [2, 3, 4, 6] {
        let mut stitched = Vec::new();
        for part in decompose(field.nrows(), workers).unwrap() {
            let buf = padded_block(&field, part.start_row, part.local_rows, 1);
            let mut out = HaloBuffer::new(part.local_rows, field.ncols(), 1);
            five_point_step(&buf, &mut out, &part, LoopSchedule::Threaded).unwrap();
            stitched.extend(out.into_owned_cells());
        }
        let stitched = Array2::from_shape_vec(field.dim(), stitched).unwrap();
        assert_eq!(stitched, whole, "{workers} workers");
    }
}

#[test]
fn test_four_by_four_scenario_row_one() {
    let mut field = Array2::zeros((4, 4));
    field[[0, 1]] = 100.0;
    field[[0, 2]] = 100.0;
    let whole = diffuse_field(&field, LoopSchedule::Serial).unwrap();

    let parts = decompose(4, 2).unwrap();
    let top = padded_block(&field, 0, 2, 1);
    let mut out = HaloBuffer::new(2, 4, 1);
    five_point_step(&top, &mut out, &parts[0], LoopSchedule::Serial).unwrap();

    assert_eq!(out.owned_row(1), whole.row(1).as_slice().unwrap());
    assert_abs_diff_eq!(out.owned_row(1)[1], 25.0);
    assert_abs_diff_eq!(out.owned_row(1)[2], 25.0);
}

#[test]
fn test_heat_delta_is_non_increasing() {
    let mut field = HeatPlate::new(16, 16).unwrap().initial_field();
    let mut previous = f64::INFINITY;
    for _ in 0..200 {
        let next = diffuse_field(&field, LoopSchedule::Serial).unwrap();
        let verdict = LocalVerdict::assess(
            field.as_slice().unwrap(),
            next.as_slice().unwrap(),
            1e-6,
        );
        assert!(verdict.max_delta <= previous + 1e-12);
        previous = verdict.max_delta;
        field = next;
    }
    assert!(previous < 5.0);
}
