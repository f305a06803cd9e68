//! Weighted `k x k` convolution over RGB images.
//!
//! For every output cell `(y, x)`:
//!
//! $$\text{out}(y, x) = \text{clamp}\Big(\sum_{k_y, k_x} w_{k_y k_x}\,
//! \text{in}(y + k_y - h,\ x + k_x - h),\ 0,\ 255\Big)$$
//!
//! per channel, with `h = k / 2`. Column references outside the image clamp
//! to the nearest column; row references outside the owned block are served
//! by the halo, which holds either a neighbor's rows or a replica of the
//! edge row. Accumulation is in `f64`, in fixed `(k_y, k_x)` order, so every
//! decomposition of the same image produces bit-identical pixels.

use ndarray::Array2;
use rayon::prelude::*;

use super::LoopSchedule;
use crate::error::CoreError;
use crate::halo::HaloBuffer;
use crate::kernel::Kernel;
use crate::types::{Image, Pixel};

/// Convolve the owned rows of `input` into `output`.
///
/// `output` must hold exactly `local_rows * width` pixels; the ghost rows of
/// `input` must already be filled.
pub fn convolve_rows(
    input: &HaloBuffer<Pixel>,
    kernel: &Kernel,
    output: &mut [Pixel],
    schedule: LoopSchedule,
) -> Result<(), CoreError> {
    let width = input.width();
    if width == 0 || input.local_rows() == 0 {
        return Err(CoreError::EmptyGrid {
            width,
            height: input.local_rows(),
        });
    }
    if input.depth() < kernel.radius() {
        return Err(CoreError::HaloTooShallow {
            depth: input.depth(),
            required: kernel.radius(),
        });
    }
    let expected = input.local_rows() * width;
    if output.len() != expected {
        return Err(CoreError::ShapeMismatch {
            expected,
            actual: output.len(),
        });
    }

    match schedule {
        LoopSchedule::Serial => output
            .chunks_mut(width)
            .enumerate()
            .for_each(|(row, out)| convolve_row(input, kernel, row, out)),
        LoopSchedule::Threaded => output
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, out)| convolve_row(input, kernel, row, out)),
    }
    Ok(())
}

fn convolve_row(input: &HaloBuffer<Pixel>, kernel: &Kernel, local_row: usize, out: &mut [Pixel]) {
    let width = input.width();
    let size = kernel.size();
    let half = kernel.radius();
    // Padded index of the row under kernel row 0.
    let first = local_row + input.depth() - half;

    for (x, cell) in out.iter_mut().enumerate() {
        let (mut r, mut g, mut b) = (0.0_f64, 0.0_f64, 0.0_f64);
        for ky in 0..size {
            let row = input.row(first + ky);
            for kx in 0..size {
                let px = (x + kx).saturating_sub(half).min(width - 1);
                let p = row[px];
                let w = kernel.weight(ky, kx);
                r += f64::from(p.r) * w;
                g += f64::from(p.g) * w;
                b += f64::from(p.b) * w;
            }
        }
        *cell = Pixel::from_accumulators(r, g, b);
    }
}

/// Convolve a whole image on one worker, replicating edge rows.
pub fn convolve_image(
    image: &Image,
    kernel: &Kernel,
    schedule: LoopSchedule,
) -> Result<Image, CoreError> {
    let (height, width) = image.dim();
    if width == 0 || height == 0 {
        return Err(CoreError::EmptyGrid { width, height });
    }
    let mut padded = HaloBuffer::from_rows(image.view(), kernel.halo_depth());
    padded.replicate_top_edge();
    padded.replicate_bottom_edge();

    let mut out = vec![Pixel::default(); height * width];
    convolve_rows(&padded, kernel, &mut out, schedule)?;
    Array2::from_shape_vec((height, width), out).map_err(|_| CoreError::ShapeMismatch {
        expected: height * width,
        actual: image.len(),
    })
}
