//! Local stencil kernels applied over padded [`HaloBuffer`](crate::halo::HaloBuffer)s.
//!
//! Both stencils read from one buffer and write into a separate output, so
//! a cell is never overwritten while a neighbor may still read it. With
//! [`LoopSchedule::Threaded`] output rows are distributed over the rayon pool;
//! every row is written by exactly one task.
//!
//! - [`convolution`] — `k x k` weighted convolution over RGB pixels.
//! - [`diffusion`] — 5-point Laplacian average with fixed (Dirichlet) edges.

pub mod convolution;
pub mod diffusion;

use serde::{Deserialize, Serialize};

/// How a stencil walks over its output rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSchedule {
    /// One row after another on the calling thread.
    #[default]
    Serial,
    /// Rows spread over the current rayon thread pool.
    Threaded,
}

pub use convolution::{convolve_image, convolve_rows};
pub use diffusion::{diffuse_field, five_point_step};
