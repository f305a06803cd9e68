//! # Tessera Core
//!
//! The numerical backbone of the Tessera workspace. This crate holds
//! everything a single worker needs to compute its share of a 2-D stencil
//! problem: the row-block decomposition, the padded local buffer, the two
//! stencils and the convergence test. It performs no I/O and spawns no
//! threads beyond rayon's pool.
//!
//! ## Architecture
//!
//! A grid of `height` rows is split by [`partition::decompose`] into
//! contiguous row ranges. Each worker copies its rows into a
//! [`halo::HaloBuffer`], whose ghost rows are refreshed by the communication
//! layer (see `tessera-compute`) before every stencil application. The
//! stencils in [`stencil`] read the padded buffer and write a separate
//! output, so the same code serves one worker or many and produces
//! bit-identical results either way.
//!
//! ## Modules
//!
//! - [`types`] — Pixels, grids, backend labels and run reports.
//! - [`partition`] — Row-block decomposition.
//! - [`halo`] — Local buffer with ghost rows.
//! - [`kernel`] — Convolution kernels and the built-in catalog.
//! - [`stencil`] — Weighted convolution and the 5-point heat stencil.
//! - [`convergence`] — Per-worker verdicts and the global stopping rule.
//! - [`plate`] — Heat-diffusion initial condition.
//! - [`error`] — Configuration and shape errors.

pub mod convergence;
pub mod error;
pub mod halo;
pub mod kernel;
pub mod partition;
pub mod plate;
pub mod stencil;
pub mod types;

pub use convergence::{ConvergenceCriteria, ConvergenceStatus, LocalVerdict};
pub use error::CoreError;
pub use halo::HaloBuffer;
pub use kernel::{catalog, kernel_by_index, kernel_by_name, Kernel, KERNEL_CATALOG};
pub use partition::{decompose, require_even_split, Partition};
pub use plate::HeatPlate;
pub use stencil::LoopSchedule;
pub use types::{first_mismatch, BackendType, Image, Pixel, RunReport, TemperatureField};
