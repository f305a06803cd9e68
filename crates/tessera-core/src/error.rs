//! Configuration and shape errors raised before or during local computation.

use thiserror::Error;

/// Errors originating in the decomposition and stencil layer.
///
/// All of these are configuration errors in the sense that retrying the same
/// call cannot succeed: the caller must change the grid, worker count or
/// kernel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Grid must have at least one row and one column (got {width}x{height})")]
    EmptyGrid { width: usize, height: usize },

    #[error("Cannot split {height} rows across {workers} workers")]
    TooManyWorkers { height: usize, workers: usize },

    #[error("Grid height {height} is not divisible by worker count {workers}")]
    IndivisibleHeight { height: usize, workers: usize },

    #[error("Worker {rank} is out of range for a world of {workers} workers")]
    RankOutOfRange { rank: usize, workers: usize },

    #[error("Halo depth {depth} is too shallow for a stencil reaching {required} rows")]
    HaloTooShallow { depth: usize, required: usize },

    #[error("Kernel '{name}' has even size {size}; only odd sizes have a centre cell")]
    EvenKernel { name: String, size: usize },

    #[error("Kernel '{name}' of size {size} needs {expected} weights, got {actual}")]
    KernelWeights {
        name: String,
        size: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown kernel '{0}'")]
    UnknownKernel(String),

    #[error("Shape mismatch: expected {expected} cells, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}
