//! Convolution backend trait and shared error type.
//!
//! The [`ConvolutionBackend`] trait abstracts over the concurrency strategy
//! (one thread, a thread pool, scatter/gather workers, workers doing their
//! own file I/O) so that callers can run and compare every strategy through
//! the same interface.

use std::path::Path;
use std::time::Instant;

use log::info;
use tessera_core::{BackendType, CoreError, Image, Kernel, RunReport};
use tessera_io::{read_image, write_image, ImageIoError};
use thiserror::Error;

use crate::comm::CommError;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Worker {rank} failed to {operation}: {source}")]
    Storage {
        rank: usize,
        operation: &'static str,
        source: ImageIoError,
    },

    #[error("Worker {rank} failed to {operation}: {source}")]
    Communication {
        rank: usize,
        operation: &'static str,
        source: CommError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),

    #[error("Worker {rank} panicked")]
    WorkerPanicked { rank: usize },

    #[error("Worker {rank} finished without producing its result")]
    MissingResult { rank: usize },

    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),
}

impl From<CommError> for ComputeError {
    fn from(source: CommError) -> Self {
        match source {
            CommError::Panicked { rank } => ComputeError::WorkerPanicked { rank },
            CommError::EmptyWorld => ComputeError::Config(CoreError::NoWorkers),
            CommError::MissingResult { rank } => ComputeError::MissingResult { rank },
            source => ComputeError::Communication {
                rank: crate::comm::ROOT,
                operation: "coordinate workers",
                source,
            },
        }
    }
}

/// Attach the failing worker and operation to a lower-level error.
pub(crate) trait WorkerContext<T> {
    fn during(self, rank: usize, operation: &'static str) -> Result<T, ComputeError>;
}

impl<T> WorkerContext<T> for Result<T, CommError> {
    fn during(self, rank: usize, operation: &'static str) -> Result<T, ComputeError> {
        self.map_err(|source| ComputeError::Communication {
            rank,
            operation,
            source,
        })
    }
}

impl<T> WorkerContext<T> for Result<T, ImageIoError> {
    fn during(self, rank: usize, operation: &'static str) -> Result<T, ComputeError> {
        self.map_err(|source| ComputeError::Storage {
            rank,
            operation,
            source,
        })
    }
}

/// Describes a configured backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub workers: usize,
    /// Threads available to each worker's inner loop.
    pub threads: usize,
}

impl BackendInfo {
    /// Build the report for one completed file-to-file run.
    pub fn report(
        &self,
        kernel: &Kernel,
        input: &Path,
        dims: (usize, usize),
        elapsed_secs: f64,
    ) -> RunReport {
        let (height, width) = dims;
        RunReport {
            backend: self.backend_type,
            kernel: kernel.name().to_string(),
            input: input.file_name().map(|name| name.to_string_lossy().into_owned()),
            width,
            height,
            workers: self.workers,
            threads: self.threads,
            elapsed_secs,
            iterations: 1,
            converged: true,
        }
    }
}

/// A strategy for applying one convolution kernel to one image.
pub trait ConvolutionBackend: Send + Sync {
    /// Return information about the backend.
    fn info(&self) -> BackendInfo;

    /// Convolve an image held in memory.
    fn convolve(&self, image: &Image, kernel: &Kernel) -> Result<Image, ComputeError>;

    /// Read `input`, convolve it and write `output`, timing the whole
    /// read-compute-write sequence.
    fn convolve_file(
        &self,
        input: &Path,
        output: &Path,
        kernel: &Kernel,
    ) -> Result<RunReport, ComputeError> {
        let info = self.info();
        let start = Instant::now();
        let image = read_image(input).during(crate::comm::ROOT, "read input image")?;
        let result = self.convolve(&image, kernel)?;
        write_image(output, &result).during(crate::comm::ROOT, "write output image")?;
        let elapsed = start.elapsed().as_secs_f64();

        info!(
            "{}: {} on {} in {elapsed:.4} s",
            info.name,
            kernel.name(),
            input.display()
        );
        Ok(info.report(kernel, input, image.dim(), elapsed))
    }
}
