//! Single-worker backends: plain serial and Rayon-parallel.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tessera_core::stencil::convolve_image;
use tessera_core::{BackendType, Image, Kernel, LoopSchedule};

use crate::backend::{BackendInfo, ComputeError, ConvolutionBackend};

/// One worker, one thread. The reference every other backend is checked
/// against.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ConvolutionBackend for SerialBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "Serial".to_string(),
            backend_type: BackendType::Serial,
            workers: 1,
            threads: 1,
        }
    }

    fn convolve(&self, image: &Image, kernel: &Kernel) -> Result<Image, ComputeError> {
        Ok(convolve_image(image, kernel, LoopSchedule::Serial)?)
    }
}

/// One worker whose output rows are spread over a dedicated Rayon pool.
pub struct MultithreadedBackend {
    pool: ThreadPool,
}

impl MultithreadedBackend {
    /// Create a backend with `num_threads` threads (`0` lets Rayon pick).
    pub fn new(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("tessera-conv-{i}"))
            .build()
            .map_err(|e| ComputeError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ConvolutionBackend for MultithreadedBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: format!("Multithreaded ({} threads)", self.num_threads()),
            backend_type: BackendType::Multithreaded,
            workers: 1,
            threads: self.num_threads(),
        }
    }

    fn convolve(&self, image: &Image, kernel: &Kernel) -> Result<Image, ComputeError> {
        let out = self
            .pool
            .install(|| convolve_image(image, kernel, LoopSchedule::Threaded))?;
        Ok(out)
    }
}
