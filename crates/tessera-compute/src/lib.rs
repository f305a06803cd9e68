//! # Tessera Compute
//!
//! Worker runtime and execution backends for the Tessera workspace. This
//! crate runs the stencils from `tessera-core` across a world of workers
//! that communicate only by message passing.
//!
//! ## Available backends
//!
//! | Backend | Workers | Storage access |
//! |---------|---------|----------------|
//! | [`SerialBackend`] | 1 | whole image |
//! | [`MultithreadedBackend`] | 1 (Rayon pool) | whole image |
//! | [`DistributedBackend`] | N | root reads, scatters, gathers, writes |
//! | [`SharedFileBackend`] | N | each worker reads/writes its own rows |
//!
//! All convolution backends implement [`ConvolutionBackend`] and produce
//! bit-identical images. [`HeatSolver`] runs the iterative diffusion
//! problem on the same runtime.
//!
//! ## Worker runtimes
//!
//! The multi-worker backends are generic over a [`Launcher`]. The default,
//! [`World`], runs workers as threads of the calling process. With the
//! `distributed` feature, `MpiWorld` runs one worker per MPI process:
//!
//! ```ignore
//! let _universe = mpi::initialize().ok_or(ComputeError::Unavailable("MPI".into()))?;
//! let backend = DistributedBackend::with_launcher(MpiWorld);
//! ```

pub mod backend;
pub mod comm;
pub mod cpu;
pub mod distributed;
pub mod exchange;
pub mod heat;
pub mod shared;

pub use backend::{BackendInfo, ComputeError, ConvolutionBackend};
#[cfg(feature = "distributed")]
pub use comm::{MpiComm, MpiWorld};
pub use comm::{CommError, Communicator, Launcher, Tag, ThreadComm, Wire, World, ROOT};
pub use cpu::{MultithreadedBackend, SerialBackend};
pub use distributed::DistributedBackend;
pub use exchange::{exchange_halos, EdgePolicy};
pub use heat::{HeatOutcome, HeatSolver};
pub use shared::SharedFileBackend;
