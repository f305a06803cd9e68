//! Scatter/gather convolution across a world of workers.
//!
//! The strategy is:
//!
//! - **Root-only storage**: rank 0 reads the image, and is the only rank
//!   that ever holds all of it.
//! - **Broadcast, then scatter**: the kernel and image dimensions are
//!   broadcast; each worker then receives exactly its row block.
//! - **Halo exchange**: workers trade `kernel_size / 2` edge rows with
//!   their neighbors; the global top and bottom replicate their edge row.
//! - **Gather**: rank 0 collects the output blocks in rank order and
//!   assembles (and optionally writes) the result.
//!
//! Partitions thinner than `kernel_size / 2` rows are fine: their ghost rows
//! come from several neighbors (see [`exchange_halos`]).

use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tessera_core::stencil::convolve_rows;
use tessera_core::{
    decompose, BackendType, CoreError, HaloBuffer, Image, Kernel, LoopSchedule, Partition, Pixel,
    RunReport,
};
use tessera_io::{read_image, write_image};

use crate::backend::{BackendInfo, ComputeError, ConvolutionBackend, WorkerContext};
use crate::comm::{Communicator, Launcher, World, ROOT};
use crate::exchange::{exchange_halos, EdgePolicy};

/// Scatter/gather convolution with boundary exchange.
#[derive(Debug, Clone, Copy)]
pub struct DistributedBackend<L = World> {
    launcher: L,
    schedule: LoopSchedule,
}

/// What the root broadcasts before scattering rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JobHeader {
    kernel: Option<Kernel>,
    height: usize,
    width: usize,
}

impl DistributedBackend {
    /// Run on `workers` in-process workers.
    pub fn new(workers: usize) -> Self {
        Self::with_launcher(World::new(workers))
    }
}

impl<L: Launcher> DistributedBackend<L> {
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            launcher,
            schedule: LoopSchedule::Serial,
        }
    }

    /// Parallelise each worker's inner loop over the global Rayon pool.
    pub fn with_schedule(mut self, schedule: LoopSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn workers(&self) -> usize {
        self.launcher.workers()
    }
}

impl<L: Launcher> ConvolutionBackend for DistributedBackend<L> {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: format!("Distributed ({} workers)", self.workers()),
            backend_type: BackendType::Distributed,
            workers: self.workers(),
            threads: threads_for(self.schedule),
        }
    }

    fn convolve(&self, image: &Image, kernel: &Kernel) -> Result<Image, ComputeError> {
        self.launcher.launch(|comm| {
            let input = comm.is_root().then_some((image, kernel));
            scatter_convolve_gather(comm, input, self.schedule)
        })
    }

    fn convolve_file(
        &self,
        input: &Path,
        output: &Path,
        kernel: &Kernel,
    ) -> Result<RunReport, ComputeError> {
        let (dims, elapsed) = self.launcher.launch(|comm| -> Result<_, ComputeError> {
            if !comm.is_root() {
                scatter_convolve_gather(comm, None, self.schedule)?;
                return Ok(None);
            }
            let start = Instant::now();
            let image = read_image(input).during(ROOT, "read input image")?;
            let result = scatter_convolve_gather(comm, Some((&image, kernel)), self.schedule)?
                .ok_or(ComputeError::MissingResult { rank: ROOT })?;
            write_image(output, &result).during(ROOT, "write output image")?;
            Ok(Some((image.dim(), start.elapsed().as_secs_f64())))
        })?;

        let info = self.info();
        info!(
            "{}: {} on {} in {elapsed:.4} s",
            info.name,
            kernel.name(),
            input.display()
        );
        Ok(info.report(kernel, input, dims, elapsed))
    }
}

pub(crate) fn threads_for(schedule: LoopSchedule) -> usize {
    match schedule {
        LoopSchedule::Serial => 1,
        LoopSchedule::Threaded => rayon::current_num_threads(),
    }
}

/// One worker's share of a scatter/gather convolution. Only the root passes
/// `input` and only the root gets the assembled image back.
fn scatter_convolve_gather<C: Communicator>(
    comm: &C,
    input: Option<(&Image, &Kernel)>,
    schedule: LoopSchedule,
) -> Result<Option<Image>, ComputeError> {
    let rank = comm.rank();

    let mut header = match input {
        Some((image, kernel)) => JobHeader {
            kernel: Some(kernel.clone()),
            height: image.nrows(),
            width: image.ncols(),
        },
        None => JobHeader::default(),
    };
    comm.broadcast(ROOT, &mut header)
        .during(rank, "broadcast kernel and dimensions")?;
    let JobHeader { kernel, height, width } = header;
    let kernel = kernel.ok_or(ComputeError::MissingResult { rank: ROOT })?;
    if width == 0 || height == 0 {
        return Err(CoreError::EmptyGrid { width, height }.into());
    }

    let partition = Partition::new(height, comm.size(), rank)?;
    debug!(
        "Worker {rank} owns rows {:?} of {height} (halo depth {})",
        partition.rows(),
        kernel.halo_depth()
    );

    let chunks = match input {
        Some((image, _)) => Some(split_rows(image, comm.size())?),
        None => None,
    };
    let owned = comm.scatterv(ROOT, chunks).during(rank, "scatter rows")?;

    let mut buffer = HaloBuffer::from_owned_cells(owned, width, kernel.halo_depth())?;
    if buffer.local_rows() != partition.local_rows {
        return Err(CoreError::ShapeMismatch {
            expected: partition.local_rows * width,
            actual: buffer.owned().len(),
        }
        .into());
    }
    exchange_halos(comm, &partition, &mut buffer, EdgePolicy::Replicate)?;

    let mut out = vec![Pixel::default(); partition.local_rows * width];
    convolve_rows(&buffer, &kernel, &mut out, schedule)?;

    let Some(parts) = comm.gatherv(ROOT, out).during(rank, "gather rows")? else {
        return Ok(None);
    };
    let cells: Vec<Pixel> = parts.into_iter().flatten().collect();
    let total = cells.len();
    let image = Array2::from_shape_vec((height, width), cells).map_err(|_| {
        CoreError::ShapeMismatch {
            expected: height * width,
            actual: total,
        }
    })?;
    Ok(Some(image))
}

/// Cut an image into the row blocks of a `workers`-way decomposition.
fn split_rows(image: &Image, workers: usize) -> Result<Vec<Vec<Pixel>>, CoreError> {
    Ok(decompose(image.nrows(), workers)?
        .iter()
        .map(|part| image.slice(s![part.rows(), ..]).iter().copied().collect())
        .collect())
}
