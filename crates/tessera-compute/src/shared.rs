//! Direct chunked convolution for workers sharing a filesystem.
//!
//! No rank ever holds the whole image and nothing is scattered or gathered.
//! Every worker reads its own rows plus up to `kernel_size / 2` rows on
//! each side straight from the input file, convolves, and writes its own
//! byte range of the output. Rows beyond the image edge are clamped to the
//! nearest existing row, so there is no minimum partition height.
//!
//! Rank 0 creates the output file (header and final length) before a
//! barrier; all writes happen after it, and a second barrier marks the end
//! of the timed region.

use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use tessera_core::stencil::convolve_rows;
use tessera_core::{
    BackendType, HaloBuffer, Image, Kernel, LoopSchedule, Partition, Pixel, RunReport,
};
use tessera_io::{create_image_file, read_header, read_rows, write_rows};

use crate::backend::{BackendInfo, ComputeError, ConvolutionBackend, WorkerContext};
use crate::comm::{Communicator, Launcher, World};
use crate::distributed::threads_for;

/// Workers that each read and write their own rows in storage.
#[derive(Debug, Clone, Copy)]
pub struct SharedFileBackend<L = World> {
    launcher: L,
    schedule: LoopSchedule,
}

impl SharedFileBackend {
    /// Run on `workers` in-process workers.
    pub fn new(workers: usize) -> Self {
        Self::with_launcher(World::new(workers))
    }
}

impl<L: Launcher> SharedFileBackend<L> {
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            launcher,
            schedule: LoopSchedule::Serial,
        }
    }

    pub fn with_schedule(mut self, schedule: LoopSchedule) -> Self {
        self.schedule = schedule;
        self
    }
}

impl<L: Launcher> ConvolutionBackend for SharedFileBackend<L> {
    fn info(&self) -> BackendInfo {
        let workers = self.launcher.workers();
        BackendInfo {
            name: format!("Shared filesystem ({workers} workers)"),
            backend_type: BackendType::Shared,
            workers,
            threads: threads_for(self.schedule),
        }
    }

    fn convolve(&self, _image: &Image, _kernel: &Kernel) -> Result<Image, ComputeError> {
        Err(ComputeError::Unavailable(
            "the shared-filesystem backend only convolves files".into(),
        ))
    }

    fn convolve_file(
        &self,
        input: &Path,
        output: &Path,
        kernel: &Kernel,
    ) -> Result<RunReport, ComputeError> {
        if input == output {
            return Err(ComputeError::Unavailable(
                "input and output must be different files".into(),
            ));
        }
        let (dims, elapsed) = self.launcher.launch(|comm| {
            convolve_own_rows(comm, input, output, kernel, self.schedule)
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

/// One worker's share. The root returns `((height, width), elapsed_secs)`.
fn convolve_own_rows<C: Communicator>(
    comm: &C,
    input: &Path,
    output: &Path,
    kernel: &Kernel,
    schedule: LoopSchedule,
) -> Result<Option<((usize, usize), f64)>, ComputeError> {
    let rank = comm.rank();
    let start = Instant::now();

    let header = read_header(input).during(rank, "read input header")?;
    let (height, width) = (header.height, header.width);
    let partition = Partition::new(height, comm.size(), rank)?;
    let depth = kernel.halo_depth();

    let buffer = load_padded_rows(input, &partition, depth).during(rank, "read input rows")?;
    debug!(
        "Worker {rank} read rows {:?} of {height} with {depth} halo rows",
        partition.rows()
    );

    let mut out = vec![Pixel::default(); partition.local_rows * width];
    convolve_rows(&buffer, kernel, &mut out, schedule)?;
    let block = Image::from_shape_vec((partition.local_rows, width), out).map_err(|_| {
        tessera_core::CoreError::ShapeMismatch {
            expected: partition.local_rows * width,
            actual: buffer.owned().len(),
        }
    })?;

    let out_header = if comm.is_root() {
        Some(create_image_file(output, width, height).during(rank, "create output file")?)
    } else {
        None
    };
    comm.barrier().during(rank, "wait for output file")?;
    let out_header = match out_header {
        Some(header) => header,
        None => read_header(output).during(rank, "read output header")?,
    };
    write_rows(output, &out_header, partition.start_row, block.view())
        .during(rank, "write output rows")?;
    comm.barrier().during(rank, "wait for all writes")?;

    Ok(comm
        .is_root()
        .then(|| ((height, width), start.elapsed().as_secs_f64())))
}

/// Read a partition's rows and fill its ghost rows from the file, clamping
/// rows outside the image to the first or last row.
fn load_padded_rows(
    path: &Path,
    partition: &Partition,
    depth: usize,
) -> Result<HaloBuffer<Pixel>, tessera_io::ImageIoError> {
    let height = partition.height;
    let first = partition.start_row.saturating_sub(depth);
    let last = (partition.end_row() + depth).min(height);
    let (header, block) = read_rows(path, first, last - first)?;

    let mut buffer = HaloBuffer::new(partition.local_rows, header.width, depth);
    for padded in 0..buffer.padded_rows() {
        let global = (partition.start_row + padded)
            .saturating_sub(depth)
            .min(height - 1);
        let row = block.row(global - first);
        for (dst, src) in buffer.row_mut(padded).iter_mut().zip(row.iter()) {
            *dst = *src;
        }
    }
    Ok(buffer)
}
