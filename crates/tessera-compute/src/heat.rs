//! Distributed steady-state heat diffusion.
//!
//! The root scatters equal row blocks of the initial field. Each iteration
//! every worker refreshes its ghost rows, applies one 5-point sweep into a
//! second buffer, and joins a reduction that combines "all converged"
//! (logical AND) with the global maximum cell change. All workers therefore
//! see the same verdict and stop on the same iteration. Finally the root
//! gathers the blocks back into one field.

use std::mem;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tessera_core::convergence::LocalVerdict;
use tessera_core::stencil::five_point_step;
use tessera_core::{
    decompose, require_even_split, BackendType, ConvergenceCriteria, ConvergenceStatus, CoreError,
    HaloBuffer, LoopSchedule, Partition, RunReport, TemperatureField,
};

use crate::backend::{ComputeError, WorkerContext};
use crate::comm::{Communicator, Launcher, World, ROOT};
use crate::distributed::threads_for;
use crate::exchange::{exchange_halos, EdgePolicy};

/// Configuration for a distributed heat-diffusion solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatSolver<L = World> {
    pub launcher: L,
    pub criteria: ConvergenceCriteria,
    pub schedule: LoopSchedule,
}

/// Everything a heat solve produces.
#[derive(Debug, Clone)]
pub struct HeatOutcome {
    pub field: TemperatureField,
    pub status: ConvergenceStatus,
    pub report: RunReport,
    /// Global maximum cell change after each iteration.
    pub delta_history: Vec<f64>,
}

/// What the root hands back from a solve. One history entry per sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootResult {
    field: TemperatureField,
    converged: bool,
    history: Vec<f64>,
    elapsed_secs: f64,
}

impl RootResult {
    fn status(&self) -> ConvergenceStatus {
        let iterations = self.history.len();
        if self.converged {
            ConvergenceStatus::Converged { iterations }
        } else {
            ConvergenceStatus::IterationCapReached {
                iterations,
                last_delta: self.history.last().copied().unwrap_or(f64::INFINITY),
            }
        }
    }
}

impl Default for HeatSolver {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HeatSolver {
    /// Solve on `workers` in-process workers.
    pub fn new(workers: usize) -> Self {
        Self::with_launcher(World::new(workers))
    }
}

impl<L: Launcher> HeatSolver<L> {
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            launcher,
            criteria: ConvergenceCriteria::default(),
            schedule: LoopSchedule::Serial,
        }
    }

    pub fn workers(&self) -> usize {
        self.launcher.workers()
    }

    pub fn with_criteria(mut self, criteria: ConvergenceCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_schedule(mut self, schedule: LoopSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Iterate `initial` to convergence or to the iteration cap.
    ///
    /// Edge cells of `initial` are the fixed boundary values. The height must
    /// be a multiple of the worker count.
    pub fn solve(&self, initial: &TemperatureField) -> Result<HeatOutcome, ComputeError> {
        let (height, width) = initial.dim();
        if width == 0 || height == 0 {
            return Err(CoreError::EmptyGrid { width, height }.into());
        }
        let workers = self.workers();
        require_even_split(height, workers)?;
        info!(
            "Heat diffusion on {width}x{height} with {workers} workers (epsilon {:e}, cap {})",
            self.criteria.epsilon, self.criteria.max_iterations
        );

        let root = self.launcher.launch(|comm| {
            let field = comm.is_root().then_some(initial);
            self.run_worker(comm, field, height, width)
        })?;
        let status = root.status();

        match status {
            ConvergenceStatus::Converged { iterations } => {
                info!("Converged after {iterations} iterations in {:.4} s", root.elapsed_secs)
            }
            ConvergenceStatus::IterationCapReached { iterations, last_delta } => warn!(
                "Stopped at the iteration cap ({iterations}) with max delta {last_delta:e}"
            ),
        }

        let report = RunReport {
            backend: if workers == 1 {
                BackendType::Serial
            } else {
                BackendType::Distributed
            },
            kernel: "heat".to_string(),
            input: None,
            width,
            height,
            workers,
            threads: threads_for(self.schedule),
            elapsed_secs: root.elapsed_secs,
            iterations: status.iterations(),
            converged: status.converged(),
        };
        Ok(HeatOutcome {
            field: root.field,
            status,
            report,
            delta_history: root.history,
        })
    }

    fn run_worker<C: Communicator>(
        &self,
        comm: &C,
        initial: Option<&TemperatureField>,
        height: usize,
        width: usize,
    ) -> Result<Option<RootResult>, ComputeError> {
        let rank = comm.rank();
        let start = Instant::now();
        let partition = Partition::new(height, comm.size(), rank)?;

        let chunks = match initial {
            Some(field) => Some(
                decompose(height, comm.size())?
                    .iter()
                    .map(|part| field.slice(s![part.rows(), ..]).iter().copied().collect())
                    .collect(),
            ),
            None => None,
        };
        let owned: Vec<f64> = comm.scatterv(ROOT, chunks).during(rank, "scatter field")?;

        let mut current = HaloBuffer::from_owned_cells(owned, width, 1)?;
        let mut next = current.clone();
        let mut history = Vec::new();
        let mut converged = false;

        for iteration in 1..=self.criteria.max_iterations {
            exchange_halos(comm, &partition, &mut current, EdgePolicy::Fixed)?;
            five_point_step(&current, &mut next, &partition, self.schedule)?;

            let local = LocalVerdict::assess(current.owned(), next.owned(), self.criteria.epsilon);
            let global = comm
                .allreduce(local, LocalVerdict::combine)
                .during(rank, "reduce convergence")?;
            mem::swap(&mut current, &mut next);
            history.push(global.max_delta);

            if global.converged {
                converged = true;
                break;
            }
            if iteration % 100 == 0 && comm.is_root() {
                debug!("Iteration {iteration}: max delta {:e}", global.max_delta);
            }
        }

        let gathered = comm
            .gatherv(ROOT, current.into_owned_cells())
            .during(rank, "gather field")?;
        let Some(parts) = gathered else {
            return Ok(None);
        };
        let cells: Vec<f64> = parts.into_iter().flatten().collect();
        let total = cells.len();
        let field = Array2::from_shape_vec((height, width), cells).map_err(|_| {
            CoreError::ShapeMismatch {
                expected: height * width,
                actual: total,
            }
        })?;
        Ok(Some(RootResult {
            field,
            converged,
            history,
            elapsed_secs: start.elapsed().as_secs_f64(),
        }))
    }
}
