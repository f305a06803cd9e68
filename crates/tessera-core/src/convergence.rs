//! Convergence detection for iterative stencils.
//!
//! A worker compares its owned cells before and after a sweep and reports a
//! [`LocalVerdict`]. Verdicts from every worker are folded with
//! [`LocalVerdict::combine`], which is associative and commutative, so the
//! same result comes out of any reduction order.

use serde::{Deserialize, Serialize};

/// Largest per-cell change tolerated before a cell counts as still moving.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Sweeps performed before a run gives up on converging.
pub const DEFAULT_MAX_ITERATIONS: usize = 2000;

/// Stopping rule for an iterative solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Largest absolute difference between matching cells of two slices.
///
/// Slices are compared up to the shorter length.
pub fn max_abs_delta(old: &[f64], new: &[f64]) -> f64 {
    old.iter()
        .zip(new)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

/// One worker's view of convergence after a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalVerdict {
    pub converged: bool,
    pub max_delta: f64,
}

impl LocalVerdict {
    pub fn assess(old: &[f64], new: &[f64], epsilon: f64) -> Self {
        let max_delta = max_abs_delta(old, new);
        Self {
            converged: max_delta <= epsilon,
            max_delta,
        }
    }

    /// Logical AND of the flags, maximum of the deltas.
    pub fn combine(self, other: Self) -> Self {
        Self {
            converged: self.converged && other.converged,
            max_delta: self.max_delta.max(other.max_delta),
        }
    }
}

/// How an iterative run ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Every worker reported converged after `iterations` sweeps.
    Converged { iterations: usize },
    /// The iteration cap was hit first; `last_delta` is the global maximum
    /// cell change of the final sweep.
    IterationCapReached { iterations: usize, last_delta: f64 },
}

impl ConvergenceStatus {
    pub fn converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged { .. })
    }

    pub fn iterations(&self) -> usize {
        match *self {
            ConvergenceStatus::Converged { iterations }
            | ConvergenceStatus::IterationCapReached { iterations, .. } => iterations,
        }
    }
}
