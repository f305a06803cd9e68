//! Core types shared across the Tessera workspace.
//!
//! Grids are plain row-major [`ndarray::Array2`] values with shape
//! `(height, width)`; row 0 is the visual top of the grid. This module adds
//! the pixel cell type and the result record every run returns.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A single 3-channel, 8-bit-per-channel pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Pixel {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// A grey pixel with all three channels set to `level`.
    pub const fn grey(level: u8) -> Self {
        Self::new(level, level, level)
    }

    /// Clamp floating-point channel accumulators into a pixel.
    ///
    /// Values are clamped to `[0, 255]` and then truncated toward zero, so
    /// `254.9` becomes `254`, not `255`.
    pub fn from_accumulators(r: f64, g: f64, b: f64) -> Self {
        Self {
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        }
    }
}

fn clamp_channel(value: f64) -> u8 {
    if value < 0.0 {
        0
    } else if value > 255.0 {
        255
    } else {
        value as u8
    }
}

/// An RGB image, shape `(height, width)`, row 0 at the top.
pub type Image = Array2<Pixel>;

/// A scalar temperature field, shape `(height, width)`, row 0 at the top.
pub type TemperatureField = Array2<f64>;

/// The concurrency strategy a run was executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Single worker, single thread.
    Serial,
    /// Single worker, rayon-parallel inner loop.
    Multithreaded,
    /// Root reads and scatters, workers exchange halos, root gathers and writes.
    Distributed,
    /// Every worker reads and writes its own rows directly in storage.
    Shared,
}

impl BackendType {
    /// Short label, also used as the output sub-directory name.
    pub fn label(&self) -> &'static str {
        match self {
            BackendType::Serial => "serial",
            BackendType::Multithreaded => "multithreaded",
            BackendType::Distributed => "distributed",
            BackendType::Shared => "shared",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result record for one run of a stencil computation.
///
/// Returned by every backend and aggregated by the caller; nothing is kept in
/// shared state between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub backend: BackendType,
    /// Kernel name for convolution runs, `"heat"` for diffusion runs.
    pub kernel: String,
    /// Input file name, if the run read from storage.
    pub input: Option<String>,
    pub width: usize,
    pub height: usize,
    pub workers: usize,
    pub threads: usize,
    /// Wall-clock time measured by the root worker, from before the first
    /// read/scatter to after the last gather/write.
    pub elapsed_secs: f64,
    /// Stencil applications performed (always 1 for convolution).
    pub iterations: usize,
    pub converged: bool,
}

impl RunReport {
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }
}

/// Return the first `(row, col)` at which two grids differ, if any.
///
/// Grids of different shape differ at `(0, 0)`.
pub fn first_mismatch<T: PartialEq>(a: &Array2<T>, b: &Array2<T>) -> Option<(usize, usize)> {
    if a.dim() != b.dim() {
        return Some((0, 0));
    }
    a.indexed_iter()
        .zip(b.iter())
        .find(|((_, x), y)| x != y)
        .map(|((idx, _), _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulators_truncate_toward_clamp_bound() {
        let p = Pixel::from_accumulators(254.9, -3.0, 300.0);
        assert_eq!(p, Pixel::new(254, 0, 255));
        let q = Pixel::from_accumulators(0.99, 127.5, 255.0);
        assert_eq!(q, Pixel::new(0, 127, 255));
    }

    #[test]
    fn test_first_mismatch_reports_position() {
        let a = Array2::from_elem((3, 4), Pixel::grey(10));
        let mut b = a.clone();
        assert_eq!(first_mismatch(&a, &b), None);
        b[[2, 1]] = Pixel::grey(11);
        assert_eq!(first_mismatch(&a, &b), Some((2, 1)));
    }

    #[test]
    fn test_labels_match_serde_names() {
        for backend in [
            BackendType::Serial,
            BackendType::Multithreaded,
            BackendType::Distributed,
            BackendType::Shared,
        ] {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend.label()));
            assert_eq!(backend.to_string(), backend.label());
        }
        assert!(serde_json::from_str::<BackendType>("\"task_pool\"").is_err());
    }

    #[test]
    fn test_run_report_json_shape() {
        let report = RunReport {
            backend: BackendType::Shared,
            kernel: "edge".into(),
            input: Some("Large.bmp".into()),
            width: 4,
            height: 3,
            workers: 2,
            threads: 1,
            elapsed_secs: 0.5,
            iterations: 1,
            converged: true,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"backend\":\"shared\""));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.pixels(), 12);
    }
}
