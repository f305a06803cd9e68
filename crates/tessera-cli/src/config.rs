//! TOML configuration deserialisation for benchmark jobs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use tessera_core::convergence::{DEFAULT_EPSILON, DEFAULT_MAX_ITERATIONS};
use tessera_core::plate::{DEFAULT_COOL, DEFAULT_HOT};
use tessera_core::{
    kernel_by_index, kernel_by_name, BackendType, CoreError, Kernel, KERNEL_CATALOG,
};

/// Top-level job configuration. At least one of `[convolution]` and
/// `[heat]` must be present.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub convolution: Option<ConvolutionConfig>,
    pub heat: Option<HeatConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Convolution benchmark: every input × kernel × mode.
#[derive(Debug, Deserialize)]
pub struct ConvolutionConfig {
    /// Input bitmaps (24-bit, uncompressed).
    pub inputs: Vec<PathBuf>,
    /// Kernel names or catalog indices (default: every catalog kernel).
    #[serde(default = "default_kernels")]
    pub kernels: Vec<String>,
    /// Execution modes (default: all four).
    #[serde(default = "default_modes")]
    pub modes: Vec<BackendType>,
    /// Worker count for the distributed and shared modes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rayon pool size for the multithreaded mode.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_kernels() -> Vec<String> {
    KERNEL_CATALOG.iter().map(|spec| spec.name.to_string()).collect()
}

fn default_modes() -> Vec<BackendType> {
    vec![
        BackendType::Serial,
        BackendType::Multithreaded,
        BackendType::Distributed,
        BackendType::Shared,
    ]
}

fn default_workers() -> usize {
    4
}
fn default_threads() -> usize {
    4
}

/// Heat-diffusion run on a generated plate.
#[derive(Debug, Deserialize)]
pub struct HeatConfig {
    #[serde(default = "default_plate_size")]
    pub width: usize,
    #[serde(default = "default_plate_size")]
    pub height: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_hot")]
    pub hot: f64,
    #[serde(default = "default_cool")]
    pub cool: f64,
}

fn default_plate_size() -> usize {
    128
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}
fn default_hot() -> f64 {
    DEFAULT_HOT
}
fn default_cool() -> f64 {
    DEFAULT_COOL
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save run records as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_csv: bool,
    /// Whether to also save run records as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
    /// Whether to compare every non-serial image with the serial one (default: true).
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_csv: true,
            save_json: false,
            verify: true,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Reject jobs that would fail only after work has started.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.convolution.is_none() && self.heat.is_none() {
            bail!("job defines neither [convolution] nor [heat]");
        }
        if let Some(conv) = &self.convolution {
            if conv.inputs.is_empty() {
                bail!("[convolution] lists no inputs");
            }
            if conv.kernels.is_empty() || conv.modes.is_empty() {
                bail!("[convolution] needs at least one kernel and one mode");
            }
            for selector in &conv.kernels {
                resolve_kernel(selector)
                    .with_context(|| format!("[convolution] kernel '{selector}'"))?;
            }
            if conv.workers == 0 || conv.threads == 0 {
                bail!("[convolution] workers and threads must be at least 1");
            }
            if self.output.verify && !conv.modes.contains(&BackendType::Serial) {
                bail!("output.verify requires the serial mode as the reference");
            }
        }
        if let Some(heat) = &self.heat {
            if heat.width == 0 || heat.height == 0 {
                bail!("[heat] plate must be at least 1x1");
            }
            if heat.workers == 0 || heat.height % heat.workers != 0 {
                bail!(
                    "[heat] height {} must be a non-zero multiple of workers {}",
                    heat.height,
                    heat.workers
                );
            }
            if !heat.epsilon.is_finite() || heat.epsilon <= 0.0 {
                bail!("[heat] epsilon must be positive");
            }
        }
        Ok(())
    }
}

/// Look up a catalog kernel by name or by its index in `tessera kernels`.
pub fn resolve_kernel(selector: &str) -> Result<Kernel, CoreError> {
    match selector.parse::<usize>() {
        Ok(index) => kernel_by_index(index),
        Err(_) => kernel_by_name(selector),
    }
}

/// Load, parse and validate a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: JobConfig =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let job: JobConfig = toml::from_str(
            r#"
            [convolution]
            inputs = ["a.bmp"]
            "#,
        )
        .unwrap();
        let conv = job.convolution.as_ref().unwrap();
        assert_eq!(conv.kernels.len(), 7);
        assert_eq!(conv.modes.len(), 4);
        assert_eq!((conv.workers, conv.threads), (4, 4));
        assert!(job.output.save_csv && job.output.verify && !job.output.save_json);
        job.validate().unwrap();
    }

    #[test]
    fn test_modes_parse_by_label() {
        let job: JobConfig = toml::from_str(
            r#"
            [convolution]
            inputs = ["a.bmp"]
            modes = ["serial", "shared"]

            [heat]
            width = 8
            height = 12
            workers = 3
            "#,
        )
        .unwrap();
        assert_eq!(
            job.convolution.unwrap().modes,
            vec![BackendType::Serial, BackendType::Shared]
        );
        let heat = job.heat.unwrap();
        assert_eq!(heat.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(heat.hot, DEFAULT_HOT);
    }

    #[test]
    fn test_validation_rejects_bad_jobs() {
        let unknown: JobConfig = toml::from_str(
            "[convolution]\ninputs = [\"a.bmp\"]\nkernels = [\"emboss\"]\n",
        )
        .unwrap();
        assert!(unknown.validate().is_err());

        let uneven: JobConfig =
            toml::from_str("[heat]\nheight = 10\nworkers = 3\n").unwrap();
        assert!(uneven.validate().is_err());

        let empty: JobConfig = toml::from_str("").unwrap();
        assert!(empty.validate().is_err());

        let no_reference: JobConfig = toml::from_str(
            "[convolution]\ninputs = [\"a.bmp\"]\nmodes = [\"shared\"]\n",
        )
        .unwrap();
        assert!(no_reference.validate().is_err());
    }

    #[test]
    fn test_kernels_resolve_by_name_or_index() {
        assert_eq!(resolve_kernel("gaussblur5").unwrap().size(), 5);
        assert_eq!(resolve_kernel("0").unwrap().name(), "ridge");
        assert_eq!(resolve_kernel("6").unwrap().name(), "unsharp5");
        assert!(resolve_kernel("7").is_err());
        assert!(resolve_kernel("emboss").is_err());

        let job: JobConfig =
            toml::from_str("[convolution]\ninputs = [\"a.bmp\"]\nkernels = [\"edge\", \"3\"]\n")
                .unwrap();
        job.validate().unwrap();
        let out_of_range: JobConfig =
            toml::from_str("[convolution]\ninputs = [\"a.bmp\"]\nkernels = [\"9\"]\n").unwrap();
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_fails_to_parse() {
        let parsed: Result<JobConfig, _> =
            toml::from_str("[convolution]\ninputs = [\"a.bmp\"]\nmodes = [\"task_pool\"]\n");
        assert!(parsed.is_err());
    }
}
