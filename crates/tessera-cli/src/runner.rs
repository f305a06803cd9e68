//! Benchmark runner: ties together bitmap inputs, kernels and backends.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::Serialize;

use tessera_compute::{
    ConvolutionBackend, DistributedBackend, HeatOutcome, HeatSolver, MultithreadedBackend,
    SerialBackend, SharedFileBackend,
};
use tessera_core::{
    first_mismatch, BackendType, ConvergenceCriteria, HeatPlate, RunReport, TemperatureField,
};
use tessera_io::read_image;

use crate::config::{resolve_kernel, ConvolutionConfig, HeatConfig};

/// One convolution run plus the figures derived across runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub report: RunReport,
    pub kernel_size: usize,
    /// Serial time divided by this run's time, for the same input and kernel.
    pub speedup: Option<f64>,
}

/// An output image that differs from the serial reference.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub path: PathBuf,
    pub backend: BackendType,
    /// First differing `(row, col)`.
    pub at: (usize, usize),
}

/// Everything a convolution benchmark produces.
pub struct BenchmarkOutput {
    pub records: Vec<RunRecord>,
    pub mismatches: Vec<Mismatch>,
    /// Number of images compared against the serial reference.
    pub verified: usize,
}

/// Construct the backend for one execution mode.
pub fn build_backend(
    mode: BackendType,
    conv: &ConvolutionConfig,
) -> Result<Box<dyn ConvolutionBackend>> {
    Ok(match mode {
        BackendType::Serial => Box::new(SerialBackend::new()),
        BackendType::Multithreaded => Box::new(
            MultithreadedBackend::new(conv.threads)
                .with_context(|| format!("creating a {}-thread pool", conv.threads))?,
        ),
        BackendType::Distributed => Box::new(DistributedBackend::new(conv.workers)),
        BackendType::Shared => Box::new(SharedFileBackend::new(conv.workers)),
    })
}

/// `<out_dir>/<kernel>/<mode>/<input file name>`
pub fn output_path(out_dir: &Path, kernel: &str, mode: BackendType, input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.bmp"));
    out_dir.join(kernel).join(mode.label()).join(name)
}

/// Run every input × kernel × mode, writing each output image under `out_dir`.
///
/// The serial mode always runs first for each (input, kernel) so that it can
/// serve as the timing and verification reference.
pub fn run_convolution(
    conv: &ConvolutionConfig,
    out_dir: &Path,
    verify: bool,
) -> Result<BenchmarkOutput> {
    let mut modes = conv.modes.clone();
    modes.sort_by_key(|mode| *mode != BackendType::Serial);
    modes.dedup();

    let backends = modes
        .iter()
        .map(|&mode| build_backend(mode, conv).map(|backend| (mode, backend)))
        .collect::<Result<Vec<_>>>()?;
    for (_, backend) in &backends {
        let info = backend.info();
        debug!("{}: {} workers, {} threads", info.name, info.workers, info.threads);
    }

    let mut records = Vec::new();
    let mut mismatches = Vec::new();
    let mut verified = 0;

    for input in &conv.inputs {
        println!("Processing file: {}", input.display());
        for selector in &conv.kernels {
            let kernel = resolve_kernel(selector)?;
            println!("  Applying kernel: {} ({1}x{1})", kernel.name(), kernel.size());

            let mut outputs = Vec::with_capacity(backends.len());
            for (mode, backend) in &backends {
                let path = output_path(out_dir, kernel.name(), *mode, input);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let report = backend
                    .convolve_file(input, &path, &kernel)
                    .with_context(|| {
                        let input = input.display();
                        format!("{input} with kernel '{}' in {mode} mode", kernel.name())
                    })?;
                println!(
                    "    {:<14} {:.6} s -> {}",
                    mode.label(),
                    report.elapsed_secs,
                    path.display()
                );
                records.push(RunRecord {
                    report,
                    kernel_size: kernel.size(),
                    speedup: None,
                });
                outputs.push((*mode, path));
            }

            if verify {
                let (found, compared) = verify_outputs(&outputs)?;
                verified += compared;
                mismatches.extend(found);
            }
        }
    }

    fill_speedups(&mut records);
    Ok(BenchmarkOutput {
        records,
        mismatches,
        verified,
    })
}

/// Compare every non-serial output with the serial output of the same run.
fn verify_outputs(outputs: &[(BackendType, PathBuf)]) -> Result<(Vec<Mismatch>, usize)> {
    let reference_path = outputs
        .iter()
        .find(|(mode, _)| *mode == BackendType::Serial)
        .map(|(_, path)| path);
    let Some(reference_path) = reference_path else {
        return Ok((Vec::new(), 0));
    };
    let reference = read_image(reference_path)
        .with_context(|| format!("reading reference {}", reference_path.display()))?;

    let mut mismatches = Vec::new();
    let mut compared = 0;
    for (mode, path) in outputs.iter().filter(|(mode, _)| *mode != BackendType::Serial) {
        let image = read_image(path).with_context(|| format!("reading {}", path.display()))?;
        compared += 1;
        if let Some(at) = first_mismatch(&reference, &image) {
            println!("    MISMATCH {} differs from serial at {at:?}", path.display());
            mismatches.push(Mismatch {
                path: path.clone(),
                backend: *mode,
                at,
            });
        }
    }
    Ok((mismatches, compared))
}

/// Set each record's speedup relative to the serial record with the same
/// input and kernel. Records without a serial counterpart keep `None`.
pub fn fill_speedups(records: &mut [RunRecord]) {
    let serial: Vec<(Option<String>, String, f64)> = records
        .iter()
        .filter(|r| r.report.backend == BackendType::Serial)
        .map(|r| (r.report.input.clone(), r.report.kernel.clone(), r.report.elapsed_secs))
        .collect();

    for record in records.iter_mut() {
        record.speedup = serial
            .iter()
            .find(|(input, kernel, _)| {
                *input == record.report.input && *kernel == record.report.kernel
            })
            .and_then(|&(_, _, base)| {
                (record.report.elapsed_secs > 0.0).then(|| base / record.report.elapsed_secs)
            });
    }
}

/// Solve the heat plate described by `heat`.
pub fn run_heat(heat: &HeatConfig) -> Result<HeatOutcome> {
    let plate = HeatPlate::new(heat.width, heat.height)?.with_temperatures(heat.hot, heat.cool);
    println!(
        "Heat plate {}x{}: hot {} on columns {:?} of the top row, cool {}",
        heat.width,
        heat.height,
        heat.hot,
        plate.hot_columns(),
        heat.cool
    );
    let solver = HeatSolver::new(heat.workers).with_criteria(ConvergenceCriteria {
        epsilon: heat.epsilon,
        max_iterations: heat.max_iterations,
    });
    let outcome = solver
        .solve(&plate.initial_field())
        .with_context(|| format!("heat diffusion with {} workers", heat.workers))?;

    if outcome.status.converged() {
        println!(
            "Converged after {} iterations in {:.6} s",
            outcome.status.iterations(),
            outcome.report.elapsed_secs
        );
    } else {
        println!(
            "Iteration cap reached after {} iterations ({:.6} s, last delta {:e})",
            outcome.status.iterations(),
            outcome.report.elapsed_secs,
            outcome.delta_history.last().copied().unwrap_or(f64::NAN)
        );
    }
    Ok(outcome)
}

/// Write convolution run records to a CSV file with a metadata header.
pub fn write_records_csv(records: &[RunRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file =
        std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;

    writeln!(file, "# Tessera convolution benchmark")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "#")?;
    writeln!(
        file,
        "input,pixels,kernel,kernel_size,backend,workers,threads,elapsed_secs,speedup"
    )?;

    for record in records {
        let r = &record.report;
        let speedup = record
            .speedup
            .map(|s| format!("{s:.4}"))
            .unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{},{},{},{},{:.6},{}",
            r.input.as_deref().unwrap_or(""),
            r.pixels(),
            r.kernel,
            record.kernel_size,
            r.backend,
            r.workers,
            r.threads,
            r.elapsed_secs,
            speedup
        )?;
    }

    println!("Run records written to: {}", path.display());
    Ok(())
}

/// Write convolution run records to a JSON file.
pub fn write_records_json(records: &[RunRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(records).context("serialising run records")?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;

    println!("Run records (JSON) written to: {}", path.display());
    Ok(())
}

/// Write a heat run summary (report, status and delta history) to JSON.
pub fn write_heat_json(outcome: &HeatOutcome, path: &Path) -> Result<()> {
    #[derive(Serialize)]
    struct HeatSummary<'a> {
        report: &'a RunReport,
        status: &'a tessera_core::ConvergenceStatus,
        delta_history: &'a [f64],
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let summary = HeatSummary {
        report: &outcome.report,
        status: &outcome.status,
        delta_history: &outcome.delta_history,
    };
    let json = serde_json::to_string_pretty(&summary).context("serialising heat summary")?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;

    println!("Heat summary (JSON) written to: {}", path.display());
    Ok(())
}

/// Write a temperature field to CSV, one grid row per line.
pub fn write_field_csv(field: &TemperatureField, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file =
        std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "# Tessera heat diffusion: steady-state temperature field")?;
    writeln!(file, "# Grid: {}x{}", field.ncols(), field.nrows())?;
    writeln!(file, "#")?;

    for row in field.rows() {
        let line: Vec<String> = row.iter().map(|t| format!("{t:.6}")).collect();
        writeln!(file, "{}", line.join(","))?;
    }

    println!("Temperature field written to: {}", path.display());
    Ok(())
}

/// Fail with a summary if verification found any differing image.
pub fn check_mismatches(output: &BenchmarkOutput) -> Result<()> {
    if output.mismatches.is_empty() {
        if output.verified > 0 {
            println!("Verification: {} images match the serial output", output.verified);
        }
        return Ok(());
    }
    for mismatch in &output.mismatches {
        eprintln!(
            "  {} ({}) first differs at {:?}",
            mismatch.path.display(),
            mismatch.backend,
            mismatch.at
        );
    }
    bail!(
        "{} of {} images differ from the serial output",
        output.mismatches.len(),
        output.verified
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tessera_core::Pixel;
    use tessera_io::write_image;

    fn record(backend: BackendType, kernel: &str, elapsed_secs: f64) -> RunRecord {
        RunRecord {
            report: RunReport {
                backend,
                kernel: kernel.into(),
                input: Some("a.bmp".into()),
                width: 4,
                height: 4,
                workers: 1,
                threads: 1,
                elapsed_secs,
                iterations: 1,
                converged: true,
            },
            kernel_size: 3,
            speedup: None,
        }
    }

    #[test]
    fn test_speedup_is_relative_to_matching_serial_run() {
        let mut records = vec![
            record(BackendType::Serial, "edge", 2.0),
            record(BackendType::Distributed, "edge", 0.5),
            record(BackendType::Shared, "ridge", 1.0),
        ];
        fill_speedups(&mut records);
        assert_eq!(records[0].speedup, Some(1.0));
        assert_eq!(records[1].speedup, Some(4.0));
        assert_eq!(records[2].speedup, None);
    }

    #[test]
    fn test_output_path_layout() {
        let input = Path::new("in/XL.bmp");
        let path = output_path(Path::new("out"), "edge", BackendType::Shared, input);
        assert_eq!(path, Path::new("out/edge/shared/XL.bmp"));
    }

    #[test]
    fn test_benchmark_writes_verified_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("grid.bmp");
        let image =
            Array2::from_shape_fn((9, 5), |(y, x)| Pixel::new((y * 20) as u8, (x * 50) as u8, 7));
        write_image(&input, &image).unwrap();

        let conv = ConvolutionConfig {
            inputs: vec![input],
            // By name and by catalog index (5 is gaussblur5).
            kernels: vec!["sharpen".into(), "5".into()],
            modes: vec![BackendType::Shared, BackendType::Distributed, BackendType::Serial],
            workers: 3,
            threads: 2,
        };
        let out_dir = dir.path().join("out");
        let output = run_convolution(&conv, &out_dir, true).unwrap();

        assert_eq!(output.records.len(), 6);
        assert_eq!(output.records[0].report.backend, BackendType::Serial);
        assert_eq!(output.verified, 4);
        assert!(output.mismatches.is_empty());
        check_mismatches(&output).unwrap();
        assert!(out_dir.join("gaussblur5/distributed/grid.bmp").exists());

        let csv = out_dir.join("convolution.csv");
        write_records_csv(&output.records, &csv).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let header = "input,pixels,kernel,kernel_size,backend,workers,threads,elapsed_secs,speedup";
        assert!(text.contains(header));
        assert!(text.contains("grid.bmp,45,gaussblur5,5,shared,3,1,"));
    }

    #[test]
    fn test_run_heat_small_plate() {
        let heat = HeatConfig {
            width: 6,
            height: 6,
            workers: 2,
            max_iterations: 500,
            epsilon: 1e-6,
            hot: 100.0,
            cool: 20.0,
        };
        let outcome = run_heat(&heat).unwrap();
        assert!(outcome.status.converged());
        assert_eq!(outcome.report.workers, 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.csv");
        write_field_csv(&outcome.field, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 6);
    }
}
