//! Tessera command-line interface.
//!
//! Run convolution benchmarks and heat-diffusion solves:
//! ```sh
//! tessera run job.toml
//! tessera validate job.toml
//! tessera heat --width 256 --height 256 --workers 4
//! tessera kernels
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tessera_core::convergence::{DEFAULT_EPSILON, DEFAULT_MAX_ITERATIONS};
use tessera_core::plate::{DEFAULT_COOL, DEFAULT_HOT};
use tessera_core::catalog;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera: row-partitioned stencil computations over message-passing workers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without running anything.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Solve the heat-plate problem directly.
    Heat {
        #[arg(long, default_value_t = 128)]
        width: usize,
        #[arg(long, default_value_t = 128)]
        height: usize,
        /// Number of workers; must divide the height.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,
        #[arg(long, default_value_t = DEFAULT_EPSILON)]
        epsilon: f64,
        /// Write the final temperature field as CSV.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the convolution kernel catalog with the indices accepted in job files.
    Kernels,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("Tessera");
            println!("=======");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if let Some(conv) = &job.convolution {
                let result = runner::run_convolution(conv, &out_dir, job.output.verify)?;

                if job.output.save_csv {
                    runner::write_records_csv(&result.records, &out_dir.join("convolution.csv"))?;
                }
                if job.output.save_json {
                    runner::write_records_json(&result.records, &out_dir.join("convolution.json"))?;
                }
                runner::check_mismatches(&result)?;
            }

            if let Some(heat) = &job.heat {
                let outcome = runner::run_heat(heat)?;
                if job.output.save_csv {
                    runner::write_field_csv(&outcome.field, &out_dir.join("heat_field.csv"))?;
                }
                if job.output.save_json {
                    runner::write_heat_json(&outcome, &out_dir.join("heat.json"))?;
                }
            }

            println!("Job complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Heat {
            width,
            height,
            workers,
            max_iterations,
            epsilon,
            output,
        } => {
            let heat = config::HeatConfig {
                width,
                height,
                workers,
                max_iterations,
                epsilon,
                hot: DEFAULT_HOT,
                cool: DEFAULT_COOL,
            };
            let outcome = runner::run_heat(&heat)?;
            if let Some(path) = output {
                runner::write_field_csv(&outcome.field, &path)?;
            }
            Ok(())
        }
        Commands::Kernels => {
            println!("Available kernels:");
            println!();
            for (index, kernel) in catalog().iter().enumerate() {
                println!("  {index}  {:<11} {1}x{1}", kernel.name(), kernel.size());
            }
            Ok(())
        }
    }
}
