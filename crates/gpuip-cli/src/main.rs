//! gpuip - run write-once image pipelines on OpenCL, CUDA or GLSL
//!
//! Pipelines are described in YAML files; see `pipeline.rs` for the format.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gpuip::Environment;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod pipeline;

#[derive(Parser)]
#[command(name = "gpuip")]
#[command(author, version, about = "Write-once GPU image processing pipelines")]
#[command(long_about = "
Runs image processing pipelines described in YAML files on OpenCL, CUDA or
GLSL fragment shaders. Kernel sources are written once against the
boilerplate the tool generates for each backend.

Examples:
  gpuip probe                             # Which backends work here
  gpuip boilerplate blur.yaml             # Print scaffolds for every kernel
  gpuip boilerplate blur.yaml -k blur_h --env cuda
  gpuip boilerplate blur.yaml -o kernels/ # Write <kernel>.cl / .cu / .glsl
  gpuip run blur.yaml                     # Allocate, upload, build, run, download
  gpuip run blur.yaml --env glsl --device 1
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute environments and whether they can be created
    #[command(visible_alias = "p")]
    Probe,

    /// Print generated kernel boilerplate for a pipeline
    #[command(visible_alias = "bp")]
    Boilerplate(BoilerplateArgs),

    /// Execute a pipeline
    #[command(visible_alias = "r")]
    Run(RunArgs),
}

#[derive(Args)]
pub struct BoilerplateArgs {
    /// Pipeline description (YAML)
    pub pipeline: PathBuf,

    /// Only this kernel
    #[arg(short, long)]
    pub kernel: Option<String>,

    /// Override the pipeline's environment (opencl, cuda, glsl)
    #[arg(short, long)]
    pub env: Option<Environment>,

    /// Write one file per kernel into this directory instead of stdout
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline description (YAML)
    pub pipeline: PathBuf,

    /// Override the pipeline's environment (opencl, cuda, glsl)
    #[arg(short, long)]
    pub env: Option<Environment>,

    /// Device ordinal (default: backend heuristic)
    #[arg(short, long)]
    pub device: Option<usize>,

    /// CUDA block edge
    #[arg(long, default_value_t = gpuip::processor::DEFAULT_CUDA_BLOCK)]
    pub cuda_block: u32,
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Probe => commands::probe::run(cli.verbose),
        Commands::Boilerplate(args) => commands::boilerplate::run(args, cli.verbose),
        Commands::Run(args) => commands::run::run(args, cli.verbose),
    }
}
