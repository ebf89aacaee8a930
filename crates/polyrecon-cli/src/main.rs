//! polyrecon: command-line front end for polygonal surface reconstruction.
//!
//! Reads a plane-segmented point cloud (PLY with a per-vertex
//! `segment_index`) and writes a watertight polygonal model.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=polyrecon=info` - Stage summaries
//! - `RUST_LOG=polyrecon=debug` - Per-plane and per-solve details
//! - `RUST_LOG=polyrecon::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Reconstruct with default weights
//! polyrecon reconstruct building.ply -o building_model.ply
//!
//! # Favour simpler models and keep the candidate faces for inspection
//! polyrecon reconstruct building.ply -o model.obj --complexity 0.6 --candidates candidates.ply
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use polyrecon::SolverKind;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{candidates, config, info, reconstruct, validate};

/// polyrecon - Reconstruct polygonal surfaces from segmented point clouds.
///
/// Intersects the planes of the input segments into candidate faces and
/// selects the subset that best explains the points as a closed surface.
#[derive(Parser)]
#[command(name = "polyrecon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Overrides for the candidate-generation stages.
#[derive(Args, Clone, Default)]
pub struct HypothesisArgs {
    /// Settings file (TOML); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum angle in degrees between planes that may merge
    #[arg(long)]
    angle_threshold: Option<f64>,

    /// Maximum offset between planes that may merge
    #[arg(long)]
    distance_threshold: Option<f64>,

    /// Enlarge the scene box by this fraction of its diagonal
    #[arg(long)]
    padding: Option<f64>,
}

/// Overrides for face selection.
#[derive(Args, Clone, Default)]
pub struct SelectionArgs {
    /// Weight of the fitting term
    #[arg(long)]
    fitting: Option<f64>,

    /// Weight of the coverage term
    #[arg(long)]
    coverage: Option<f64>,

    /// Weight of the model complexity term
    #[arg(long)]
    complexity: Option<f64>,

    /// Solver backend (mip, branch-and-bound, enumeration)
    #[arg(long)]
    solver: Option<SolverKind>,

    /// Solver time budget in seconds
    #[arg(long)]
    time_limit: Option<f64>,

    /// Keep the best selection found when the budget runs out
    #[arg(long)]
    accept_incumbent: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Display point cloud and segment statistics
    Info {
        /// Input point cloud (PLY)
        input: PathBuf,

        /// List every planar segment
        #[arg(long)]
        detailed: bool,
    },

    /// Reconstruct a polygonal surface
    Reconstruct {
        /// Input point cloud (PLY)
        input: PathBuf,

        /// Output model (PLY or OBJ, by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the candidate faces to this file
        #[arg(long)]
        candidates: Option<PathBuf>,

        #[command(flatten)]
        hypothesis: HypothesisArgs,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Generate the candidate faces only
    Candidates {
        /// Input point cloud (PLY)
        input: PathBuf,

        /// Output file (PLY or OBJ, by extension)
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        hypothesis: HypothesisArgs,
    },

    /// Check a polygonal model for boundary and non-manifold edges
    Validate {
        /// Input model (PLY)
        input: PathBuf,
    },

    /// Print or save the default settings file
    Config {
        /// Write the settings to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "polyrecon=info",
            2 => "polyrecon=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input, detailed } => info::run(input, *detailed, &cli),
        Commands::Reconstruct {
            input,
            output,
            candidates,
            hypothesis,
            selection,
        } => reconstruct::run(
            input,
            output,
            candidates.as_deref(),
            hypothesis,
            selection,
            &cli,
        ),
        Commands::Candidates {
            input,
            output,
            hypothesis,
        } => candidates::run(input, output, hypothesis, &cli),
        Commands::Validate { input } => validate::run(input, &cli),
        Commands::Config { output } => config::run(output.as_deref(), &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(recon_err) = e.downcast_ref::<polyrecon::ReconError>() {
                eprintln!("{}: {}", "Error".red().bold(), recon_err);
                eprintln!("  {}: {}", "Code".cyan(), recon_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    recon_err.recovery_suggestion()
                );
                if let Some(location) = recon_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
