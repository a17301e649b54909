//! Tessera CLI: inspect and manage the incremental validation cache.
//!
//! Provides `tessera plan` to show which validators each block would rerun
//! and why, `tessera status` to describe the cache file, and `tessera clear`
//! to delete it.

#![warn(missing_docs)]

mod clear;
mod plan;
mod project;
mod status;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Tessera: incremental revalidation for block-structured projects.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Tessera revalidation engine")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `tessera.toml`, or to the project directory.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which validators each block would run, and why.
    Plan(PlanArgs),
    /// Describe the cache file.
    Status,
    /// Delete the cache file.
    Clear,
}

/// Arguments for the `tessera plan` subcommand.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Treat every validator as due to run.
    #[arg(long)]
    pub force: bool,

    /// Validators to plan for, instead of `[validators].enabled`.
    #[arg(long = "validator", num_args = 1..)]
    pub validators: Vec<String>,

    /// Number of threads used to scan blocks.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Plan output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file or project directory.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Plan(ref args) => plan::run(args, &global),
        Command::Status => status::run(&global),
        Command::Clear => clear::run(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the flags.
fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
