//! qtlscan: mixed-model association scans from the command line.
//!
//! CLI entry point using clap for argument parsing.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "qtlscan",
    version,
    about = "Association scans with linear and generalised linear mixed models",
    long_about = "Fits a null mixed model and tests candidate markers, singly or in groups,\n\
                   with likelihood-ratio tests. Supports single- and multi-trait normal\n\
                   models and Bernoulli, probit, binomial and Poisson likelihoods."
)]
struct Cli {
    /// Number of threads to use
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the null model and scan candidates
    Scan(commands::scan::ScanArgs),

    /// Compute a kinship matrix from genotypes
    Kinship(commands::kinship::KinshipArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("qtlscan v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Using {} threads", cli.threads);

    match cli.command {
        Commands::Scan(args) => commands::scan::run(args, cli.verbose > 0),
        Commands::Kinship(args) => commands::kinship::run(args),
    }
}
