//! zax - incremental check runner.
//!
//! Runs the workspace's test runner and linter, ingests their output into a
//! per-workspace store, and reports only the delta against the previous
//! run: precommit gating that never blocks on pre-existing noise.

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod output;

/// zax - incremental check runner
#[derive(Parser, Debug)]
#[command(name = "zax")]
#[command(version, about, long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the incremental check and report new vs. fixed problems
    Check {
        /// Force a full test run, bypassing affected-test selection
        #[arg(long)]
        deopt: bool,

        /// Restrict the check to one package (path relative to the
        /// workspace root)
        #[arg(short = 'p', long = "package")]
        package: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Check { deopt, package } => commands::check::run(deopt, package.as_deref()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        },
    }
}
