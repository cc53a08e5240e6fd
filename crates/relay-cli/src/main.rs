//! `relay` command-line entry point.
//!
//! Subcommands:
//! - `turns`: segment interactive CLI output (stdin or a PTY child) into
//!   JSON turn reports on stdout.
//! - `call`: one request through a provider bridge; prints the normalized
//!   response.
//! - `list`: follow a provider's pagination and print every item.
//!
//! Diagnostics go to stderr through `tracing`. Exit codes: 0 success,
//! 1 runtime failure, 2 invalid configuration.

mod bridge_cmd;
mod duration;
mod turns_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_core::RelayError;
use relay_core::turns::TurnError;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Relay - provider bridges and a PTY turn parser
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (info-level logs on stderr)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Segment interactive CLI output into one JSON report per turn
    Turns(Box<turns_cmd::TurnsArgs>),

    /// Issue one request through a provider bridge
    Call(bridge_cmd::CallArgs),

    /// Follow pagination and print every item
    List(bridge_cmd::ListArgs),
}

/// Invalid input detected before any I/O. Exits with code 2.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Maps an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return 2;
        }
        if let Some(turn_err) = cause.downcast_ref::<TurnError>()
            && turn_err.is_config()
        {
            return 2;
        }
        if let Some(RelayError::Config(_)) = cause.downcast_ref::<RelayError>() {
            return 2;
        }
    }
    1
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Turns(args) => turns_cmd::execute(*args).await,
        Commands::Call(args) => bridge_cmd::call(args).await,
        Commands::List(args) => bridge_cmd::list(args).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}
