//! ## timewarp-cli
//! **Command-line entry point**
//!
//! `timewarp demo` drives a retry-with-backoff scenario on a virtual clock
//! and prints the timeline; `timewarp check-config` validates configuration.

use clap::Parser;

mod commands;
mod error;

use commands::Cli;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    commands::run_command(cli)?;
    Ok(())
}
