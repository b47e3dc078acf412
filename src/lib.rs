pub mod cli;
pub mod config;
pub mod connectors;
pub mod discovery;
pub mod extract;
pub mod process;
pub mod remote;
pub mod schedule;
pub mod sync;

use std::process::ExitCode;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::Config;

/// Library entrypoint; runs the parsed command against a loaded config.
pub async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    cli.run(config).await
}
