use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trae_sync::cli::Cli;
use trae_sync::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());
    let log_file = config.as_ref().ok().and_then(|c| c.log_file.clone());
    let _guard = init_logging(cli.verbose, log_file.as_deref());

    let result = match config {
        Ok(config) => trae_sync::run(cli, config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(code) => code,
        Err(error) => {
            tracing::error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Compact console output, plus a plain-text copy in `log_file` when set.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let console = fmt::layer().compact().with_target(false);

    let mut guard = None;
    let file_layer = log_file.and_then(|path| {
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name()?;
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("failed to create log directory {}: {e}", dir.display());
            return None;
        }
        let (writer, g) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        guard = Some(g);
        Some(fmt::layer().with_ansi(false).with_target(false).with_writer(writer))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    guard
}
