//! Command-line surface of `trae-sync`.
//!
//! One binary covers both machines: `discover`, `monitor` and `dispatch` run
//! on the client next to Trae, `sync` runs on the server that holds the
//! repositories.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::discovery::{Discovery, DiscoveryReport};
use crate::remote::{
    ConnectionStatus, DispatchOutcome, Dispatcher, Monitor, SshTransport, SystemProcesses,
    Transport, WorklistPayload,
};
use crate::schedule::{CancellationToken, Clock, SystemClock, run_every};
use crate::sync::{PARTIAL_FAILURE_EXIT, ReportSource, SyncEngine, SyncReport};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "trae-sync",
    about = "Discover repositories referenced by Trae and keep them synced on a remote host",
    version,
    subcommand_help_heading = "Commands"
)]
pub struct Cli {
    /// Config file (defaults to <config dir>/trae-sync/config.toml)
    #[arg(long, global = true, env = "TRAE_SYNC_CONFIG", value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Scan Trae's local storage and write the repository worklist
    Discover(DiscoverArgs),

    /// Check whether Trae, the MCP agent and the remote host are ready
    Monitor(MonitorArgs),

    /// Send the worklist to the remote host when ready
    Dispatch(DispatchArgs),

    /// Clone or update repositories from a worklist (server side)
    Sync(SyncArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DiscoverArgs {
    /// Trae application-support directory
    #[arg(long, value_name = "path")]
    pub trae_path: Option<PathBuf>,

    /// Where to write the discovered worklist
    #[arg(short, long, value_name = "file")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct MonitorArgs {
    /// Keep polling until interrupted
    #[arg(short, long)]
    pub continuous: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DispatchArgs {
    /// Run a single tick and exit
    #[arg(long)]
    pub once: bool,

    /// Dispatch now, ignoring readiness and cooldown
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Worklist JSON produced by `dispatch`
    #[arg(long, value_name = "file", conflicts_with_all = ["cleanup", "status"])]
    pub repo_list: Option<PathBuf>,

    /// Only delete backups past the retention window
    #[arg(long, conflicts_with = "status")]
    pub cleanup: bool,

    /// Only list checked-out repositories
    #[arg(long)]
    pub status: bool,
}

impl Cli {
    pub async fn run(self, config: Config) -> Result<ExitCode> {
        match self.command {
            Command::Discover(args) => run_discover(config, args, self.verbose),
            Command::Monitor(args) => run_monitor(config, args).await,
            Command::Dispatch(args) => run_dispatch(config, args).await,
            Command::Sync(args) => run_sync(config, args).await,
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn dispatch_exit_code(outcome: &DispatchOutcome) -> ExitCode {
    match outcome {
        DispatchOutcome::Dispatched { .. } => ExitCode::SUCCESS,
        DispatchOutcome::PartiallySynced { .. } => ExitCode::from(PARTIAL_FAILURE_EXIT),
        _ => ExitCode::FAILURE,
    }
}

/// A token tripped by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; stopping after the current tick");
            trip.cancel();
        }
    });
    token
}

fn run_discover(mut config: Config, args: DiscoverArgs, verbose: bool) -> Result<ExitCode> {
    if let Some(path) = args.trae_path {
        config.storage_root = path;
    }
    config.require_storage_root()?;

    let discovery = Discovery::from_config(&config);
    let result = discovery.run();

    if verbose {
        for source in &result.sources {
            println!(
                "  {:<18} {:>4} candidates, {} skipped",
                source.kind.to_string().cyan(),
                source.candidates,
                source.skipped
            );
        }
    }

    let output = args.output.unwrap_or_else(|| config.discovery.output_file.clone());
    let report = DiscoveryReport::new(discovery.owner(), result.records, Utc::now());
    report
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "{} {} repositories",
        "Discovered".bold(),
        report.total_repositories
    );
    for record in &report.repositories {
        println!("    {} {}", "•".dimmed(), record.name);
    }
    println!("Saved to {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn remote_transport(config: &Config) -> Result<Box<dyn Transport>> {
    Ok(Box::new(SshTransport::from_config(&config.remote)?))
}

fn save_status(status: &ConnectionStatus, config: &Config) {
    let path = &config.monitor.status_file;
    if let Err(e) = status.save(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to save status");
    }
}

async fn run_monitor(config: Config, args: MonitorArgs) -> Result<ExitCode> {
    config.require_storage_root()?;
    let transport = match remote_transport(&config) {
        Ok(transport) => Some(transport),
        Err(e) => {
            tracing::warn!(error = %e, "remote checks disabled");
            None
        }
    };
    let monitor = Monitor::new(
        &config,
        Box::new(SystemProcesses),
        transport,
        Arc::new(SystemClock),
    );

    if !args.continuous {
        let (status, config) = tokio::task::spawn_blocking(move || (monitor.poll(), config)).await?;
        save_status(&status, &config);
        println!("{}", status.summary());
        return Ok(exit_code(status.ready()));
    }

    let cancel = cancel_on_ctrl_c();
    let interval = Duration::from_secs(config.monitor.interval);
    tokio::task::spawn_blocking(move || {
        run_every(&SystemClock, interval, &cancel, || {
            let status = monitor.poll();
            save_status(&status, &config);
            println!("{}\n", status.summary());
        })
    })
    .await?;
    Ok(ExitCode::SUCCESS)
}

fn describe(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::NotReady => "connection not ready".yellow().to_string(),
        DispatchOutcome::CoolingDown { remaining } => {
            format!("cooling down ({}s left)", remaining.as_secs())
        }
        DispatchOutcome::EmptyWorklist => "no repositories to sync".yellow().to_string(),
        DispatchOutcome::Dispatched { repositories } => {
            format!("{} {repositories} repositories", "synced".green())
        }
        DispatchOutcome::PartiallySynced { repositories } => format!(
            "{} {repositories} repositories (some failed on the server)",
            "synced".yellow()
        ),
        DispatchOutcome::Failed(reason) => format!("{} {reason}", "failed:".red()),
    }
}

async fn run_dispatch(config: Config, args: DispatchArgs) -> Result<ExitCode> {
    config.require_storage_root()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut dispatcher = Dispatcher::new(
        &config,
        Discovery::from_config(&config),
        remote_transport(&config)?,
        clock.clone(),
    );

    if args.force {
        let outcome = tokio::task::spawn_blocking(move || dispatcher.dispatch()).await?;
        println!("{}", describe(&outcome));
        return Ok(dispatch_exit_code(&outcome));
    }

    let monitor = Monitor::new(
        &config,
        Box::new(SystemProcesses),
        Some(remote_transport(&config)?),
        clock.clone(),
    );
    let interval = Duration::from_secs(config.dispatch.check_interval);
    let mut tick = move || {
        let status = monitor.poll();
        save_status(&status, &config);
        let outcome = dispatcher.maybe_sync(&status);
        tracing::info!(outcome = %describe(&outcome), "dispatch tick");
        outcome
    };

    if args.once {
        let outcome = tokio::task::spawn_blocking(tick).await?;
        println!("{}", describe(&outcome));
        return Ok(dispatch_exit_code(&outcome));
    }

    let cancel = cancel_on_ctrl_c();
    tokio::task::spawn_blocking(move || {
        run_every(clock.as_ref(), interval, &cancel, || {
            tick();
        })
    })
    .await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_sync(config: Config, args: SyncArgs) -> Result<ExitCode> {
    let engine = SyncEngine::from_config(&config.sync);

    if args.status {
        let names = engine
            .status()
            .with_context(|| format!("failed to list {}", engine.git_dir().display()))?;
        println!("{} {} repositories", "Found".bold(), names.len());
        for name in names {
            println!("    {} {name}", "•".dimmed());
        }
        return Ok(ExitCode::SUCCESS);
    }

    if args.cleanup {
        let report = engine.cleanup();
        println!("Removed {} old backups", report.removed.len());
        return Ok(exit_code(report.failed.is_empty()));
    }

    let Some(repo_list) = args.repo_list else {
        bail!("no worklist given; pass --repo-list <file>");
    };
    let payload = WorklistPayload::load(&repo_list)
        .with_context(|| format!("failed to read worklist {}", repo_list.display()))?;
    if payload.repositories.is_empty() {
        bail!("worklist {} is empty", repo_list.display());
    }

    let bar = ProgressBar::new(payload.repositories.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{elapsed_precise:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let engine = engine.with_progress(bar);

    let source = ReportSource {
        sync_time: Some(payload.sync_time),
        source: payload.source.clone(),
    };
    let (run, engine) =
        tokio::task::spawn_blocking(move || (engine.sync_all(&payload.repositories), engine)).await?;

    let report = SyncReport {
        sync_time: Utc::now(),
        platform: config.platform.clone(),
        source,
        results: run,
        git_directory: engine.git_dir().to_path_buf(),
        backup_directory: engine.backup_dir().to_path_buf(),
    };
    let path = report
        .write(&config.sync.report_dir)
        .with_context(|| format!("failed to write report to {}", config.sync.report_dir.display()))?;

    let run = &report.results;
    println!("{}", "Sync results".bold());
    println!("    total:   {}", run.total);
    println!("    success: {}", run.success.to_string().green());
    println!("    failed:  {}", run.failed.to_string().red());
    for failure in run.failures() {
        println!(
            "    {} {}: {}",
            "✗".red(),
            failure.name,
            failure.diagnostic.as_deref().unwrap_or_default()
        );
    }
    println!("    report:  {}", path.display());
    if run.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(PARTIAL_FAILURE_EXIT))
    }
}
