//! Hands the discovered worklist to the sync server.
//!
//! Each tick the dispatcher looks at the latest [`ConnectionStatus`]. When the
//! pair is ready and the cooldown has passed, it runs discovery, uploads the
//! worklist as JSON and runs `trae-sync sync --repo-list <file>` remotely.
//! A dispatch starts a new cooldown window once the upload succeeded and the
//! remote run finished, even if some repositories failed to sync there.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::discovery::{Discovery, RepositoryRecord};
use crate::process::CommandError;
use crate::remote::monitor::ConnectionStatus;
use crate::remote::transport::{Transport, TransportError};
use crate::schedule::Clock;
use crate::sync::PARTIAL_FAILURE_EXIT;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to write worklist: {0}")]
    Worklist(#[from] std::io::Error),

    #[error("failed to serialize worklist: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid remote command: {0}")]
    RemoteCommand(#[from] shell_words::ParseError),

    #[error("upload failed: {0}")]
    Upload(#[source] TransportError),

    #[error("remote sync failed: {0}")]
    Remote(#[source] TransportError),
}

/// What a dispatcher tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NotReady,
    CoolingDown { remaining: Duration },
    EmptyWorklist,
    Dispatched { repositories: usize },
    /// The remote run finished but reported failed repositories.
    PartiallySynced { repositories: usize },
    Failed(String),
}

impl DispatchOutcome {
    /// The worklist reached the server and the remote run finished.
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. } | Self::PartiallySynced { .. })
    }
}

/// How the remote `sync` run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteRun {
    Clean,
    Partial,
}

fn remote_exit_code(error: &TransportError) -> Option<i32> {
    match error {
        TransportError::Command(CommandError::Failed { status, .. }) => status.code(),
        _ => None,
    }
}

/// The JSON document uploaded to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistPayload {
    pub repositories: Vec<RepositoryRecord>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub sync_time: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
}

/// RFC 3339, or a bare ISO-8601 local time which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Ok(at.with_timezone(&Utc)),
        Err(e) => raw
            .parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

impl WorklistPayload {
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Client-side record of the last dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub sync_time: DateTime<Utc>,
    pub total_repositories: usize,
    pub sync_success: bool,
    pub repositories: Vec<String>,
    pub source: String,
}

impl DispatchReport {
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}

/// `<command> sync --repo-list <worklist>`, shell-quoted for the remote side.
pub fn remote_sync_command(command: &str, worklist: &str) -> Result<String, shell_words::ParseError> {
    let mut parts = shell_words::split(command)?;
    parts.extend(["sync", "--repo-list", worklist].map(String::from));
    Ok(shell_words::join(parts))
}

pub struct Dispatcher {
    discovery: Discovery,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    source_tag: String,
    remote_worklist: String,
    remote_command: String,
    command_timeout: Duration,
    report_file: Option<PathBuf>,
    last_dispatch: Option<DateTime<Utc>>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        discovery: Discovery,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            discovery,
            transport,
            clock,
            cooldown: config.dispatch.cooldown(),
            source_tag: config.dispatch.source_tag.clone(),
            remote_worklist: config.remote.worklist_path.clone(),
            remote_command: config.remote.command.clone(),
            command_timeout: config.remote.command_timeout(),
            report_file: Some(config.dispatch.report_file.clone()),
            last_dispatch: None,
        }
    }

    /// Skip writing the client-side dispatch report.
    pub fn without_report(mut self) -> Self {
        self.report_file = None;
        self
    }

    pub fn last_dispatch(&self) -> Option<DateTime<Utc>> {
        self.last_dispatch
    }

    /// Time left before another dispatch is allowed.
    fn cooldown_remaining(&self) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
        (elapsed <= self.cooldown).then(|| self.cooldown.saturating_sub(elapsed))
    }

    /// One dispatcher tick: dispatch if `status` is ready and the cooldown
    /// has passed.
    pub fn maybe_sync(&mut self, status: &ConnectionStatus) -> DispatchOutcome {
        if !status.ready() {
            tracing::debug!("connection not ready; skipping dispatch");
            return DispatchOutcome::NotReady;
        }
        if let Some(remaining) = self.cooldown_remaining() {
            tracing::debug!(remaining_secs = remaining.as_secs(), "dispatch cooling down");
            return DispatchOutcome::CoolingDown { remaining };
        }
        self.dispatch()
    }

    /// Discover and dispatch unconditionally.
    pub fn dispatch(&mut self) -> DispatchOutcome {
        let records = self.discovery.run().records;
        if records.is_empty() {
            tracing::warn!("no repositories discovered; nothing to dispatch");
            return DispatchOutcome::EmptyWorklist;
        }

        let payload = WorklistPayload {
            repositories: records,
            sync_time: self.clock.now(),
            source: self.source_tag.clone(),
        };
        let count = payload.repositories.len();
        tracing::info!(count, "dispatching worklist");

        let outcome = match self.send(&payload) {
            Ok(RemoteRun::Clean) => {
                self.last_dispatch = Some(payload.sync_time);
                tracing::info!(count, "remote sync completed");
                DispatchOutcome::Dispatched {
                    repositories: count,
                }
            }
            Ok(RemoteRun::Partial) => {
                self.last_dispatch = Some(payload.sync_time);
                tracing::warn!(count, "remote sync completed with failed repositories");
                DispatchOutcome::PartiallySynced {
                    repositories: count,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dispatch failed; will retry on the next eligible tick");
                DispatchOutcome::Failed(e.to_string())
            }
        };

        self.write_report(&payload, matches!(outcome, DispatchOutcome::Dispatched { .. }));
        outcome
    }

    /// Upload the payload through a temp file and run the remote sync.
    /// The temp file is removed when this returns, on every path.
    fn send(&self, payload: &WorklistPayload) -> Result<RemoteRun, DispatchError> {
        let mut file = tempfile::Builder::new()
            .prefix("trae_repo_list_")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer_pretty(&mut file, payload)?;
        file.flush()?;

        self.transport
            .upload(file.path(), &self.remote_worklist)
            .map_err(DispatchError::Upload)?;

        let command = remote_sync_command(&self.remote_command, &self.remote_worklist)?;
        match self.transport.execute(&command, self.command_timeout) {
            Ok(output) => {
                for line in output.lines().filter(|l| !l.trim().is_empty()) {
                    tracing::debug!(line, "remote");
                }
                Ok(RemoteRun::Clean)
            }
            Err(e) if remote_exit_code(&e) == Some(i32::from(PARTIAL_FAILURE_EXIT)) => {
                tracing::debug!(error = %e, "remote sync reported failed repositories");
                Ok(RemoteRun::Partial)
            }
            Err(e) => Err(DispatchError::Remote(e)),
        }
    }

    fn write_report(&self, payload: &WorklistPayload, success: bool) {
        let Some(path) = &self.report_file else {
            return;
        };
        let report = DispatchReport {
            sync_time: payload.sync_time,
            total_repositories: payload.repositories.len(),
            sync_success: success,
            repositories: payload.repositories.iter().map(|r| r.name.clone()).collect(),
            source: payload.source.clone(),
        };
        if let Err(e) = report.save(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write dispatch report");
        }
    }
}
