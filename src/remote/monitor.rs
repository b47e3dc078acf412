//! Readiness checks for the client/server pair.
//!
//! A poll asks four independent questions (is Trae running, is an MCP agent
//! running, does the session database answer, does the server answer) and
//! collects the CodeKG inventory alongside. Every poll builds a fresh
//! [`ConnectionStatus`]; nothing carries over between polls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::connectors::codekg::{CodekgScanner, RepositoryInventory};
use crate::connectors::{WORKSPACE_STORAGE, open_readonly};
use crate::remote::transport::Transport;
use crate::schedule::Clock;

const SESSION_DB_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Process oracle
// =============================================================================

/// How a process is recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessMatcher {
    /// Substring of the process name or of any argument.
    NameOrArgs(String),
    /// Case-insensitive substring of any argument.
    ArgsCaseInsensitive(String),
}

impl ProcessMatcher {
    pub fn matches(&self, name: &str, args: &[String]) -> bool {
        match self {
            Self::NameOrArgs(needle) => {
                name.contains(needle.as_str()) || args.iter().any(|a| a.contains(needle.as_str()))
            }
            Self::ArgsCaseInsensitive(needle) => {
                let needle = needle.to_lowercase();
                args.iter().any(|a| a.to_lowercase().contains(&needle))
            }
        }
    }
}

pub trait ProcessOracle: Send {
    fn is_running(&self, matcher: &ProcessMatcher) -> bool;
}

/// The live process table.
#[derive(Debug, Default)]
pub struct SystemProcesses;

impl ProcessOracle for SystemProcesses {
    fn is_running(&self, matcher: &ProcessMatcher) -> bool {
        let system = sysinfo::System::new_all();
        system.processes().values().any(|p| {
            let name = p.name().to_string_lossy();
            let args: Vec<String> = p
                .cmd()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            matcher.matches(&name, &args)
        })
    }
}

// =============================================================================
// Status snapshot
// =============================================================================

/// One poll's worth of readiness data, as written to the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusFile")]
pub struct ConnectionStatus {
    timestamp: DateTime<Utc>,
    trae_running: bool,
    mcp_running: bool,
    database_accessible: bool,
    ssh_connection: bool,
    repositories: RepositoryInventory,
    connection_ready: bool,
    platform: String,
}

/// On-disk shape. `connection_ready` is ignored on read and recomputed.
#[derive(Deserialize)]
struct StatusFile {
    timestamp: DateTime<Utc>,
    trae_running: bool,
    mcp_running: bool,
    database_accessible: bool,
    ssh_connection: bool,
    #[serde(default)]
    repositories: RepositoryInventory,
    #[serde(default)]
    platform: String,
}

impl From<StatusFile> for ConnectionStatus {
    fn from(raw: StatusFile) -> Self {
        Self::new(
            raw.timestamp,
            raw.platform,
            raw.trae_running,
            raw.mcp_running,
            raw.database_accessible,
            raw.ssh_connection,
            raw.repositories,
        )
    }
}

impl ConnectionStatus {
    pub fn new(
        timestamp: DateTime<Utc>,
        platform: impl Into<String>,
        trae_running: bool,
        mcp_running: bool,
        database_accessible: bool,
        ssh_connection: bool,
        repositories: RepositoryInventory,
    ) -> Self {
        Self {
            timestamp,
            trae_running,
            mcp_running,
            database_accessible,
            ssh_connection,
            repositories,
            connection_ready: trae_running && mcp_running && database_accessible && ssh_connection,
            platform: platform.into(),
        }
    }

    pub fn ready(&self) -> bool {
        self.connection_ready
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trae_running(&self) -> bool {
        self.trae_running
    }

    pub fn mcp_running(&self) -> bool {
        self.mcp_running
    }

    pub fn database_accessible(&self) -> bool {
        self.database_accessible
    }

    pub fn ssh_connection(&self) -> bool {
        self.ssh_connection
    }

    pub fn repositories(&self) -> &RepositoryInventory {
        &self.repositories
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Overwrite the status file with this snapshot.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    /// Read a previously saved snapshot; `None` when no file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Human-readable summary for the terminal.
    pub fn summary(&self) -> String {
        let mark = |ok: bool| {
            if ok {
                "✓".green().to_string()
            } else {
                "✗".red().to_string()
            }
        };

        let mut lines = vec![
            format!("{} ({})", "Trae / MCP connection status".bold(), self.platform),
            format!("    {} Trae running", mark(self.trae_running)),
            format!("    {} MCP agent running", mark(self.mcp_running)),
            format!("    {} session database accessible", mark(self.database_accessible)),
            format!("    {} remote reachable", mark(self.ssh_connection)),
            format!(
                "    {} {}/{} CodeKG databases accessible",
                "•".dimmed(),
                self.repositories.accessible_repos,
                self.repositories.total_repos
            ),
        ];

        let verdict = if self.connection_ready {
            "ready to sync".green().bold()
        } else {
            "not ready".yellow().bold()
        };
        lines.push(format!("    {verdict}"));
        lines.join("\n")
    }
}

// =============================================================================
// Monitor
// =============================================================================

pub struct Monitor {
    processes: Box<dyn ProcessOracle>,
    transport: Option<Box<dyn Transport>>,
    clock: Arc<dyn Clock>,
    client: ProcessMatcher,
    agent: ProcessMatcher,
    storage_root: PathBuf,
    session_db: Option<PathBuf>,
    codekg: CodekgScanner,
    platform: String,
}

impl Monitor {
    /// `transport` is `None` when no remote is configured; the remote then
    /// always counts as unreachable.
    pub fn new(
        config: &Config,
        processes: Box<dyn ProcessOracle>,
        transport: Option<Box<dyn Transport>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processes,
            transport,
            clock,
            client: ProcessMatcher::NameOrArgs(config.monitor.client_process.clone()),
            agent: ProcessMatcher::ArgsCaseInsensitive(config.monitor.agent_process.clone()),
            storage_root: config.storage_root.clone(),
            session_db: config.session_db(),
            codekg: CodekgScanner::from_config(config),
            platform: config.platform.clone(),
        }
    }

    pub fn poll(&self) -> ConnectionStatus {
        let trae_running = self.processes.is_running(&self.client);
        let mcp_running = self.processes.is_running(&self.agent);
        let database_accessible = self.probe_database();
        let ssh_connection = self.probe_remote();
        let repositories = self.codekg.inventory();

        let status = ConnectionStatus::new(
            self.clock.now(),
            &self.platform,
            trae_running,
            mcp_running,
            database_accessible,
            ssh_connection,
            repositories,
        );
        tracing::info!(
            trae = trae_running,
            mcp = mcp_running,
            database = database_accessible,
            ssh = ssh_connection,
            ready = status.ready(),
            "connection status"
        );
        status
    }

    fn session_db(&self) -> Option<PathBuf> {
        self.session_db
            .clone()
            .or_else(|| latest_session_db(&self.storage_root.join(WORKSPACE_STORAGE)))
    }

    fn probe_database(&self) -> bool {
        let Some(path) = self.session_db() else {
            tracing::debug!("no session database found");
            return false;
        };
        let result = open_readonly(&path, SESSION_DB_TIMEOUT).and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM ItemTable", [], |row| row.get::<_, i64>(0))
        });
        match result {
            Ok(rows) => {
                tracing::debug!(path = %path.display(), rows, "session database accessible");
                true
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "session database inaccessible");
                false
            }
        }
    }

    fn probe_remote(&self) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        match transport.probe() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "remote probe failed");
                false
            }
        }
    }
}

/// The most recently modified `*/state.vscdb` directly under `root`.
fn latest_session_db(root: &Path) -> Option<PathBuf> {
    std::fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path().join("state.vscdb"))
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max()
        .map(|(_, path)| path)
}
