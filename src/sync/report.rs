//! Per-run results and the report file written after every sync.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Result of syncing one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub name: String,
    pub success: bool,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl SyncOutcome {
    pub fn succeeded(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            url: url.into(),
            diagnostic: None,
        }
    }

    pub fn failed(name: impl Into<String>, url: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: false,
            url: url.into(),
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Outcomes of one `sync_all` call, in worklist order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub details: Vec<SyncOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl SyncRun {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            success: 0,
            failed: 0,
            details: Vec::new(),
            timestamp,
        }
    }

    pub fn add_outcome(&mut self, outcome: SyncOutcome) {
        self.total += 1;
        if outcome.success {
            self.success += 1;
        } else {
            self.failed += 1;
        }
        self.details.push(outcome);
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.details.iter().filter(|o| !o.success)
    }
}

/// Where the worklist came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSource {
    pub sync_time: Option<DateTime<Utc>>,
    pub source: String,
}

/// The JSON artifact written to the report directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub sync_time: DateTime<Utc>,
    pub platform: String,
    pub source: ReportSource,
    pub results: SyncRun,
    pub git_directory: PathBuf,
    pub backup_directory: PathBuf,
}

impl SyncReport {
    /// `trae_sync_report_<platform>_<YYYYmmdd_HHMMSS>.json`.
    pub fn file_name(platform: &str, at: DateTime<Local>) -> String {
        format!(
            "trae_sync_report_{platform}_{}.json",
            at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write into `dir` and return the file path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(
            &self.platform,
            self.sync_time.with_timezone(&Local),
        ));
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
