//! Candidate sources: scanners over Trae's local storage.
//!
//! Each scanner implements [`CandidateSource`] and reads one category of data
//! under the Trae application-support directory:
//!
//! - [`codekg`]: `User/globalStorage/.ckg/storage/*/<repo>_codekg.db` file names
//! - [`workspace`]: every table of every `*.vscdb` under `User/workspaceStorage`
//! - [`history`]: raw text of `*.json` files under `User/History`
//! - [`input`]: attachment file names in `ItemTable` input records
//! - [`known`]: the static allow-list
//!
//! Scanners never fail. A missing root yields an empty [`ScanOutcome`]; an
//! unreadable file, table or row is recorded as a [`SkippedItem`] and the scan
//! moves on.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::Config;

pub mod codekg;
pub mod history;
pub mod input;
pub mod known;
pub mod workspace;

pub const CODEKG_STORAGE: &str = "User/globalStorage/.ckg/storage";
pub const WORKSPACE_STORAGE: &str = "User/workspaceStorage";
pub const HISTORY_STORAGE: &str = "User/History";

/// Where a candidate name came from.
///
/// The declaration order is the tie-break when two sources report the same
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    DatabaseFilename,
    DatabaseRow,
    HistoryFile,
    InputRecord,
    KnownList,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatabaseFilename => write!(f, "database-filename"),
            Self::DatabaseRow => write!(f, "database-row"),
            Self::HistoryFile => write!(f, "history-file"),
            Self::InputRecord => write!(f, "input-record"),
            Self::KnownList => write!(f, "known-list"),
        }
    }
}

/// An item a scanner could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub candidates: BTreeSet<String>,
    pub skipped: Vec<SkippedItem>,
}

impl ScanOutcome {
    pub fn skip(&mut self, path: impl Into<PathBuf>, reason: impl fmt::Display) {
        let path = path.into();
        let reason = reason.to_string();
        tracing::debug!(path = %path.display(), reason = %reason, "skipped unreadable item");
        self.skipped.push(SkippedItem { path, reason });
    }
}

/// A scanner producing candidate repository names.
pub trait CandidateSource: Send {
    fn kind(&self) -> SourceKind;
    fn scan(&self) -> ScanOutcome;
}

/// All scanners, in provenance order, configured from `config`.
pub fn default_sources(config: &Config) -> Vec<Box<dyn CandidateSource>> {
    vec![
        Box::new(codekg::CodekgScanner::from_config(config)),
        Box::new(workspace::WorkspaceScanner::from_config(config)),
        Box::new(history::HistoryScanner::from_config(config)),
        Box::new(input::InputScanner::from_config(config)),
        Box::new(known::KnownRepositories::from_config(config)),
    ]
}

/// Open a SQLite database read-only with a busy timeout.
pub fn open_readonly(path: &Path, timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(timeout)?;
    Ok(conn)
}

/// Recursively collect files under `root` accepted by `keep`, in file-name order.
///
/// Directory entries that cannot be read are recorded on `outcome`.
pub(crate) fn walk_files(
    root: &Path,
    outcome: &mut ScanOutcome,
    keep: impl Fn(&Path) -> bool,
) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() && keep(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                outcome.skip(path, e);
            }
        }
    }
    files
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    use rusqlite::Connection;

    /// Create a Trae-style `state.vscdb` with an `ItemTable`.
    pub fn create_state_db(path: &Path, rows: &[(&str, &str)]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)",
            [],
        )
        .unwrap();
        for (key, value) in rows {
            conn.execute("INSERT INTO ItemTable (key, value) VALUES (?1, ?2)", [key, value])
                .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn source_kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&SourceKind::DatabaseFilename).unwrap(),
            "\"database-filename\""
        );
        assert_eq!(SourceKind::InputRecord.to_string(), "input-record");
    }

    #[test]
    fn source_kind_orders_by_provenance() {
        assert!(SourceKind::DatabaseFilename < SourceKind::DatabaseRow);
        assert!(SourceKind::InputRecord < SourceKind::KnownList);
    }

    #[test]
    fn walk_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/2.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();

        let mut outcome = ScanOutcome::default();
        let files = walk_files(dir.path(), &mut outcome, |p| has_extension(p, "json"));
        assert_eq!(
            files,
            vec![dir.path().join("a.json"), dir.path().join("b/2.json")]
        );
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn open_readonly_fails_for_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(open_readonly(&dir.path().join("nope.db"), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn default_sources_cover_every_kind() {
        let kinds: Vec<SourceKind> = default_sources(&Config::default())
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::DatabaseFilename,
                SourceKind::DatabaseRow,
                SourceKind::HistoryFile,
                SourceKind::InputRecord,
                SourceKind::KnownList,
            ]
        );
    }
}
