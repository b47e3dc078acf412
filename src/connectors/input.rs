//! Repository names from chat-input attachments.
//!
//! Each workspace `state.vscdb` keeps input history in `ItemTable` under keys
//! containing `input`. Values are JSON arrays of input records; each record may
//! carry a `multiMedia` list whose entries name the attached file:
//!
//! ```json
//! [{"text": "...", "multiMedia": [{"fileName": "powerauto_v3/README.md"}]}]
//! ```
//!
//! Only the `fileName` strings are matched, not the whole row.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use serde_json::Value;

use crate::config::Config;
use crate::connectors::{
    CandidateSource, ScanOutcome, SourceKind, WORKSPACE_STORAGE, open_readonly,
};
use crate::extract::{Rule, extract, filename_rules};

pub struct InputScanner {
    root: PathBuf,
    rules: Vec<Rule>,
    db_timeout: Duration,
}

impl InputScanner {
    pub fn new(storage_root: &Path, rules: Vec<Rule>, db_timeout: Duration) -> Self {
        Self {
            root: storage_root.join(WORKSPACE_STORAGE),
            rules,
            db_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.storage_root,
            filename_rules(&config.discovery.keywords),
            config.discovery.db_timeout(),
        )
    }

    /// `workspaceStorage/*/state.vscdb`, one level deep.
    fn find_db_files(&self, outcome: &mut ScanOutcome) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/*/state.vscdb",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                outcome.skip(&self.root, e);
                return Vec::new();
            }
        };

        let mut dbs = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => dbs.push(path),
                Err(e) => {
                    let path = e.path().to_path_buf();
                    outcome.skip(path, e);
                }
            }
        }
        dbs.sort();
        dbs
    }

    fn scan_db(&self, path: &Path, outcome: &mut ScanOutcome) -> rusqlite::Result<()> {
        let conn = open_readonly(path, self.db_timeout)?;
        let mut stmt = conn.prepare("SELECT value FROM ItemTable WHERE key LIKE '%input%'")?;
        let mut rows = stmt.query([])?;
        let mut idx = 0usize;
        while let Some(row) = rows.next()? {
            idx += 1;
            let raw = match row.get_ref(0)? {
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                _ => continue,
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    for file_name in attachment_file_names(&value) {
                        for name in extract(file_name, &self.rules) {
                            tracing::debug!(name = %name, file_name = %file_name, "found repository (input)");
                            outcome.candidates.insert(name);
                        }
                    }
                }
                Err(e) => outcome.skip(path, format!("input row {idx}: {e}")),
            }
        }
        Ok(())
    }
}

/// `fileName` of every `multiMedia` entry of every record in a JSON array.
fn attachment_file_names(value: &Value) -> Vec<&str> {
    let Some(records) = value.as_array() else {
        return Vec::new();
    };
    records
        .iter()
        .filter_map(|record| record.get("multiMedia").and_then(Value::as_array))
        .flatten()
        .filter_map(|media| media.get("fileName").and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .collect()
}

impl CandidateSource for InputScanner {
    fn kind(&self) -> SourceKind {
        SourceKind::InputRecord
    }

    fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if !self.root.exists() {
            tracing::warn!(path = %self.root.display(), "workspace storage not found");
            return outcome;
        }

        for db_path in self.find_db_files(&mut outcome) {
            if let Err(e) = self.scan_db(&db_path, &mut outcome) {
                outcome.skip(db_path, e);
            }
        }
        outcome
    }
}
