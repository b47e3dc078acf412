//! Repository names from Trae's CodeKG index databases.
//!
//! Trae keeps one code-knowledge-graph database per indexed repository:
//! `User/globalStorage/.ckg/storage/{user}/{repo}_codekg.db`. The repository
//! name is the file name without the suffix.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::connectors::{CODEKG_STORAGE, CandidateSource, ScanOutcome, SourceKind, open_readonly};

pub const CODEKG_SUFFIX: &str = "_codekg.db";

/// File names that are shared indexes rather than repositories.
const IGNORED_NAMES: &[&str] = &["Shared", "temp"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Accessible,
    Inaccessible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub name: String,
    pub status: DatabaseStatus,
    pub db_path: PathBuf,
}

/// Per-repository accessibility of the CodeKG databases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInventory {
    pub total_repos: usize,
    pub accessible_repos: usize,
    pub repositories: Vec<InventoryEntry>,
}

pub struct CodekgScanner {
    root: PathBuf,
}

impl CodekgScanner {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            root: storage_root.join(CODEKG_STORAGE),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage_root)
    }

    /// Strip the CodeKG suffix, rejecting shared/temp indexes.
    fn repository_name(file_name: &str) -> Option<&str> {
        let name = file_name.strip_suffix(CODEKG_SUFFIX)?;
        if name.is_empty() || IGNORED_NAMES.contains(&name) {
            None
        } else {
            Some(name)
        }
    }

    /// Every `(name, path)` pair under the storage root, sorted by path.
    fn databases(&self, outcome: &mut ScanOutcome) -> Vec<(String, PathBuf)> {
        if !self.root.exists() {
            tracing::warn!(path = %self.root.display(), "CodeKG storage not found");
            return Vec::new();
        }

        let mut user_dirs = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect::<Vec<_>>(),
            Err(e) => {
                outcome.skip(&self.root, e);
                return Vec::new();
            }
        };
        user_dirs.sort();

        let mut found = Vec::new();
        for user_dir in user_dirs {
            let entries = match fs::read_dir(&user_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    outcome.skip(&user_dir, e);
                    continue;
                }
            };
            let mut dbs: Vec<(String, PathBuf)> = entries
                .flatten()
                .filter_map(|entry| {
                    let file_name = entry.file_name();
                    let name = Self::repository_name(file_name.to_str()?)?.to_string();
                    Some((name, entry.path()))
                })
                .collect();
            dbs.sort_by(|a, b| a.1.cmp(&b.1));
            found.extend(dbs);
        }
        found
    }

    /// Classify each CodeKG database as accessible or not.
    pub fn inventory(&self) -> RepositoryInventory {
        let mut outcome = ScanOutcome::default();
        let mut inventory = RepositoryInventory::default();

        for (name, db_path) in self.databases(&mut outcome) {
            let probe = open_readonly(&db_path, PROBE_TIMEOUT).and_then(|conn| {
                conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                    row.get::<_, i64>(0)
                })
            });
            let status = match probe {
                Ok(_) => {
                    inventory.accessible_repos += 1;
                    DatabaseStatus::Accessible
                }
                Err(e) => {
                    tracing::debug!(path = %db_path.display(), error = %e, "CodeKG database not accessible");
                    DatabaseStatus::Inaccessible
                }
            };
            inventory.total_repos += 1;
            inventory.repositories.push(InventoryEntry {
                name,
                status,
                db_path,
            });
        }
        inventory
    }
}

impl CandidateSource for CodekgScanner {
    fn kind(&self) -> SourceKind {
        SourceKind::DatabaseFilename
    }

    fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let names: Vec<String> = self
            .databases(&mut outcome)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        for name in names {
            tracing::debug!(name = %name, "found repository (codekg)");
            outcome.candidates.insert(name);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> PathBuf {
        dir.path().join(CODEKG_STORAGE)
    }

    fn create_codekg_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute("CREATE TABLE nodes (id INTEGER PRIMARY KEY)", [])
            .unwrap();
    }

    #[test]
    fn repository_name_strips_suffix() {
        assert_eq!(
            CodekgScanner::repository_name("powerauto_v0.3_codekg.db"),
            Some("powerauto_v0.3")
        );
        assert_eq!(CodekgScanner::repository_name("Shared_codekg.db"), None);
        assert_eq!(CodekgScanner::repository_name("temp_codekg.db"), None);
        assert_eq!(CodekgScanner::repository_name("_codekg.db"), None);
        assert_eq!(CodekgScanner::repository_name("notes.db"), None);
    }

    #[test]
    fn scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let outcome = CodekgScanner::new(dir.path()).scan();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn scan_collects_names_from_every_user_dir() {
        let dir = TempDir::new().unwrap();
        let root = storage(&dir);
        fs::create_dir_all(root.join("user-a")).unwrap();
        fs::create_dir_all(root.join("user-b")).unwrap();
        fs::write(root.join("user-a/healthcare_codekg.db"), "").unwrap();
        fs::write(root.join("user-a/Shared_codekg.db"), "").unwrap();
        fs::write(root.join("user-b/ourdaily_codekg.db"), "").unwrap();
        fs::write(root.join("user-b/readme.txt"), "").unwrap();
        // Files directly under the storage root are not user directories.
        fs::write(root.join("stray_codekg.db"), "").unwrap();

        let outcome = CodekgScanner::new(dir.path()).scan();
        let names: Vec<&str> = outcome.candidates.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["healthcare", "ourdaily"]);
    }

    #[test]
    fn inventory_classifies_accessibility() {
        let dir = TempDir::new().unwrap();
        let user = storage(&dir).join("user");
        fs::create_dir_all(&user).unwrap();
        create_codekg_db(&user.join("good_codekg.db"));
        fs::write(user.join("broken_codekg.db"), "this is not a sqlite file at all").unwrap();

        let inventory = CodekgScanner::new(dir.path()).inventory();
        assert_eq!(inventory.total_repos, 2);
        assert_eq!(inventory.accessible_repos, 1);

        let broken = &inventory.repositories[0];
        assert_eq!(broken.name, "broken");
        assert_eq!(broken.status, DatabaseStatus::Inaccessible);
        let good = &inventory.repositories[1];
        assert_eq!(good.name, "good");
        assert_eq!(good.status, DatabaseStatus::Accessible);
    }

    #[test]
    fn inventory_serializes_status_lowercase() {
        let entry = InventoryEntry {
            name: "x".into(),
            status: DatabaseStatus::Accessible,
            db_path: PathBuf::from("/x_codekg.db"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "accessible");
    }
}
