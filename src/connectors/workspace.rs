//! Repository names from rows of Trae's workspace databases.
//!
//! There is no schema knowledge here: every table of every `*.vscdb` under
//! `User/workspaceStorage` is sampled, each row is flattened into a tuple-like
//! string and the row rules are run over it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::types::ValueRef;

use crate::config::Config;
use crate::connectors::{
    CandidateSource, ScanOutcome, SourceKind, WORKSPACE_STORAGE, has_extension, open_readonly,
    walk_files,
};
use crate::extract::{Rule, extract, row_rules};

pub struct WorkspaceScanner {
    root: PathBuf,
    rules: Vec<Rule>,
    row_limit: u32,
    db_timeout: Duration,
}

impl WorkspaceScanner {
    pub fn new(storage_root: &Path, rules: Vec<Rule>, row_limit: u32, db_timeout: Duration) -> Self {
        Self {
            root: storage_root.join(WORKSPACE_STORAGE),
            rules,
            row_limit,
            db_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.storage_root,
            row_rules(&config.github_owner, &config.discovery.keywords),
            config.discovery.row_limit,
            config.discovery.db_timeout(),
        )
    }

    fn scan_db(&self, path: &Path, outcome: &mut ScanOutcome) -> rusqlite::Result<()> {
        let conn = open_readonly(path, self.db_timeout)?;
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for table in tables {
            if let Err(e) = self.scan_table(&conn, &table, outcome) {
                outcome.skip(path.join(&table), e);
            }
        }
        Ok(())
    }

    fn scan_table(&self, conn: &Connection, table: &str, outcome: &mut ScanOutcome) -> rusqlite::Result<()> {
        let sql = format!(
            "SELECT * FROM \"{}\" LIMIT {}",
            table.replace('"', "\"\""),
            self.row_limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                values.push(render_value(row.get_ref(idx)?));
            }
            let text = format!("({})", values.join(", "));
            for name in extract(&text, &self.rules) {
                tracing::debug!(name = %name, table = %table, "found repository (workspace)");
                outcome.candidates.insert(name);
            }
        }
        Ok(())
    }
}

/// Render one column value the way a row dump would show it.
fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "None".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            format!("'{}'", String::from_utf8_lossy(bytes))
        }
    }
}

impl CandidateSource for WorkspaceScanner {
    fn kind(&self) -> SourceKind {
        SourceKind::DatabaseRow
    }

    fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if !self.root.exists() {
            tracing::warn!(path = %self.root.display(), "workspace storage not found");
            return outcome;
        }

        for db_path in walk_files(&self.root, &mut outcome, |p| has_extension(p, "vscdb")) {
            if let Err(e) = self.scan_db(&db_path, &mut outcome) {
                outcome.skip(db_path, e);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::test_support::create_state_db;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(dir: &TempDir, row_limit: u32) -> WorkspaceScanner {
        WorkspaceScanner::new(
            dir.path(),
            row_rules(
                "alex",
                &["powerauto".to_string(), "community".to_string()],
            ),
            row_limit,
            Duration::from_secs(1),
        )
    }

    fn ws(dir: &TempDir, id: &str) -> PathBuf {
        dir.path().join(WORKSPACE_STORAGE).join(id).join("state.vscdb")
    }

    #[test]
    fn scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let outcome = scanner(&dir, 10).scan();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn scan_matches_urls_and_keywords_in_any_table() {
        let dir = TempDir::new().unwrap();
        let path = ws(&dir, "abc");
        create_state_db(
            &path,
            &[(
                "git.remotes",
                r#"{"origin":"https://github.com/alex/ourdaily.git"}"#,
            )],
        );
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE notes (id INTEGER, body TEXT)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO notes VALUES (1, 'opened communitypowerauto today')",
            [],
        )
        .unwrap();
        drop(conn);

        let outcome = scanner(&dir, 10).scan();
        assert!(outcome.candidates.contains("ourdaily.git"));
        assert!(outcome.candidates.contains("communitypowerauto"));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn scan_respects_row_limit() {
        let dir = TempDir::new().unwrap();
        let path = ws(&dir, "abc");
        create_state_db(
            &path,
            &[("a", "nothing here"), ("b", "still nothing"), ("c", "powerauto_late")],
        );

        let outcome = scanner(&dir, 2).scan();
        assert!(!outcome.candidates.contains("powerauto_late"));

        let outcome = scanner(&dir, 10).scan();
        assert!(outcome.candidates.contains("powerauto_late"));
    }

    #[test]
    fn corrupt_database_is_skipped_and_scan_continues() {
        let dir = TempDir::new().unwrap();
        let bad = ws(&dir, "aaa");
        fs::create_dir_all(bad.parent().unwrap()).unwrap();
        fs::write(&bad, "garbage garbage garbage garbage").unwrap();
        create_state_db(&ws(&dir, "bbb"), &[("k", "powerauto_v3")]);

        let outcome = scanner(&dir, 10).scan();
        assert!(outcome.candidates.contains("powerauto_v3"));
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].path, bad);
    }

    #[test]
    fn odd_table_names_are_quoted() {
        let dir = TempDir::new().unwrap();
        let path = ws(&dir, "abc");
        create_state_db(&path, &[]);
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE \"my \"\"odd\"\" table\" (v TEXT)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO \"my \"\"odd\"\" table\" VALUES ('powerauto_quoted')",
            [],
        )
        .unwrap();
        drop(conn);

        let outcome = scanner(&dir, 10).scan();
        assert!(outcome.candidates.contains("powerauto_quoted"));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn render_value_covers_every_type() {
        assert_eq!(render_value(ValueRef::Null), "None");
        assert_eq!(render_value(ValueRef::Integer(7)), "7");
        assert_eq!(render_value(ValueRef::Text(b"hi")), "'hi'");
        assert_eq!(render_value(ValueRef::Blob(&[0xff])), "'\u{fffd}'");
    }
}
