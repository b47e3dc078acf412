//! Repository names from Trae's local edit history.
//!
//! `User/History` holds JSON index files. They are matched as raw text, so a
//! truncated or otherwise malformed file still contributes whatever it has.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::connectors::{
    CandidateSource, HISTORY_STORAGE, ScanOutcome, SourceKind, has_extension, walk_files,
};
use crate::extract::{Rule, extract, history_rules};

pub struct HistoryScanner {
    root: PathBuf,
    rules: Vec<Rule>,
}

impl HistoryScanner {
    pub fn new(storage_root: &Path, rules: Vec<Rule>) -> Self {
        Self {
            root: storage_root.join(HISTORY_STORAGE),
            rules,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let keywords: Vec<String> = config
            .discovery
            .keywords
            .iter()
            .chain(&config.discovery.history_keywords)
            .cloned()
            .collect();
        Self::new(
            &config.storage_root,
            history_rules(&config.github_owner, &keywords),
        )
    }
}

impl CandidateSource for HistoryScanner {
    fn kind(&self) -> SourceKind {
        SourceKind::HistoryFile
    }

    fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if !self.root.exists() {
            tracing::warn!(path = %self.root.display(), "history directory not found");
            return outcome;
        }

        for path in walk_files(&self.root, &mut outcome, |p| has_extension(p, "json")) {
            match fs::read(&path) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for name in extract(&text, &self.rules) {
                        tracing::debug!(name = %name, path = %path.display(), "found repository (history)");
                        outcome.candidates.insert(name);
                    }
                }
                Err(e) => outcome.skip(path, e),
            }
        }
        outcome
    }
}
