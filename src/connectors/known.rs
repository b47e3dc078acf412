use crate::config::Config;
use crate::connectors::{CandidateSource, ScanOutcome, SourceKind};

/// The static allow-list. Always part of discovery, so the worklist is never
/// empty even when every heuristic scan comes back with nothing.
pub struct KnownRepositories {
    names: Vec<String>,
}

impl KnownRepositories {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.discovery.known_repositories.iter().cloned())
    }
}

impl CandidateSource for KnownRepositories {
    fn kind(&self) -> SourceKind {
        SourceKind::KnownList
    }

    fn scan(&self) -> ScanOutcome {
        tracing::info!(count = self.names.len(), "adding known repositories");
        ScanOutcome {
            candidates: self.names.iter().cloned().collect(),
            skipped: Vec::new(),
        }
    }
}
