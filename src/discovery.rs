//! Turning scanner output into a sync worklist.
//!
//! [`aggregate`] is pure: identical inputs always produce the same records in
//! the same order, so serializing the worklist twice gives identical bytes.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::connectors::{CandidateSource, SourceKind, default_sources};

/// Where a record came from. Worklists written by other clients carry their
/// own free-form tags, which are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Provenance {
    Scanner(SourceKind),
    Other(String),
}

impl From<SourceKind> for Provenance {
    fn from(kind: SourceKind) -> Self {
        Self::Scanner(kind)
    }
}

/// One repository to synchronize.
///
/// Only `name` and `github_url` are required on the wire; unknown fields
/// (such as `db_file`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub github_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Provenance>,
}

impl RepositoryRecord {
    pub fn new(owner: &str, name: &str, source: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            github_url: github_url(owner, name),
            source: Some(source.into()),
        }
    }

    /// The scanner that produced this record, when it came from discovery.
    pub fn kind(&self) -> Option<SourceKind> {
        match &self.source {
            Some(Provenance::Scanner(kind)) => Some(*kind),
            _ => None,
        }
    }
}

pub fn github_url(owner: &str, name: &str) -> String {
    format!("https://github.com/{owner}/{name}.git")
}

/// Rejects candidates that cannot be repository names.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    denylist: HashSet<String>,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new(["temp", "test", "shared"])
    }
}

impl ExclusionFilter {
    pub fn new(denylist: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            denylist: denylist
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// `name` is expected to be trimmed already.
    pub fn is_excluded(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        let all = |pred: fn(char) -> bool| lower.chars().all(pred);

        lower.chars().count() <= 2
            || all(|c| c.is_ascii_digit())
            || (lower.len() >= 8 && all(|c| c.is_ascii_hexdigit()))
            || lower.starts_with('.')
            || self.denylist.contains(&lower)
    }
}

/// Trim and drop a trailing `.git` left over from URL captures.
fn normalize(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let name = match trimmed.strip_suffix(".git") {
        Some(stem) if !stem.trim().is_empty() => stem.trim_end(),
        _ => trimmed,
    };
    (!name.is_empty()).then_some(name)
}

/// Merge tagged candidate sets into an ordered, deduplicated worklist.
///
/// Names are compared case-insensitively. When several candidates collide,
/// the first one after sorting by (name, provenance) wins, so `"Foo"` beats
/// `"foo"` and a database file name beats the known list.
pub fn aggregate<'a>(
    owner: &str,
    candidate_sets: impl IntoIterator<Item = (SourceKind, &'a BTreeSet<String>)>,
    filter: &ExclusionFilter,
) -> Vec<RepositoryRecord> {
    let mut candidates: Vec<(&str, SourceKind)> = candidate_sets
        .into_iter()
        .flat_map(|(kind, set)| set.iter().filter_map(move |raw| Some((normalize(raw)?, kind))))
        .filter(|(name, _)| !filter.is_excluded(name))
        .collect();
    candidates.sort();

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|(name, _)| seen.insert(name.to_lowercase()))
        .map(|(name, kind)| RepositoryRecord::new(owner, name, kind))
        .collect()
}

/// Candidate and skip counts for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub kind: SourceKind,
    pub candidates: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub records: Vec<RepositoryRecord>,
    pub sources: Vec<SourceSummary>,
}

/// All candidate sources plus the aggregation settings.
pub struct Discovery {
    owner: String,
    sources: Vec<Box<dyn CandidateSource>>,
    filter: ExclusionFilter,
}

impl Discovery {
    pub fn new(owner: impl Into<String>, sources: Vec<Box<dyn CandidateSource>>, filter: ExclusionFilter) -> Self {
        Self {
            owner: owner.into(),
            sources,
            filter,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.github_owner.clone(),
            default_sources(config),
            ExclusionFilter::new(&config.discovery.excluded_names),
        )
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn run(&self) -> DiscoveryResult {
        tracing::info!("discovering repositories from Trae storage");

        let outcomes: Vec<_> = self.sources.iter().map(|s| (s.kind(), s.scan())).collect();
        let sources = outcomes
            .iter()
            .map(|(kind, outcome)| {
                tracing::debug!(
                    source = %kind,
                    candidates = outcome.candidates.len(),
                    skipped = outcome.skipped.len(),
                    "source scanned"
                );
                SourceSummary {
                    kind: *kind,
                    candidates: outcome.candidates.len(),
                    skipped: outcome.skipped.len(),
                }
            })
            .collect();

        let records = aggregate(
            &self.owner,
            outcomes.iter().map(|(kind, outcome)| (*kind, &outcome.candidates)),
            &self.filter,
        );
        tracing::info!(count = records.len(), "discovered repositories");

        DiscoveryResult { records, sources }
    }
}

/// The file written by `trae-sync discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub discovery_time: DateTime<Utc>,
    pub total_repositories: usize,
    pub github_owner: String,
    pub repositories: Vec<RepositoryRecord>,
}

impl DiscoveryReport {
    pub fn new(owner: &str, repositories: Vec<RepositoryRecord>, discovery_time: DateTime<Utc>) -> Self {
        Self {
            discovery_time,
            total_repositories: repositories.len(),
            github_owner: owner.to_string(),
            repositories,
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}
