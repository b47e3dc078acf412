use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, Utc};
use indicatif::ProgressBar;

use crate::config::SyncConfig;
use crate::discovery::RepositoryRecord;
use crate::sync::backup::{self, SweepReport};
use crate::sync::git::{GitCli, GitClient, GitError};
use crate::sync::report::{SyncOutcome, SyncRun};

/// Clones or fast-forwards repositories into the git directory.
///
/// Records are processed strictly one at a time, in worklist order. A failure
/// in one record never stops the run.
pub struct SyncEngine {
    git: Box<dyn GitClient>,
    git_dir: PathBuf,
    backup_dir: PathBuf,
    primary_branch: String,
    fallback_branch: String,
    backup_timeout: Duration,
    retention: Duration,
    progress: Option<ProgressBar>,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig, git: Box<dyn GitClient>) -> Self {
        Self {
            git,
            git_dir: config.git_dir.clone(),
            backup_dir: config.backup_dir.clone(),
            primary_branch: config.primary_branch.clone(),
            fallback_branch: config.fallback_branch.clone(),
            backup_timeout: config.backup_timeout(),
            retention: Duration::from_secs(config.retention_days * 86_400),
            progress: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config, Box::new(GitCli::new(config.git_timeout())))
    }

    /// Report progress on `bar` while syncing.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Sync every record, then run the retention sweep.
    pub fn sync_all(&self, records: &[RepositoryRecord]) -> SyncRun {
        let mut run = SyncRun::new(Utc::now());
        if let Err(e) = fs::create_dir_all(&self.git_dir) {
            tracing::warn!(path = %self.git_dir.display(), error = %e, "failed to create git directory");
        }
        if let Some(bar) = &self.progress {
            bar.set_length(records.len() as u64);
        }

        for record in records {
            if let Some(bar) = &self.progress {
                bar.set_message(record.name.clone());
            }
            let outcome = self.sync_one(record);
            if outcome.success {
                tracing::info!(name = %record.name, "repository synced");
            } else {
                tracing::warn!(
                    name = %record.name,
                    error = outcome.diagnostic.as_deref().unwrap_or_default(),
                    "repository sync failed"
                );
            }
            run.add_outcome(outcome);
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        self.cleanup();

        tracing::info!(
            total = run.total,
            success = run.success,
            failed = run.failed,
            "sync run finished"
        );
        run
    }

    fn sync_one(&self, record: &RepositoryRecord) -> SyncOutcome {
        let fail = |diagnostic: String| SyncOutcome::failed(&record.name, &record.github_url, diagnostic);

        if !is_plain_name(&record.name) {
            return fail(format!("invalid repository name: {:?}", record.name));
        }
        let path = self.git_dir.join(&record.name);

        if path.exists() {
            self.backup(&record.name, &path);

            if path.join(".git").exists() {
                return match self.update(&path) {
                    Ok(()) => SyncOutcome::succeeded(&record.name, &record.github_url),
                    Err(e) => fail(e.to_string()),
                };
            }

            tracing::info!(path = %path.display(), "not a git checkout; re-cloning");
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = removed {
                return fail(format!("failed to remove {}: {e}", path.display()));
            }
        }

        tracing::debug!(name = %record.name, url = %record.github_url, "cloning");
        match self.git.clone_repo(&record.github_url, &path) {
            Ok(()) => SyncOutcome::succeeded(&record.name, &record.github_url),
            Err(e) => {
                discard_partial_clone(&path);
                fail(e.to_string())
            }
        }
    }

    /// Best effort: a failed backup is logged and the update goes ahead.
    fn backup(&self, name: &str, path: &Path) {
        match backup::create_snapshot(path, &self.backup_dir, name, Local::now(), self.backup_timeout) {
            Ok(snapshot) => tracing::debug!(snapshot = %snapshot.display(), "backup created"),
            Err(e) => tracing::warn!(name, error = %e, "backup failed; continuing"),
        }
    }

    fn update(&self, path: &Path) -> Result<(), GitError> {
        let primary_error = match self.git.pull(path, &self.primary_branch) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::debug!(
            path = %path.display(),
            branch = %self.primary_branch,
            error = %primary_error,
            "pull failed; trying fallback branch"
        );
        self.git
            .pull(path, &self.fallback_branch)
            .map_err(|fallback_error| GitError::PullFailed {
                primary: self.primary_branch.clone(),
                primary_error: primary_error.to_string(),
                fallback: self.fallback_branch.clone(),
                fallback_error: fallback_error.to_string(),
            })
    }

    /// Delete snapshots older than the retention window.
    pub fn cleanup(&self) -> SweepReport {
        self.cleanup_at(SystemTime::now())
    }

    pub fn cleanup_at(&self, now: SystemTime) -> SweepReport {
        backup::sweep(&self.backup_dir, self.retention, now)
    }

    /// Names of checked-out repositories (directories containing `.git`).
    pub fn status(&self) -> Result<Vec<String>, std::io::Error> {
        if !self.git_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.git_dir)?
            .filter_map(Result::ok)
            .filter(|e| e.path().join(".git").exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// A killed `git clone` leaves `<dest>/.git` behind, which would otherwise be
/// treated as a checkout on every later run.
fn discard_partial_clone(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial clone"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial clone"),
    }
}

/// A single normal path component, so a record can never escape the git dir.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
