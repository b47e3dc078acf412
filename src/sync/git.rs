//! The `git` executable, behind [`GitClient`] so tests can script failures.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

use crate::process::{CommandError, run_checked};

#[derive(Error, Debug)]
pub enum GitError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("pull from {primary} failed ({primary_error}); pull from {fallback} failed ({fallback_error})")]
    PullFailed {
        primary: String,
        primary_error: String,
        fallback: String,
        fallback_error: String,
    },
}

pub trait GitClient: Send {
    /// `git clone <url> <dest>`.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    /// Fast-forward `repo` from `origin/<branch>`.
    fn pull(&self, repo: &Path, branch: &str) -> Result<(), GitError>;
}

/// Runs the system `git` with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        // Never block on a credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }
}

impl GitClient for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let mut cmd = self.command();
        cmd.arg("clone").arg("--").arg(url).arg(dest);
        run_checked(&mut cmd, self.timeout)?;
        Ok(())
    }

    fn pull(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(repo)
            .args(["pull", "--ff-only", "origin", branch]);
        run_checked(&mut cmd, self.timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_failure_message_names_both_branches() {
        let err = GitError::PullFailed {
            primary: "main".into(),
            primary_error: "couldn't find remote ref main".into(),
            fallback: "master".into(),
            fallback_error: "couldn't find remote ref master".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("main"));
        assert!(msg.contains("master"));
        assert!(msg.contains("couldn't find remote ref master"));
    }

    #[test]
    fn clone_into_missing_repo_fails_with_diagnostic() {
        if which::which("git").is_err() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitCli::new(Duration::from_secs(30));
        let err = git
            .clone_repo(
                &dir.path().join("no-such-repo").to_string_lossy(),
                &dir.path().join("dest"),
            )
            .unwrap_err();
        assert!(!err.to_string().is_empty());
        assert!(!dir.path().join("dest").exists());
    }
}
