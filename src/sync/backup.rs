//! Timestamped snapshots of repository working copies and their retention.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("snapshot already exists: {}", .0.display())]
    Exists(PathBuf),

    #[error("backup timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `<name>_<YYYYmmdd_HHMMSS>`.
pub fn snapshot_name(name: &str, at: DateTime<Local>) -> String {
    format!("{name}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Copy `source` into a new snapshot directory under `backup_dir`.
///
/// The copy checks `timeout` between files; on expiry, or any other error,
/// the partial snapshot is removed.
pub fn create_snapshot(
    source: &Path,
    backup_dir: &Path,
    name: &str,
    at: DateTime<Local>,
    timeout: Duration,
) -> Result<PathBuf, BackupError> {
    fs::create_dir_all(backup_dir).map_err(io_err(backup_dir))?;
    let dest = backup_dir.join(snapshot_name(name, at));
    if dest.exists() {
        return Err(BackupError::Exists(dest));
    }

    let deadline = Instant::now() + timeout;
    match copy_tree(source, &dest, deadline, timeout) {
        Ok(()) => Ok(dest),
        Err(e) => {
            let _ = fs::remove_dir_all(&dest);
            Err(e)
        }
    }
}

fn copy_tree(source: &Path, dest: &Path, deadline: Instant, timeout: Duration) -> Result<(), BackupError> {
    for entry in WalkDir::new(source) {
        if Instant::now() >= deadline {
            return Err(BackupError::Timeout(timeout));
        }
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .unwrap_or_else(|_| entry.path());
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(io_err(&target))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_err(&target))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), BackupError> {
    let pointee = fs::read_link(link).map_err(io_err(link))?;
    std::os::unix::fs::symlink(pointee, target).map_err(io_err(target))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> Result<(), BackupError> {
    tracing::debug!(path = %link.display(), "skipping symlink in backup");
    Ok(())
}

/// What a retention sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Delete snapshot directories under `backup_dir` last modified more than
/// `retention` before `now`. A missing backup directory is not an error.
pub fn sweep(backup_dir: &Path, retention: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let Ok(entries) = fs::read_dir(backup_dir) else {
        return report;
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for path in dirs {
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= retention {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), age_days = age.as_secs() / 86_400, "removed old backup");
                report.removed.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove old backup");
                report.failed.push(path);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 9, 5, 7).unwrap()
    }

    fn repo(dir: &TempDir) -> PathBuf {
        let repo = dir.path().join("git/ourdaily");
        fs::create_dir_all(repo.join(".git/refs")).unwrap();
        fs::write(repo.join("README.md"), "hello").unwrap();
        fs::write(repo.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        repo
    }

    #[test]
    fn snapshot_name_uses_timestamp() {
        assert_eq!(snapshot_name("ourdaily", at()), "ourdaily_20250601_090507");
    }

    #[test]
    fn snapshot_copies_the_whole_tree() {
        let dir = TempDir::new().unwrap();
        let source = repo(&dir);
        let backups = dir.path().join("backup");

        let snap = create_snapshot(&source, &backups, "ourdaily", at(), Duration::from_secs(60)).unwrap();
        assert_eq!(snap, backups.join("ourdaily_20250601_090507"));
        assert_eq!(fs::read_to_string(snap.join("README.md")).unwrap(), "hello");
        assert!(snap.join(".git/HEAD").is_file());
        assert!(snap.join(".git/refs").is_dir());
    }

    #[test]
    fn existing_snapshot_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let source = repo(&dir);
        let backups = dir.path().join("backup");
        create_snapshot(&source, &backups, "ourdaily", at(), Duration::from_secs(60)).unwrap();

        let err = create_snapshot(&source, &backups, "ourdaily", at(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, BackupError::Exists(_)));
    }

    #[test]
    fn expired_deadline_removes_partial_snapshot() {
        let dir = TempDir::new().unwrap();
        let source = repo(&dir);
        let backups = dir.path().join("backup");

        let err = create_snapshot(&source, &backups, "ourdaily", at(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, BackupError::Timeout(_)));
        assert!(!backups.join("ourdaily_20250601_090507").exists());
    }

    #[test]
    fn unusable_backup_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = repo(&dir);
        let not_a_dir = dir.path().join("backup");
        fs::write(&not_a_dir, "file").unwrap();

        let err = create_snapshot(&source, &not_a_dir, "ourdaily", at(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, BackupError::Io { .. }));
    }

    // =========================================================================
    // Retention
    // =========================================================================

    #[test]
    fn sweep_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let report = sweep(&dir.path().join("none"), 7 * DAY, SystemTime::now());
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn sweep_removes_only_snapshots_past_the_window() {
        let dir = TempDir::new().unwrap();
        let backups = dir.path().join("backup");
        fs::create_dir_all(backups.join("ourdaily_20250101_000000")).unwrap();
        fs::create_dir_all(backups.join("subtitles_20250601_000000")).unwrap();
        fs::write(backups.join("stray.txt"), "").unwrap();

        let now = SystemTime::now();
        let old = fs::File::open(backups.join("ourdaily_20250101_000000")).unwrap();
        old.set_modified(now - 10 * DAY).unwrap();

        let report = sweep(&backups, 7 * DAY, now);
        assert_eq!(report.removed, vec![backups.join("ourdaily_20250101_000000")]);
        assert!(report.failed.is_empty());
        assert!(backups.join("subtitles_20250601_000000").exists());
        assert!(backups.join("stray.txt").exists());
    }

    #[test]
    fn sweep_keeps_everything_inside_the_window() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a_20250601_000000")).unwrap();
        let report = sweep(dir.path(), 7 * DAY, SystemTime::now() + DAY);
        assert!(report.removed.is_empty());
        assert!(dir.path().join("a_20250601_000000").exists());
    }
}
