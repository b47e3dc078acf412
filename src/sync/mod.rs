//! Server-side repository sync.
//!
//! - **engine**: clone or fast-forward each record, with a backup first
//! - **git**: the `git` executable behind [`GitClient`]
//! - **backup**: timestamped snapshots and the retention sweep
//! - **report**: per-record outcomes and the report file
//!
//! # Example
//!
//! ```rust,ignore
//! use trae_sync::remote::WorklistPayload;
//! use trae_sync::sync::SyncEngine;
//!
//! let payload = WorklistPayload::load(Path::new("/tmp/trae_repo_list.json"))?;
//! let engine = SyncEngine::from_config(&config.sync);
//! let run = engine.sync_all(&payload.repositories);
//! println!("{}/{} synced", run.success, run.total);
//! ```
//!
//! Existing checkouts are updated with `git pull --ff-only`; nothing here
//! merges, rebases or resets local history.

pub mod backup;
pub mod engine;
pub mod git;
pub mod report;

/// Exit status of `sync` when the run finished but some repositories failed.
/// The dispatcher treats it as a completed hand-off.
pub const PARTIAL_FAILURE_EXIT: u8 = 3;

pub use backup::{BackupError, SweepReport};
pub use engine::SyncEngine;
pub use git::{GitCli, GitClient, GitError};
pub use report::{ReportSource, SyncOutcome, SyncReport, SyncRun};
