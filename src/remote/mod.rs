//! Client-side half of the pipeline: talking to the sync server.
//!
//! - **transport**: ssh/scp (or SFTP) channel behind the [`Transport`] trait
//! - **monitor**: readiness polling and the status snapshot
//! - **dispatch**: cooldown-gated hand-off of the worklist to the server
//!
//! A typical client loop polls the monitor and hands the resulting status to
//! the dispatcher:
//!
//! ```rust,ignore
//! let status = monitor.poll();
//! status.save(&config.monitor.status_file)?;
//! match dispatcher.maybe_sync(&status) {
//!     DispatchOutcome::Dispatched { repositories } => println!("sent {repositories}"),
//!     DispatchOutcome::PartiallySynced { repositories } => println!("sent {repositories}, some failed"),
//!     other => tracing::debug!(?other, "no dispatch"),
//! }
//! ```

pub mod dispatch;
pub mod monitor;
pub mod transport;

pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher, WorklistPayload};
pub use monitor::{ConnectionStatus, Monitor, ProcessMatcher, ProcessOracle, SystemProcesses};
pub use transport::{SshTransport, Transport, TransportError, UploadMethod};

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::transport::{Transport, TransportError};

    /// What a [`FakeTransport`] was asked to do.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Probe,
        /// Local path, whether it existed at upload time, its contents, remote path.
        Upload {
            local: PathBuf,
            existed: bool,
            contents: String,
            remote: String,
        },
        Execute(String),
    }

    /// Scriptable transport that records every call.
    #[derive(Debug, Clone)]
    pub struct FakeTransport {
        pub probe_ok: bool,
        pub upload_ok: bool,
        pub execute_ok: bool,
        /// Make `execute` fail as if the remote command exited with this code.
        pub execute_exit: Option<i32>,
        pub calls: Arc<Mutex<Vec<Call>>>,
    }

    impl Default for FakeTransport {
        fn default() -> Self {
            Self {
                probe_ok: true,
                upload_ok: true,
                execute_ok: true,
                execute_exit: None,
                calls: Arc::default(),
            }
        }
    }

    impl FakeTransport {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn executions(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Execute(_)))
                .count()
        }

        #[cfg(unix)]
        fn exit_error(&self) -> Option<TransportError> {
            use std::os::unix::process::ExitStatusExt;
            let code = self.execute_exit?;
            Some(TransportError::Command(crate::process::CommandError::Failed {
                program: "ssh".into(),
                status: std::process::ExitStatus::from_raw(code << 8),
                stderr: "scripted exit".into(),
            }))
        }

        #[cfg(not(unix))]
        fn exit_error(&self) -> Option<TransportError> {
            None
        }

        fn fail(what: &str) -> TransportError {
            TransportError::Io {
                context: what.to_string(),
                source: std::io::Error::other("scripted failure"),
            }
        }
    }

    impl Transport for FakeTransport {
        fn probe(&self) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::Probe);
            if self.probe_ok { Ok(()) } else { Err(Self::fail("probe")) }
        }

        fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::Upload {
                local: local.to_path_buf(),
                existed: local.exists(),
                contents: std::fs::read_to_string(local).unwrap_or_default(),
                remote: remote_path.to_string(),
            });
            if self.upload_ok { Ok(()) } else { Err(Self::fail("upload")) }
        }

        fn execute(&self, command: &str, _timeout: Duration) -> Result<String, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Execute(command.to_string()));
            if let Some(e) = self.exit_error() {
                return Err(e);
            }
            if self.execute_ok {
                Ok("ok\n".to_string())
            } else {
                Err(Self::fail("execute"))
            }
        }
    }
}
