//! Remote shell and file-transfer channel.
//!
//! [`SshTransport`] shells out to the system `ssh` and `scp` binaries in batch
//! mode, so keys, agents and `~/.ssh/config` behave as they do interactively.
//! When `scp` is not installed, uploads fall back to SFTP through libssh2.

use std::fs;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, RemoteConfig};
use crate::process::{CommandError, run_checked};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("SFTP transfer failed: {0}")]
    Sftp(#[from] ssh2::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// How files are copied to the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    Scp,
    /// libssh2 fallback when `scp` is unavailable
    Sftp,
}

impl std::fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scp => write!(f, "scp"),
            Self::Sftp => write!(f, "sftp"),
        }
    }
}

/// A request/response channel to the sync server.
pub trait Transport: Send {
    /// Short reachability check.
    fn probe(&self) -> Result<(), TransportError>;

    /// Copy a local file to `remote_path`.
    fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransportError>;

    /// Run `command` remotely and return its stdout.
    fn execute(&self, command: &str, timeout: Duration) -> Result<String, TransportError>;
}

pub struct SshTransport {
    host: String,
    port: u16,
    user: Option<String>,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
    upload_timeout: Duration,
    method: UploadMethod,
}

impl SshTransport {
    pub fn from_config(remote: &RemoteConfig) -> Result<Self, ConfigError> {
        let host = remote.require_host()?.to_string();
        Ok(Self {
            host,
            port: remote.port,
            user: remote.user.clone(),
            identity_file: remote.identity_file.clone(),
            connect_timeout: remote.connect_timeout(),
            upload_timeout: remote.upload_timeout(),
            method: Self::detect_upload_method(),
        })
    }

    /// Override the detected upload method.
    pub fn with_method(mut self, method: UploadMethod) -> Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> UploadMethod {
        self.method
    }

    pub fn detect_upload_method() -> UploadMethod {
        if which::which("scp").is_ok() {
            UploadMethod::Scp
        } else {
            UploadMethod::Sftp
        }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Options shared by `ssh` and `scp`. The port flag differs between them.
    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            port_flag.to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }
        args
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args("-p"))
            .arg("--")
            .arg(self.destination())
            .arg(remote_command);
        cmd
    }

    fn scp_command(&self, local: &Path, remote_path: &str) -> Command {
        let mut cmd = Command::new("scp");
        cmd.args(self.common_args("-P"))
            .arg("--")
            .arg(local)
            .arg(format!("{}:{}", self.destination(), remote_path));
        cmd
    }

    fn upload_sftp(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        let data = fs::read(local)
            .map_err(|e| TransportError::io(format!("failed to read {}", local.display()), e))?;

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::io(format!("failed to resolve {}", self.host), e))?
            .next()
            .ok_or_else(|| {
                TransportError::io(
                    format!("failed to resolve {}", self.host),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )
            })?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| TransportError::io(format!("failed to connect to {addr}"), e))?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.upload_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;

        let user = self
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_default();
        match &self.identity_file {
            Some(key) => session.userauth_pubkey_file(&user, None, key, None)?,
            None => session.userauth_agent(&user)?,
        }

        let sftp = session.sftp()?;
        let mut remote = sftp.create(Path::new(remote_path))?;
        remote
            .write_all(&data)
            .map_err(|e| TransportError::io(format!("failed to write {remote_path}"), e))?;

        tracing::debug!(host = %self.host, remote_path, bytes = data.len(), "uploaded over sftp");
        Ok(())
    }
}

impl Transport for SshTransport {
    fn probe(&self) -> Result<(), TransportError> {
        let mut cmd = self.ssh_command("echo ok");
        let output = run_checked(&mut cmd, self.connect_timeout + Duration::from_secs(5))?;
        tracing::debug!(host = %self.host, reply = %output.stdout.trim(), "remote probe succeeded");
        Ok(())
    }

    fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        tracing::debug!(
            host = %self.host,
            local = %local.display(),
            remote_path,
            method = %self.method,
            "uploading"
        );
        match self.method {
            UploadMethod::Scp => {
                run_checked(&mut self.scp_command(local, remote_path), self.upload_timeout)?;
                Ok(())
            }
            UploadMethod::Sftp => self.upload_sftp(local, remote_path),
        }
    }

    fn execute(&self, command: &str, timeout: Duration) -> Result<String, TransportError> {
        tracing::debug!(host = %self.host, command, "running remote command");
        let output = run_checked(&mut self.ssh_command(command), timeout)?;
        Ok(output.stdout)
    }
}
