//! Configuration for trae-sync.
//!
//! Every component receives its settings from a [`Config`] value built once at
//! startup. The file lives at `~/.config/trae-sync/config.toml` unless
//! `--config` or `TRAE_SYNC_CONFIG` points elsewhere:
//!
//! ```toml
//! github_owner = "alexchuang650730"
//!
//! [remote]
//! host = "serveo.net"
//! port = 41269
//! user = "alexchuang"
//!
//! [sync]
//! git_dir = "~/aiengine/trae/ec2/git"
//! retention_days = 7
//! ```
//!
//! Every key is optional; missing keys fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("Trae storage root does not exist: {0}")]
    MissingStorageRoot(PathBuf),

    #[error("no remote host configured (set [remote].host)")]
    MissingRemoteHost,

    #[error("[discovery].known_repositories must list at least one name")]
    EmptyKnownRepositories,
}

/// Names that are always synced, whatever the scanners find.
pub const DEFAULT_KNOWN_REPOSITORIES: &[&str] = &[
    "powerauto.ai_0.53",
    "communitypowerautomation",
    "powerauto_v0.3",
    "powerautomation",
    "final_integration_fixed",
    "communitypowerauto",
    "automation",
    "subtitles",
    "powerautoadmin",
    "healthcare",
    "ourdaily",
    "alexc",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trae application-support directory (the one containing `User/`).
    pub storage_root: PathBuf,
    /// GitHub account that owns every synced repository.
    pub github_owner: String,
    /// Free-text platform tag written into status and report artifacts.
    pub platform: String,
    /// Optional log file; stdout logging is always on.
    pub log_file: Option<PathBuf>,
    pub discovery: DiscoveryConfig,
    pub monitor: MonitorConfig,
    pub remote: RemoteConfig,
    pub dispatch: DispatchConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Keywords matched in database rows and input attachments.
    pub keywords: Vec<String>,
    /// Extra keywords matched only in history files.
    pub history_keywords: Vec<String>,
    pub known_repositories: Vec<String>,
    /// Exact names (case-insensitive) that are never repositories.
    pub excluded_names: Vec<String>,
    /// Rows sampled per table by the workspace scanner.
    pub row_limit: u32,
    /// SQLite busy timeout in seconds.
    pub db_timeout: u64,
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Substring matched against process names and arguments.
    pub client_process: String,
    /// Substring matched (case-insensitively) against process arguments.
    pub agent_process: String,
    /// Session database probed for readiness. Relative paths resolve against
    /// the storage root; unset means "most recently modified state.vscdb".
    pub session_db: Option<PathBuf>,
    pub status_file: PathBuf,
    /// Seconds between polls in continuous mode.
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    /// Private key used for authentication. Passed to `ssh -i` and to the
    /// SFTP fallback.
    pub identity_file: Option<PathBuf>,
    /// Connect timeout in seconds for probes.
    pub connect_timeout: u64,
    /// Seconds allowed for uploading the worklist.
    pub upload_timeout: u64,
    /// Where the worklist payload is uploaded on the remote side.
    pub worklist_path: String,
    /// Program invoked remotely as `<command> sync --repo-list <worklist_path>`.
    pub command: String,
    /// Seconds to wait for the remote sync to finish.
    pub command_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum seconds between successful dispatches.
    pub cooldown: u64,
    /// Seconds between dispatcher ticks in continuous mode.
    pub check_interval: u64,
    /// Tag written into the payload's `source` field.
    pub source_tag: String,
    pub report_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub git_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub report_dir: PathBuf,
    pub primary_branch: String,
    pub fallback_branch: String,
    /// Timeout in seconds for each git invocation.
    pub git_timeout: u64,
    /// Timeout in seconds for each backup copy.
    pub backup_timeout: u64,
    pub retention_days: u64,
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_default()
}

/// Default Trae application-support directory for the running OS.
pub fn default_storage_root() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home().join("Library/Application Support/Trae")
    }
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir().unwrap_or_default().join("Trae")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        home().join(".config/Trae")
    }
}

fn default_platform() -> String {
    match std::env::consts::OS {
        "macos" => "mac".to_string(),
        other => other.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            github_owner: "alexchuang650730".to_string(),
            platform: default_platform(),
            log_file: None,
            discovery: DiscoveryConfig::default(),
            monitor: MonitorConfig::default(),
            remote: RemoteConfig::default(),
            dispatch: DispatchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            keywords: ["powerauto", "community", "automation"]
                .map(String::from)
                .to_vec(),
            history_keywords: vec!["integration".to_string()],
            known_repositories: DEFAULT_KNOWN_REPOSITORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_names: ["temp", "test", "shared"].map(String::from).to_vec(),
            row_limit: 10,
            db_timeout: 5,
            output_file: std::env::temp_dir().join("trae_discovered_repositories.json"),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            client_process: "Trae".to_string(),
            agent_process: "mcp".to_string(),
            session_db: None,
            status_file: std::env::temp_dir().join("mcp_trae_status.json"),
            interval: 10,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: None,
            identity_file: None,
            connect_timeout: 5,
            upload_timeout: 120,
            worklist_path: "/tmp/trae_repo_list.json".to_string(),
            command: "trae-sync".to_string(),
            command_timeout: 1800,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown: 3600,
            check_interval: 30,
            source_tag: "mac_trae_mcp".to_string(),
            report_file: std::env::temp_dir().join("trae_sync_report_mac.json"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            git_dir: home().join("aiengine/trae/git"),
            backup_dir: home().join("aiengine/trae/backup"),
            report_dir: std::env::temp_dir(),
            primary_branch: "main".to_string(),
            fallback_branch: "master".to_string(),
            git_timeout: 300,
            backup_timeout: 300,
            retention_days: 7,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(data)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("trae-sync").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and a missing file yields [`Config::default`].
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        data.parse()
    }

    /// The known-repository list is the floor of every worklist.
    fn validate(&self) -> Result<(), ConfigError> {
        let known = &self.discovery.known_repositories;
        if known.iter().all(|name| name.trim().is_empty()) {
            return Err(ConfigError::EmptyKnownRepositories);
        }
        Ok(())
    }

    /// Fail unless the storage root exists.
    pub fn require_storage_root(&self) -> Result<&Path, ConfigError> {
        if self.storage_root.is_dir() {
            Ok(&self.storage_root)
        } else {
            Err(ConfigError::MissingStorageRoot(self.storage_root.clone()))
        }
    }

    /// Resolve the configured session database against the storage root.
    pub fn session_db(&self) -> Option<PathBuf> {
        self.monitor.session_db.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.storage_root.join(p)
            }
        })
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.storage_root,
            &mut self.discovery.output_file,
            &mut self.monitor.status_file,
            &mut self.dispatch.report_file,
            &mut self.sync.git_dir,
            &mut self.sync.backup_dir,
            &mut self.sync.report_dir,
        ] {
            *path = expand_tilde(path);
        }
        for path in [
            self.log_file.as_mut(),
            self.monitor.session_db.as_mut(),
            self.remote.identity_file.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_tilde(path);
        }
    }
}

impl DiscoveryConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout)
    }
}

impl RemoteConfig {
    pub fn require_host(&self) -> Result<&str, ConfigError> {
        if self.host.trim().is_empty() {
            Err(ConfigError::MissingRemoteHost)
        } else {
            Ok(self.host.trim())
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

impl DispatchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }
}

impl SyncConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout)
    }
}

/// Expand a leading `~` using the local home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn defaults_cover_every_section() {
        let config = Config::default();
        assert_eq!(config.discovery.known_repositories.len(), 12);
        assert_eq!(config.discovery.row_limit, 10);
        assert_eq!(config.dispatch.cooldown, 3600);
        assert_eq!(config.sync.primary_branch, "main");
        assert_eq!(config.sync.fallback_branch, "master");
        assert_eq!(config.sync.retention_days, 7);
        assert_eq!(config.remote.command_timeout, 1800);
    }

    #[test]
    fn partial_sections_override_only_given_keys() {
        let config: Config = r#"
github_owner = "someone"

[remote]
host = "example.org"
port = 2222

[sync]
retention_days = 3
"#
        .parse()
        .unwrap();

        assert_eq!(config.github_owner, "someone");
        assert_eq!(config.remote.host, "example.org");
        assert_eq!(config.remote.port, 2222);
        assert_eq!(config.remote.command, "trae-sync");
        assert_eq!(config.sync.retention_days, 3);
        assert_eq!(config.sync.git_timeout, 300);
    }

    #[test]
    fn tilde_paths_are_expanded() {
        let config: Config = r#"
[sync]
git_dir = "~/repos"
"#
        .parse()
        .unwrap();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.sync.git_dir, home.join("repos"));
        }
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let err = "storage_root = [".parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Deserialize(_)));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "platform = \"ec2\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.platform, "ec2");
    }

    #[test]
    fn storage_root_must_exist() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            storage_root: dir.path().join("missing"),
            ..Config::default()
        };
        assert!(matches!(
            config.require_storage_root(),
            Err(ConfigError::MissingStorageRoot(_))
        ));

        let config = Config {
            storage_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.require_storage_root().is_ok());
    }

    #[test]
    fn empty_known_repositories_are_rejected() {
        for toml in [
            "[discovery]\nknown_repositories = []\n",
            "[discovery]\nknown_repositories = [\"  \"]\n",
        ] {
            assert!(matches!(
                toml.parse::<Config>(),
                Err(ConfigError::EmptyKnownRepositories)
            ));
        }

        let config: Config = "[discovery]\nknown_repositories = [\"ourdaily\"]\n"
            .parse()
            .unwrap();
        assert_eq!(config.discovery.known_repositories, vec!["ourdaily"]);
    }

    #[test]
    fn blank_remote_host_is_rejected() {
        let remote = RemoteConfig::default();
        assert!(matches!(
            remote.require_host(),
            Err(ConfigError::MissingRemoteHost)
        ));
    }

    #[test]
    fn relative_session_db_resolves_against_storage_root() {
        let mut config = Config {
            storage_root: PathBuf::from("/trae"),
            ..Config::default()
        };
        assert!(config.session_db().is_none());

        config.monitor.session_db = Some(PathBuf::from("User/workspaceStorage/x/state.vscdb"));
        assert_eq!(
            config.session_db().unwrap(),
            PathBuf::from("/trae/User/workspaceStorage/x/state.vscdb")
        );
    }
}
