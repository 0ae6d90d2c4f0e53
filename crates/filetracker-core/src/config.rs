//! Tracker configuration
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! directory: /home/user/watched
//! check_frequency: 10        # seconds between scan cycles
//! http_port: 9000
//! osquery:
//!   binary: osqueryi
//!   timeout_secs: 10
//! storage:
//!   backend: sled            # or "memory"
//!   path: ./data/logs
//! executor:
//!   command_timeout_secs: 60 # 0 disables the bound
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollerSettings;

/// Default config file name, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_HTTP_PORT: u16 = 9000;
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_OSQUERY_SOCKET: &str = "/var/osquery/osquery.em";

/// Characters allowed in the watch directory; it is embedded in query text
const DIRECTORY_PATTERN: &str = r"^[a-zA-Z0-9/_-]+$";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("error loading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for [`TrackerConfig`]
    #[error("error parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field failed validation
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Watch directory; events are selected by path prefix
    pub directory: String,

    /// Seconds between scan cycles
    pub check_frequency: u64,

    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub osquery: OsqueryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub poller: PollerConfig,
}

/// osquery shell invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsqueryConfig {
    #[serde(default = "default_osquery_binary")]
    pub binary: PathBuf,

    /// Extra flags passed before `--json`
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Extension socket of the running `osqueryd`; `null` runs a standalone shell
    #[serde(default = "default_osquery_socket")]
    pub socket_path: Option<PathBuf>,

    #[serde(default = "default_osquery_timeout")]
    pub timeout_secs: u64,
}

impl OsqueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OsqueryConfig {
    fn default() -> Self {
        Self {
            binary: default_osquery_binary(),
            extra_args: Vec::new(),
            socket_path: default_osquery_socket(),
            timeout_secs: default_osquery_timeout(),
        }
    }
}

/// Which log store backs the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-command bound in seconds; 0 lets commands run indefinitely
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Seconds between poller heartbeats; defaults to `check_frequency`
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_osquery_binary() -> PathBuf {
    PathBuf::from("osqueryi")
}

fn default_osquery_socket() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_OSQUERY_SOCKET))
}

fn default_osquery_timeout() -> u64 {
    10
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/logs")
}

fn default_command_timeout() -> u64 {
    60
}

impl TrackerConfig {
    /// Read, parse and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pattern = Regex::new(DIRECTORY_PATTERN)
            .map_err(|e| ConfigError::invalid("directory", e.to_string()))?;
        if !pattern.is_match(&self.directory) {
            return Err(ConfigError::invalid(
                "directory",
                "invalid directory format (allowed: letters, digits, '/', '_', '-')",
            ));
        }

        if self.check_frequency < 1 {
            return Err(ConfigError::invalid("check_frequency", "must be at least 1"));
        }

        if self.osquery.timeout_secs < 1 {
            return Err(ConfigError::invalid("osquery.timeout_secs", "must be at least 1"));
        }

        if self.poller.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::invalid(
                "poller.heartbeat_interval_secs",
                "must be at least 1",
            ));
        }

        if let Some(secs) = self.poller.heartbeat_interval_secs {
            let threshold = self.poller_settings().liveness_threshold().as_secs();
            if secs >= threshold {
                return Err(ConfigError::invalid(
                    "poller.heartbeat_interval_secs",
                    format!("must be below the liveness threshold of {threshold}s"),
                ));
            }
        }

        Ok(())
    }

    pub fn check_frequency(&self) -> Duration {
        Duration::from_secs(self.check_frequency)
    }

    pub fn poller_settings(&self) -> PollerSettings {
        let settings = PollerSettings::new(self.check_frequency());
        match self.poller.heartbeat_interval_secs {
            Some(secs) => settings.with_heartbeat_interval(Duration::from_secs(secs)),
            None => settings,
        }
    }

    /// `host:port` for the HTTP listener
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
directory: "/tmp"
check_frequency: 10
osquery:
  binary: /usr/local/bin/osqueryi
"#;

    #[test]
    fn test_load_valid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.directory, "/tmp");
        assert_eq!(config.check_frequency, 10);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.http_addr(), "0.0.0.0:9000");
        assert_eq!(config.osquery.binary, PathBuf::from("/usr/local/bin/osqueryi"));
        assert_eq!(config.osquery.timeout(), Duration::from_secs(10));
        assert_eq!(
            config.osquery.socket_path,
            Some(PathBuf::from(DEFAULT_OSQUERY_SOCKET))
        );
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.executor.command_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_file() {
        let err = TrackerConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_rejects_quoted_directory() {
        let err = TrackerConfig::from_yaml_str(
            "directory: \"/tmp/it's\"\ncheck_frequency: 10\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "directory", .. }));
    }

    #[test]
    fn test_rejects_zero_frequency() {
        let err = TrackerConfig::from_yaml_str("directory: /tmp\ncheck_frequency: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "check_frequency", .. }));
    }

    #[test]
    fn test_rejects_heartbeat_past_liveness_threshold() {
        let err = TrackerConfig::from_yaml_str(
            "directory: /tmp\ncheck_frequency: 5\npoller:\n  heartbeat_interval_secs: 60\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "poller.heartbeat_interval_secs", .. }
        ));

        let err = TrackerConfig::from_yaml_str(
            "directory: /tmp\ncheck_frequency: 5\npoller:\n  heartbeat_interval_secs: 35\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let config = TrackerConfig::from_yaml_str(
            "directory: /tmp\ncheck_frequency: 5\npoller:\n  heartbeat_interval_secs: 34\n",
        )
        .unwrap();
        assert_eq!(config.poller_settings().heartbeat_interval(), Duration::from_secs(34));
    }

    #[test]
    fn test_missing_required_field() {
        let err = TrackerConfig::from_yaml_str("directory: /tmp\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_optional_sections() {
        let config = TrackerConfig::from_yaml_str(
            r#"
directory: /srv/data
check_frequency: 5
http_port: 8088
osquery:
  socket_path: null
storage:
  backend: memory
executor:
  command_timeout_secs: 0
poller:
  heartbeat_interval_secs: 2
"#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.executor.command_timeout(), None);
        assert_eq!(config.http_port, 8088);
        assert_eq!(config.osquery.socket_path, None);

        let settings = config.poller_settings();
        assert_eq!(settings.check_frequency(), Duration::from_secs(5));
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(2));
    }
}
