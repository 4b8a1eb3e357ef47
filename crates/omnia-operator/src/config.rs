//! Operator configuration: TOML file plus `OMNIA_`-prefixed environment
//! overlay, with advisory warnings for questionable values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No queue endpoint: the operator runs on the in-memory queue.
    InMemoryQueue,
    /// A fetch timeout large enough to stall reconciles.
    LargeFetchTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// Leader election disabled with more than one expected replica.
    NoLeaderElection,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::InMemoryQueue => {
                write!(f, "no queue.addr configured; using the in-memory queue")
            }
            ConfigWarning::LargeFetchTimeout { secs } => {
                write!(f, "fetch_timeout_seconds is unusually large ({secs}s)")
            }
            ConfigWarning::NoLeaderElection => {
                write!(f, "leader election is disabled; run a single replica only")
            }
        }
    }
}

/// Work queue settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct QueueConfig {
    /// Queue address (`host:port`); empty selects the in-memory queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Queue password by value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Name of a secret whose `redis-password` key holds the password;
    /// takes precedence over `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<String>,
}

/// Shared network filesystem settings; when set, workers mount this export
/// instead of per-workspace volume claims.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SharedFilesystemConfig {
    /// Filesystem server host.
    pub server: String,
    /// Export path on the server.
    pub path: String,
}

/// Top-level operator settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace the operator's own records (lease, events) live in.
    pub namespace: String,
    /// Worker container image.
    pub worker_image: String,
    /// Service account for workload-identity workers.
    pub worker_service_account: String,
    /// Scratch directory for source fetches.
    pub scratch_dir: String,
    /// Root where fetched workspace content is materialised for the
    /// operator's own scenario enumeration.
    pub content_root: String,
    /// Per-fetch timeout in seconds.
    pub fetch_timeout_seconds: u64,
    /// Reconcile workers per controller.
    pub workers: usize,
    /// Mount workspace content volumes into worker pods.
    pub filesystem_mode: bool,
    /// Whether to run leader election.
    pub leader_election: bool,
    /// Leader lease duration in seconds.
    pub lease_duration_seconds: u64,
    /// License token (`dev` bypasses licensing); empty runs open-core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_token: Option<String>,
    /// License token signing secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_signing_secret: Option<String>,
    /// Queue settings.
    pub queue: QueueConfig,
    /// Shared network filesystem, replacing per-workspace claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_filesystem: Option<SharedFilesystemConfig>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "omnia-system".to_string(),
            worker_image: "ghcr.io/altairalabs/arena-worker:latest".to_string(),
            worker_service_account: "arena-worker".to_string(),
            scratch_dir: "/var/run/omnia/scratch".to_string(),
            content_root: "/var/run/omnia/content".to_string(),
            fetch_timeout_seconds: 60,
            workers: 1,
            filesystem_mode: true,
            leader_election: true,
            lease_duration_seconds: 15,
            license_token: None,
            license_signing_secret: None,
            queue: QueueConfig::default(),
            shared_filesystem: None,
        }
    }
}

impl OperatorConfig {
    /// Load from a TOML file, then apply the environment overlay.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config: OperatorConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError {
                reason: e.to_string(),
            })?;
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the environment overlay; used when no file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overlay(&mut self) {
        if let Ok(addr) = std::env::var("OMNIA_QUEUE_ADDR") {
            if !addr.is_empty() {
                self.queue.addr = Some(addr);
            }
        }
        if let Ok(password) = std::env::var("OMNIA_QUEUE_PASSWORD") {
            if !password.is_empty() {
                self.queue.password = Some(password);
            }
        }
        if let Ok(token) = std::env::var("OMNIA_LICENSE_TOKEN") {
            if !token.is_empty() {
                self.license_token = Some(token);
            }
        }
        if let Ok(secret) = std::env::var("OMNIA_LICENSE_SIGNING_SECRET") {
            if !secret.is_empty() {
                self.license_signing_secret = Some(secret);
            }
        }
        if let Ok(image) = std::env::var("OMNIA_WORKER_IMAGE") {
            if !image.is_empty() {
                self.worker_image = image;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.workers == 0 {
            reasons.push("workers must be at least 1".to_string());
        }
        if self.fetch_timeout_seconds == 0 {
            reasons.push("fetch_timeout_seconds must be at least 1".to_string());
        }
        if self.lease_duration_seconds < 5 {
            reasons.push("lease_duration_seconds must be at least 5".to_string());
        }
        if self.worker_image.is_empty() {
            reasons.push("worker_image must be set".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Advisory warnings for the loaded settings.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.queue.addr.is_none() {
            warnings.push(ConfigWarning::InMemoryQueue);
        }
        if self.fetch_timeout_seconds > 600 {
            warnings.push(ConfigWarning::LargeFetchTimeout {
                secs: self.fetch_timeout_seconds,
            });
        }
        if !self.leader_election {
            warnings.push(ConfigWarning::NoLeaderElection);
        }
        warnings
    }

    /// The per-fetch timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(60));
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omnia.toml");
        std::fs::write(
            &path,
            r#"
worker_image = "registry.internal/arena-worker:v1"
fetch_timeout_seconds = 120
workers = 4

[queue]
addr = "redis.omnia-system:6379"
password_secret = "queue-auth"

[shared_filesystem]
server = "nfs.internal"
path = "/exports/omnia"
"#,
        )
        .unwrap();

        let config = OperatorConfig::load(&path).unwrap();
        assert_eq!(config.worker_image, "registry.internal/arena-worker:v1");
        assert_eq!(config.fetch_timeout_seconds, 120);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue.addr.as_deref(), Some("redis.omnia-system:6379"));
        assert_eq!(config.queue.password_secret.as_deref(), Some("queue-auth"));
        assert_eq!(config.shared_filesystem.unwrap().server, "nfs.internal");
        // Unset fields keep their defaults.
        assert_eq!(config.namespace, "omnia-system");
    }

    #[test]
    fn validation_rejects_zero_workers() {
        let config = OperatorConfig {
            workers: 0,
            ..OperatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn warnings_flag_memory_queue_and_no_leader() {
        let config = OperatorConfig {
            leader_election: false,
            ..OperatorConfig::default()
        };
        let warnings = config.warnings();
        assert!(warnings.contains(&ConfigWarning::InMemoryQueue));
        assert!(warnings.contains(&ConfigWarning::NoLeaderElection));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = OperatorConfig::load(Path::new("/nonexistent/omnia.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
