//! omnia-source
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Uniform interface over three content-source backends (git, OCI registry,
//! config map), each producing a content-addressed artefact on local scratch
//! storage. Backends share nothing beyond the [`SourceFetcher`] trait; none
//! mutate the consumer's workspace, and all honour a fetch timeout.

/// ConfigMap-backed fetcher.
pub mod configmap;
/// Git-backed fetcher.
pub mod git;
/// OCI-registry-backed fetcher.
pub mod oci;

pub use configmap::ConfigMapFetcher;
pub use git::GitFetcher;
pub use oci::OciFetcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omnia_core::SourceType;
use omnia_error::ErrorCode;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Artefact
// ---------------------------------------------------------------------------

/// A fetched, content-addressed artefact on scratch storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Location on scratch storage (a directory or tarball).
    pub path: PathBuf,
    /// Backend revision string (e.g. `main@sha1:0123abcd4567`).
    pub revision: String,
    /// `sha256:`-prefixed content checksum.
    pub checksum: String,
    /// Total size in bytes.
    pub size: u64,
    /// Last-modified timestamp.
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from source fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Filesystem failure on scratch storage.
    #[error("source io failure at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An external command (git) failed.
    #[error("{command} failed: {detail}")]
    Command {
        /// The command that failed.
        command: String,
        /// Captured stderr or exit detail.
        detail: String,
    },

    /// The fetch exceeded its timeout.
    #[error("fetch timed out after {}s", timeout.as_secs())]
    Timeout {
        /// The configured timeout.
        timeout: Duration,
    },

    /// HTTP transport or status failure against a registry.
    #[error("registry request failed: {detail}")]
    Http {
        /// Transport detail.
        detail: String,
    },

    /// The declared coordinates are malformed.
    #[error("invalid source reference '{reference}': {detail}")]
    InvalidReference {
        /// The malformed reference.
        reference: String,
        /// What is wrong with it.
        detail: String,
    },

    /// An archive entry attempted to escape the extraction root.
    #[error("archive entry '{entry}' escapes the extraction root")]
    Escape {
        /// The offending entry path.
        entry: String,
    },

    /// A referenced store record is missing.
    #[error("referenced {kind} '{name}' not found")]
    Missing {
        /// Kind of the missing record.
        kind: String,
        /// Name of the missing record.
        name: String,
    },

    /// State store failure.
    #[error(transparent)]
    Store(#[from] omnia_store::StoreError),
}

impl SourceError {
    /// Stable error code for conditions and events.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Escape { .. } => ErrorCode::ArchiveEscape,
            Self::Store(err) => err.code(),
            _ => ErrorCode::SourceFetchFailed,
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// SourceFetcher trait
// ---------------------------------------------------------------------------

/// One content-source backend.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Backend discriminator.
    fn source_type(&self) -> SourceType;

    /// Resolve the latest upstream revision without fetching content.
    async fn latest_revision(&self) -> Result<String, SourceError>;

    /// Fetch the given revision onto scratch storage.
    async fn fetch(&self, revision: &str) -> Result<Artifact, SourceError>;
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// `sha256:`-prefixed hex digest of one file.
pub fn file_checksum(path: &Path) -> Result<String, SourceError> {
    let bytes = std::fs::read(path).map_err(|e| SourceError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// `sha256:`-prefixed recursive digest of a directory: relative paths are
/// walked in sorted order, and each path and its content feed the hash.
pub fn dir_checksum(root: &Path) -> Result<String, SourceError> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| SourceError::Io {
            path: root.display().to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        let bytes = std::fs::read(entry.path()).map_err(|e| SourceError::io(entry.path(), e))?;
        hasher.update(&bytes);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Total size in bytes of all files under a directory.
pub fn dir_size(root: &Path) -> Result<u64, SourceError> {
    let mut total = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| SourceError::Io {
            path: root.display().to_string(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            total += entry
                .metadata()
                .map_err(|e| SourceError::Io {
                    path: root.display().to_string(),
                    source: e.into(),
                })?
                .len();
        }
    }
    Ok(total)
}

/// Join `candidate` onto `root`, rejecting any traversal outside it.
///
/// Rejects absolute paths, `..` components, and anything else that would
/// resolve outside the root.
pub fn secure_join(root: &Path, candidate: &Path) -> Result<PathBuf, SourceError> {
    let mut joined = root.to_path_buf();
    for component in candidate.components() {
        match component {
            std::path::Component::Normal(part) => joined.push(part),
            std::path::Component::CurDir => {}
            _ => {
                return Err(SourceError::Escape {
                    entry: candidate.display().to_string(),
                });
            }
        }
    }
    Ok(joined)
}
