//! ArenaSource: a polled content source producing versioned artefacts.

use crate::{ObjectMeta, impl_object};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A content source (git repository, OCI image, or config map) that is
/// polled independently; ArenaJobs only consume its Ready artefact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ArenaSource {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ArenaSourceSpec,
    /// Observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ArenaSourceStatus>,
}

impl_object!(ArenaSource, "ArenaSource");

impl ArenaSource {
    /// Returns the artefact only when the source is Ready and carries one.
    pub fn ready_artifact(&self) -> Option<&SourceArtifact> {
        let status = self.status.as_ref()?;
        if status.phase != SourcePhase::Ready {
            return None;
        }
        status.artifact.as_ref()
    }
}

/// Backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Git repository.
    Git,
    /// OCI registry image.
    Oci,
    /// Config map in the state store.
    ConfigMap,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Oci => "oci",
            Self::ConfigMap => "configmap",
        };
        f.write_str(s)
    }
}

/// Desired state of an [`ArenaSource`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArenaSourceSpec {
    /// Backend selector; the matching backend block must be set.
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Git backend coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceSpec>,

    /// OCI backend coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci: Option<OciSourceSpec>,

    /// ConfigMap backend coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSourceSpec>,

    /// Seconds between revision polls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval_seconds: Option<u64>,
}

impl Default for ArenaSourceSpec {
    fn default() -> Self {
        Self {
            source_type: SourceType::ConfigMap,
            git: None,
            oci: None,
            config_map: None,
            sync_interval_seconds: None,
        }
    }
}

/// Git backend coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceSpec {
    /// Clone URL (https or ssh).
    pub url: String,
    /// Branch to check out; mutually exclusive with `tag` and `commit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Tag to check out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Commit sha to check out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Optional sub-path inside the repository to select.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Authentication material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<GitAuthSpec>,
}

/// Git authentication: HTTPS basic credentials or an SSH private key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthSpec {
    /// HTTPS basic credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<GitBasicAuth>,
    /// SSH key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<GitSshAuth>,
}

/// HTTPS basic credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitBasicAuth {
    /// Username.
    pub username: String,
    /// Password or personal access token.
    pub password: String,
}

/// SSH key material for git clones.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitSshAuth {
    /// Path to the private key on the operator's filesystem.
    pub private_key_path: String,
    /// Optional key passphrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Optional known-hosts file enabling host-key verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<String>,
}

/// OCI backend coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OciSourceSpec {
    /// Image reference: `oci://host/path:tag` or `oci://host/path@digest`.
    pub image: String,
    /// Optional registry basic credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<GitBasicAuth>,
}

/// ConfigMap backend coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSourceSpec {
    /// Name of the config map in the source's namespace.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle phase of an [`ArenaSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SourcePhase {
    /// Declared but not yet fetched.
    Pending,
    /// A fetch is in flight.
    Fetching,
    /// An artefact is available.
    Ready,
    /// The last fetch failed.
    Error,
}

impl fmt::Display for SourcePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Fetching => "Fetching",
            Self::Ready => "Ready",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Observed state of an [`ArenaSource`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArenaSourceStatus {
    /// Current phase.
    pub phase: SourcePhase,
    /// The fetched artefact, set when Ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<SourceArtifact>,
    /// Human-readable detail for the Error phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A fetched, content-addressed artefact on shared storage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceArtifact {
    /// Bundle URL workers download (tarball or directory).
    pub url: String,
    /// Relative content path under the workspace content volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    /// Backend revision string (e.g. `main@sha1:0123abcd4567`).
    pub version: String,
    /// Content checksum (`sha256:` prefixed hex).
    pub checksum: String,
    /// Artefact size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last-modified timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}
