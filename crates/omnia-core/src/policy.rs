//! Session privacy policies.
//!
//! Policies form a hierarchy (global → workspace → agent); admission rejects
//! any child that is less restrictive than its resolved parent.

use crate::{ObjectMeta, impl_object};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A session privacy policy at one level of the hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct SessionPrivacyPolicy {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Policy definition.
    pub spec: SessionPrivacyPolicySpec,
    /// Observed state (parent-resolution errors surface here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionPrivacyPolicyStatus>,
}

impl_object!(SessionPrivacyPolicy, "SessionPrivacyPolicy");

/// Hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    /// Cluster-wide root of the hierarchy.
    Global,
    /// Applies to one workspace.
    Workspace,
    /// Applies to one agent within a workspace.
    Agent,
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Workspace => "workspace",
            Self::Agent => "agent",
        };
        f.write_str(s)
    }
}

/// Policy definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionPrivacyPolicySpec {
    /// Hierarchy level of this policy.
    pub level: PolicyLevel,

    /// Workspace this policy applies to; required for workspace and agent
    /// levels, resolved via the namespace workspace label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Session recording flags.
    #[serde(default)]
    pub recording: RecordingPolicy,

    /// Whether PII is redacted from recorded sessions.
    #[serde(default)]
    pub redact_pii: bool,

    /// Retention tiers in days.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Whether end users may opt out of recording entirely.
    #[serde(default)]
    pub allow_user_opt_out: bool,
}

impl Default for SessionPrivacyPolicySpec {
    fn default() -> Self {
        Self {
            level: PolicyLevel::Global,
            workspace: None,
            recording: RecordingPolicy::default(),
            redact_pii: false,
            retention: RetentionPolicy::default(),
            allow_user_opt_out: false,
        }
    }
}

/// Session recording flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPolicy {
    /// Record session transcripts at all.
    #[serde(default)]
    pub enabled: bool,
    /// Additionally record rich data (tool payloads, attachments).
    #[serde(default)]
    pub rich_data: bool,
}

/// Retention tiers in days. Lower is more restrictive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Days session metadata is kept.
    #[serde(default = "RetentionPolicy::default_days")]
    pub metadata_days: u32,
    /// Days transcript content is kept.
    #[serde(default = "RetentionPolicy::default_days")]
    pub content_days: u32,
    /// Days rich data is kept.
    #[serde(default = "RetentionPolicy::default_days")]
    pub rich_data_days: u32,
}

impl RetentionPolicy {
    fn default_days() -> u32 {
        90
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            metadata_days: Self::default_days(),
            content_days: Self::default_days(),
            rich_data_days: Self::default_days(),
        }
    }
}

/// Observed state of a policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionPrivacyPolicyStatus {
    /// `Active` or `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Detail for the Error phase (e.g. missing parent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
