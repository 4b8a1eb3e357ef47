//! Workload primitives the reconciler creates and observes: batch workloads
//! with worker pod templates, config maps, secrets, volume claims, leader
//! leases, and agent runtimes.

use crate::condition::ConditionStatus;
use crate::{ObjectMeta, impl_object};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// BatchWorkload
// ---------------------------------------------------------------------------

/// A run-to-completion batch of worker pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct BatchWorkload {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: BatchWorkloadSpec,
    /// Observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchWorkloadStatus>,
}

impl_object!(BatchWorkload, "BatchWorkload");

impl BatchWorkload {
    /// Looks up a workload condition by type, returning it only when `True`.
    pub fn true_condition(&self, ty: WorkloadConditionType) -> Option<&WorkloadCondition> {
        self.status.as_ref()?.conditions.iter().find(|c| {
            c.condition_type == ty && c.status == ConditionStatus::True
        })
    }
}

/// Desired state of a [`BatchWorkload`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchWorkloadSpec {
    /// Pods running concurrently.
    pub parallelism: i32,
    /// Pods that must finish successfully.
    pub completions: i32,
    /// Restart behaviour for worker pods.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Seconds after finish before the workload is garbage-collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,
    /// Template stamped onto every worker pod.
    pub template: WorkerPodTemplate,
}

/// Pod restart behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum RestartPolicy {
    /// Pods are never restarted; failures count against the workload.
    #[default]
    Never,
    /// Pods restart in place on failure.
    OnFailure,
}

/// Template for worker pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPodTemplate {
    /// Containers; the first is the worker.
    pub containers: Vec<ContainerSpec>,
    /// Pod volumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,
    /// Pod security settings.
    #[serde(default)]
    pub security: PodSecurity,
    /// Service account, set only when a resolved provider uses workload
    /// identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

/// One container in a worker pod.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// An environment variable, by value or by secret reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Literal value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Indirect value source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Literal-value variable.
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Secret-backed variable.
    pub fn from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: crate::provider::SecretKeyRef {
                    name: secret.into(),
                    key: key.into(),
                },
            }),
        }
    }
}

/// Indirect environment-variable source.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Secret key reference.
    pub secret_key_ref: crate::provider::SecretKeyRef,
}

/// A volume mount inside a container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name this mount refers to.
    pub name: String,
    /// Mount point inside the container.
    pub mount_path: String,
    /// Optional sub-path inside the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// A pod volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Volume name, referenced by mounts.
    pub name: String,
    /// Backing source.
    pub source: VolumeSource,
}

/// Backing source of a pod volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// Pod-lifetime scratch space.
    EmptyDir,
    /// Projects a config map's data as files.
    ConfigMap {
        /// Config map name.
        name: String,
    },
    /// Mounts a persistent volume claim.
    Claim {
        /// Claim name.
        claim_name: String,
        /// Mount read-only.
        read_only: bool,
    },
    /// Mounts a shared network filesystem export.
    SharedFilesystem {
        /// Server host.
        server: String,
        /// Export path.
        path: String,
    },
}

/// Pod security settings applied to every worker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurity {
    /// Numeric user id the container runs as.
    pub run_as_user: i64,
    /// Refuse to start as root.
    pub run_as_non_root: bool,
    /// Mount the root filesystem read-only.
    pub read_only_root_filesystem: bool,
    /// Drop all Linux capabilities.
    pub drop_all_capabilities: bool,
    /// Forbid privilege escalation.
    pub allow_privilege_escalation: bool,
    /// Seccomp profile name.
    pub seccomp_profile: String,
}

impl Default for PodSecurity {
    fn default() -> Self {
        Self {
            run_as_user: 65532,
            run_as_non_root: true,
            read_only_root_filesystem: true,
            drop_all_capabilities: true,
            allow_privilege_escalation: false,
            seccomp_profile: "RuntimeDefault".to_string(),
        }
    }
}

/// Observed state of a [`BatchWorkload`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchWorkloadStatus {
    /// Pods currently running.
    #[serde(default)]
    pub active: i32,
    /// Pods finished successfully.
    #[serde(default)]
    pub succeeded: i32,
    /// Pods finished in failure.
    #[serde(default)]
    pub failed: i32,
    /// Workload conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkloadCondition>,
    /// When the first pod started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the workload finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Workload condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkloadConditionType {
    /// All completions finished successfully.
    Complete,
    /// The workload gave up (e.g. backoff limit hit).
    Failed,
}

/// One workload condition entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCondition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: WorkloadConditionType,
    /// Condition status.
    pub status: ConditionStatus,
    /// Machine-readable reason.
    #[serde(default)]
    pub reason: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// ConfigMap / Secret
// ---------------------------------------------------------------------------

/// A map of configuration files projected into pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ConfigMap {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Text entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Binary entries, base64-encoded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, String>,
}

impl_object!(ConfigMap, "ConfigMap");

/// Opaque secret material.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Secret {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Secret entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl_object!(Secret, "Secret");

/// Well-known secret key carrying the queue password.
pub const QUEUE_PASSWORD_KEY: &str = "redis-password";

// ---------------------------------------------------------------------------
// VolumeClaim
// ---------------------------------------------------------------------------

/// A persistent volume claim for shared workspace content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct VolumeClaim {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Claim parameters.
    pub spec: VolumeClaimSpec,
}

impl_object!(VolumeClaim, "VolumeClaim");

/// Claim parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    /// Requested capacity (e.g. `"10Gi"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    /// Whether many pods may mount the claim read-only.
    #[serde(default)]
    pub read_only_many: bool,
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Leader-election lease.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Lease {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Lease state.
    pub spec: LeaseSpec,
}

impl_object!(Lease, "Lease");

/// Lease state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    /// Identity of the current holder.
    pub holder: String,
    /// When the lease was first acquired by the holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    /// When the holder last renewed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<DateTime<Utc>>,
    /// Seconds after `renewed_at` the lease expires.
    #[serde(default)]
    pub lease_duration_seconds: u64,
}

impl LeaseSpec {
    /// Returns `true` when the lease has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.renewed_at {
            Some(renewed) => {
                now - renewed > chrono::Duration::seconds(self.lease_duration_seconds as i64)
            }
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentRuntime
// ---------------------------------------------------------------------------

/// A pre-deployed inference-serving runtime targeted by fleet-mode jobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct AgentRuntime {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: AgentRuntimeSpec,
    /// Observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentRuntimeStatus>,
}

impl_object!(AgentRuntime, "AgentRuntime");

/// AgentRuntime desired state (only the fields the dispatcher consumes).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeSpec {
    /// Serving replica count.
    #[serde(default)]
    pub replicas: i32,
    /// Serving image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// AgentRuntime observed state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeStatus {
    /// Serving endpoint, `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}
