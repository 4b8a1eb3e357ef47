//! omnia-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The resource model shared by every Omnia component: object metadata,
//! the declared resource kinds (ArenaJob, ArenaSource, Provider, ...),
//! conditions, events, and the worker environment contract.
//!
//! If you only take one dependency, take this one.

/// Status conditions and upsert helpers.
pub mod condition;
/// Worker pod environment-variable contract.
pub mod env;
/// Typed events recorded against resources.
pub mod event;
/// ArenaJob spec and status.
pub mod job;
/// Well-known labels applied to child workloads.
pub mod labels;
/// Session privacy policies.
pub mod policy;
/// Provider and ToolRegistry definitions.
pub mod provider;
/// ArenaSource spec and status.
pub mod source;
/// Workload primitives: batch workloads, config maps, secrets, volume
/// claims, leases, agent runtimes.
pub mod workload;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use condition::{Condition, ConditionStatus, ConditionType, find_condition, upsert_condition};
pub use event::{Event, EventSeverity, ObjectRef, reason};
pub use job::{
    ArenaJob, ArenaJobSpec, ArenaJobStatus, ArenaJobType, ExecutionMode, FleetSpec, JobPhase,
    JobProgress, ProviderOverrideSelector, ResultSummary, ScenarioFilter, ScenarioResult,
    ScheduleSpec, ToolRegistrySelector,
};
pub use policy::{
    PolicyLevel, RecordingPolicy, RetentionPolicy, SessionPrivacyPolicy, SessionPrivacyPolicySpec,
    SessionPrivacyPolicyStatus,
};
pub use provider::{
    CredentialSpec, ModelDefaults, PlatformSpec, Provider, ProviderAuthSpec, ProviderSpec,
    SecretKeyRef, ToolDefinition, ToolRegistry, ToolRegistrySpec,
};
pub use source::{
    ArenaSource, ArenaSourceSpec, ArenaSourceStatus, ConfigMapSourceSpec, GitAuthSpec,
    GitBasicAuth, GitSourceSpec, GitSshAuth, OciSourceSpec, SourceArtifact, SourcePhase,
    SourceType,
};
pub use workload::{
    AgentRuntime, AgentRuntimeSpec, AgentRuntimeStatus, BatchWorkload, BatchWorkloadSpec,
    BatchWorkloadStatus, ConfigMap, ContainerSpec, EnvVar, EnvVarSource, Lease, LeaseSpec,
    PodSecurity, QUEUE_PASSWORD_KEY, RestartPolicy, Secret, VolumeClaim, VolumeClaimSpec,
    VolumeMount, VolumeSource, VolumeSpec, WorkerPodTemplate, WorkloadCondition,
    WorkloadConditionType,
};

// ---------------------------------------------------------------------------
// ObjectMeta
// ---------------------------------------------------------------------------

/// Metadata common to every record in the cluster state store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Record name, unique within (kind, namespace).
    pub name: String,

    /// Namespace the record lives in.
    #[serde(default)]
    pub namespace: String,

    /// Store-assigned unique id, set on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Opaque optimistic-concurrency token, bumped on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Spec generation, bumped when the spec payload changes.
    #[serde(default)]
    pub generation: i64,

    /// Free-form labels used for selection.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Owners of this record; deletion of a controller owner cascades.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Store-assigned creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a namespaced record.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if this record is owned (with `controller = true`)
    /// by the given uid.
    pub fn is_controlled_by(&self, owner_uid: Uuid) -> bool {
        self.owner_references
            .iter()
            .any(|r| r.controller && r.uid == Some(owner_uid))
    }
}

/// Reference from a child record to its owner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Owner kind (e.g. `"ArenaJob"`).
    pub kind: String,
    /// Owner name.
    pub name: String,
    /// Owner uid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    /// Whether the owner manages the child's lifecycle.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Build a controller owner reference to the given object.
    pub fn controller_of<O: Object>(owner: &O) -> Self {
        Self {
            kind: O::KIND.to_string(),
            name: owner.metadata().name.clone(),
            uid: owner.metadata().uid,
            controller: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Object trait
// ---------------------------------------------------------------------------

/// A typed record kind stored in the cluster state store.
pub trait Object: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable kind discriminator (e.g. `"ArenaJob"`).
    const KIND: &'static str;

    /// Shared metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable access to shared metadata.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Convenience: `namespace/name` key for logs and maps.
    fn object_key(&self) -> String {
        let meta = self.metadata();
        format!("{}/{}", meta.namespace, meta.name)
    }
}

/// Implements [`Object`] for a kind with the conventional
/// `{ metadata, spec, status }` shape.
#[macro_export]
macro_rules! impl_object {
    ($ty:ty, $kind:literal) => {
        impl $crate::Object for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &$crate::ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut $crate::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_meta_defaults() {
        let meta = ObjectMeta::named("prod", "smoke");
        assert_eq!(meta.namespace, "prod");
        assert_eq!(meta.name, "smoke");
        assert_eq!(meta.generation, 0);
        assert!(meta.uid.is_none());
        assert!(meta.owner_references.is_empty());
    }

    #[test]
    fn controlled_by_matches_controller_refs_only() {
        let uid = Uuid::new_v4();
        let mut meta = ObjectMeta::named("prod", "child");
        meta.owner_references.push(OwnerReference {
            kind: "ArenaJob".into(),
            name: "parent".into(),
            uid: Some(uid),
            controller: false,
        });
        assert!(!meta.is_controlled_by(uid));

        meta.owner_references[0].controller = true;
        assert!(meta.is_controlled_by(uid));
        assert!(!meta.is_controlled_by(Uuid::new_v4()));
    }

    #[test]
    fn meta_serde_skips_empty_fields() {
        let meta = ObjectMeta::named("prod", "smoke");
        let json = serde_json::to_value(&meta).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("labels"));
        assert!(!obj.contains_key("ownerReferences"));
        assert!(!obj.contains_key("uid"));
        assert_eq!(obj["generation"], 0);
    }
}
