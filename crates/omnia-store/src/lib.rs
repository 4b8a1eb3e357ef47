//! omnia-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Typed read/list/watch/get/create/update/patch over the cluster state
//! store. Optimistic concurrency rides on an opaque `resourceVersion`;
//! server-side filtering covers namespace and label selectors. Admission
//! hooks run synchronously before any write becomes durable.

/// Typed API handle over a raw store.
pub mod api;
/// In-memory reference store.
pub mod memory;

pub use api::Api;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use omnia_core::{Object, ObjectMeta};
use omnia_error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RawObject
// ---------------------------------------------------------------------------

/// Untyped record as held by the store: the kind tag, the authoritative
/// metadata, and the full serialised content (which embeds a copy of the
/// metadata).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawObject {
    /// Kind discriminator.
    pub kind: String,
    /// Authoritative metadata.
    pub metadata: ObjectMeta,
    /// Full serialised object.
    pub content: serde_json::Value,
}

impl RawObject {
    /// Convert a typed object into its raw form.
    pub fn from_typed<K: Object>(object: &K) -> Result<Self, StoreError> {
        let content = serde_json::to_value(object).map_err(StoreError::serde)?;
        Ok(Self {
            kind: K::KIND.to_string(),
            metadata: object.metadata().clone(),
            content,
        })
    }

    /// Convert back into a typed object, with the authoritative metadata
    /// written through.
    pub fn to_typed<K: Object>(&self) -> Result<K, StoreError> {
        let mut content = self.content.clone();
        if let Some(map) = content.as_object_mut() {
            map.insert(
                "metadata".to_string(),
                serde_json::to_value(&self.metadata).map_err(StoreError::serde)?,
            );
        }
        serde_json::from_value(content).map_err(StoreError::serde)
    }

    /// The object's spec payload, when present.
    pub fn spec(&self) -> Option<&serde_json::Value> {
        self.content.get("spec")
    }

    /// The object's status payload, when present.
    pub fn status(&self) -> Option<&serde_json::Value> {
        self.content.get("status")
    }

    /// `namespace/name` key.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller's resourceVersion is stale.
    #[error("conflict on {kind} {key}: stale resourceVersion {observed:?}")]
    Conflict {
        /// Kind of the contested record.
        kind: String,
        /// `namespace/name` of the contested record.
        key: String,
        /// The resourceVersion the caller presented.
        observed: Option<String>,
    },

    /// The addressed record does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing record.
        kind: String,
        /// `namespace/name` of the missing record.
        key: String,
    },

    /// A record with the same key already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the duplicate record.
        kind: String,
        /// `namespace/name` of the duplicate record.
        key: String,
    },

    /// An admission hook rejected the write.
    #[error("admission denied for {kind} {key}: {message}")]
    AdmissionDenied {
        /// Kind of the rejected record.
        kind: String,
        /// `namespace/name` of the rejected record.
        key: String,
        /// Name of the violated rule.
        rule: String,
        /// Human-readable denial detail.
        message: String,
    },

    /// Serialisation failure crossing the typed/raw boundary.
    #[error("serialization failed: {0}")]
    Serde(#[source] serde_json::Error),
}

impl StoreError {
    fn serde(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }

    /// Stable error code for conditions and events.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::StoreConflict,
            Self::NotFound { .. } => ErrorCode::StoreNotFound,
            Self::AlreadyExists { .. } => ErrorCode::StoreAlreadyExists,
            Self::AdmissionDenied { .. } => ErrorCode::AdmissionDenied,
            Self::Serde(_) => ErrorCode::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Label selection
// ---------------------------------------------------------------------------

/// Equality-based label selector; every pair must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    /// Required label pairs.
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching everything.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector requiring one label pair.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_labels: BTreeMap::from([(key.into(), value.into())]),
        }
    }

    /// Returns `true` when `labels` satisfies every required pair.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

/// Change-event flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    /// A record was created.
    Added,
    /// A record's spec or status changed.
    Modified,
    /// A record was deleted.
    Deleted,
}

/// One change event on a watched kind.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Flavour of the change.
    pub event_type: WatchEventType,
    /// The record after the change (before, for deletions).
    pub object: RawObject,
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Write intent presented to admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOperation {
    /// A create intent.
    Create,
    /// An update intent.
    Update,
    /// A delete intent.
    Delete,
}

/// A create/update/delete intent under review.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Operation flavour.
    pub operation: AdmissionOperation,
    /// Kind under review.
    pub kind: String,
    /// The incoming record (absent for deletes).
    pub object: Option<RawObject>,
    /// The stored record being replaced or deleted.
    pub old_object: Option<RawObject>,
}

/// Outcome of an admission review.
#[derive(Debug, Clone, Default)]
pub struct AdmissionResponse {
    /// Whether the write may proceed.
    pub allowed: bool,
    /// Advisory messages surfaced to the caller.
    pub warnings: Vec<String>,
    /// Denial detail when not allowed.
    pub denial: Option<AdmissionDenial>,
}

impl AdmissionResponse {
    /// An allow verdict.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    /// An allow verdict carrying warnings.
    pub fn allow_with_warnings(warnings: Vec<String>) -> Self {
        Self {
            allowed: true,
            warnings,
            ..Self::default()
        }
    }

    /// A deny verdict.
    pub fn deny(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            warnings: Vec::new(),
            denial: Some(AdmissionDenial {
                rule: rule.into(),
                message: message.into(),
                upgrade_hint: None,
            }),
        }
    }

    /// Attach an upgrade hint to a denial. The hint is also surfaced as a
    /// warning so callers that only read warnings still see it.
    pub fn with_upgrade_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        if let Some(denial) = self.denial.as_mut() {
            denial.upgrade_hint = Some(hint.clone());
        }
        self.warnings.push(hint);
        self
    }
}

/// Structured denial: the violated rule plus an optional upgrade hint for
/// license-related denials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDenial {
    /// Name of the violated rule.
    pub rule: String,
    /// Human-readable detail.
    pub message: String,
    /// Upgrade hint for license denials.
    pub upgrade_hint: Option<String>,
}

/// Synchronous gate run by the store before a write becomes durable.
#[async_trait]
pub trait AdmissionHook: Send + Sync {
    /// Review one write intent. `store` is the reviewing store itself, for
    /// hierarchical lookups.
    async fn review(&self, store: &dyn Store, request: &AdmissionRequest) -> AdmissionResponse;
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Raw record store. Typed access goes through [`Api`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one record.
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RawObject>, StoreError>;

    /// List records of a kind, optionally restricted to a namespace,
    /// filtered by label selector.
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<RawObject>, StoreError>;

    /// Create a record. Assigns uid, resourceVersion, creation timestamp,
    /// and generation 1.
    async fn create(&self, object: RawObject) -> Result<RawObject, StoreError>;

    /// Replace a record's spec. Requires the caller's resourceVersion to
    /// match; bumps the generation when the spec payload changed. The stored
    /// status is preserved.
    async fn update(&self, object: RawObject) -> Result<RawObject, StoreError>;

    /// Replace a record's status. Requires the caller's resourceVersion to
    /// match; never bumps the generation. The stored spec is preserved.
    async fn update_status(&self, object: RawObject) -> Result<RawObject, StoreError>;

    /// Apply a JSON merge patch to a record's content. Bypasses the
    /// caller-side resourceVersion check (the store serialises patches).
    async fn patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<RawObject, StoreError>;

    /// Delete a record and cascade to records it controls.
    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Subscribe to change events for a kind.
    fn watch(&self, kind: &str) -> BoxStream<'static, WatchEvent>;
}

/// Apply an RFC 7396 JSON merge patch.
pub fn json_merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(serde_json::Map::new());
            }
            let target_map = target.as_object_mut().unwrap();
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    json_merge_patch(
                        target_map
                            .entry(key.clone())
                            .or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        other => *target = other.clone(),
    }
}
