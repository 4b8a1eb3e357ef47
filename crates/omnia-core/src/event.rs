//! Typed events recorded against resources on phase transitions and
//! admission violations.

use crate::{ObjectMeta, impl_object};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recorded event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Event {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Machine-readable reason tag (e.g. `JobCreated`, `LicenseViolation`).
    pub reason: String,
    /// Event severity.
    #[serde(default)]
    pub severity: EventSeverity,
    /// Human-readable message.
    pub message: String,
    /// The record this event is about.
    pub involved: ObjectRef,
    /// When the event was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl_object!(Event, "Event");

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum EventSeverity {
    /// Expected lifecycle progress.
    #[default]
    Normal,
    /// Something requiring operator attention.
    Warning,
}

/// Reference to the record an event is attached to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Kind of the referenced record.
    pub kind: String,
    /// Namespace of the referenced record.
    pub namespace: String,
    /// Name of the referenced record.
    pub name: String,
    /// Uid of the referenced record, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
}

impl ObjectRef {
    /// Build a reference to a typed object.
    pub fn to_object<O: crate::Object>(object: &O) -> Self {
        let meta = object.metadata();
        Self {
            kind: O::KIND.to_string(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            uid: meta.uid,
        }
    }
}

/// Well-known event reasons emitted by the reconciler.
pub mod reason {
    /// The worker batch workload was created.
    pub const JOB_CREATED: &str = "JobCreated";
    /// Work items were pushed to the queue.
    pub const ITEMS_ENQUEUED: &str = "ItemsEnqueued";
    /// The job finished with every item passing.
    pub const JOB_SUCCEEDED: &str = "JobSucceeded";
    /// One or more work items failed.
    pub const TESTS_FAILED: &str = "TestsFailed";
    /// The batch workload itself failed.
    pub const WORKLOAD_FAILED: &str = "WorkloadFailed";
    /// The license denied a requested feature.
    pub const LICENSE_VIOLATION: &str = "LicenseViolation";
    /// The referenced source is missing or not Ready.
    pub const SOURCE_NOT_READY: &str = "SourceNotReady";
    /// Admission rejected a record.
    pub const ADMISSION_DENIED: &str = "AdmissionDenied";
}
