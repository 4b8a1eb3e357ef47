//! Status conditions: the durable error surface of a reconciled record.
//!
//! Conditions are upserted by type; a condition's transition time only moves
//! when its status flips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known condition types written by the ArenaJob reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// Overall readiness; `False` with reason `LicenseViolation` on a
    /// license denial.
    Ready,
    /// Whether the referenced source is Ready with an artefact.
    SourceValid,
    /// Whether the child batch workload has been created.
    JobCreated,
    /// Whether workers are still making progress.
    Progressing,
}

impl ConditionType {
    /// Stable string form used in serialised status payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::SourceValid => "SourceValid",
            Self::JobCreated => "JobCreated",
            Self::Progressing => "Progressing",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The controller cannot determine the condition.
    Unknown,
}

/// One entry in a record's condition list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type; unique within the list.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Current status.
    pub status: ConditionStatus,
    /// Machine-readable reason (a stable error code or transition tag).
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
    /// Generation of the spec this condition was derived from.
    #[serde(default)]
    pub observed_generation: i64,
    /// When `status` last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Build a condition stamped with the current time.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Insert or replace `next` in `conditions`, keyed by condition type.
///
/// When the existing entry has the same status, its transition time is kept
/// so that conditions only "move" when they actually flip.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut next: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == next.condition_type)
    {
        if existing.status == next.status {
            next.last_transition_time = existing.last_transition_time;
        }
        *existing = next;
    } else {
        conditions.push(next);
    }
}

/// Find a condition by type.
pub fn find_condition(
    conditions: &[Condition],
    condition_type: ConditionType,
) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}
