//! omnia-queue
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Durable, at-least-once work queue keyed by job id: batch push, lease-based
//! pop with visibility timeout, ack, nack with a retry budget, and a terminal
//! results stream per job. Job partitions are disjoint namespaces.

/// In-memory queue for tests and single-process deployments.
pub mod memory;
/// Redis-backed queue.
pub mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omnia_error::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Nack budget applied to items unless the builder overrides it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkItemStatus {
    /// Waiting to be leased.
    Pending,
    /// Leased by a worker; invisible until the lease expires.
    Leased,
    /// Terminal: processed with no failing checks.
    Done,
    /// Terminal: failing checks, or the retry budget was exhausted.
    Failed,
}

impl WorkItemStatus {
    /// Terminal states appear on the results stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Leased => "Leased",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One unit of worker execution: a (scenario, provider) pair, or a scenario
/// alone in fleet mode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Stable id derived from job name, scenario/provider, and index.
    /// Re-pushing the same id is a no-op.
    pub id: String,
    /// Owning job id (the queue partition).
    pub job_id: String,
    /// Scenario addressed by this item.
    pub scenario_id: String,
    /// Provider addressed by this item; empty in fleet mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Content bundle the worker downloads.
    pub bundle_url: String,
    /// Current attempt, starting at 1.
    pub attempt: u32,
    /// Nacks allowed before the item fails terminally.
    pub max_attempts: u32,
    /// Lifecycle state.
    pub status: WorkItemStatus,
    /// When the item was first enqueued.
    pub created_at: DateTime<Utc>,
}

/// Worker-reported outcome attached to an ack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    /// Checks that passed.
    pub passed: u32,
    /// Checks that failed. Any failure marks the item Failed.
    pub failed: u32,
    /// Free-form worker payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// One entry on a job's terminal results stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemResult {
    /// Item id.
    pub item_id: String,
    /// Scenario the item addressed.
    pub scenario_id: String,
    /// Provider the item addressed; absent in fleet mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Terminal status (`Done` or `Failed`).
    pub status: WorkItemStatus,
    /// Checks that passed, when the worker reported counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<u32>,
    /// Checks that failed, when the worker reported counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    /// Free-form worker payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue endpoint could not be reached.
    #[error("queue unreachable: {message}")]
    Unreachable {
        /// Transport-level detail.
        message: String,
    },

    /// The addressed item does not exist in the job partition.
    #[error("work item '{item_id}' not found in job '{job_id}'")]
    ItemNotFound {
        /// Partition job id.
        job_id: String,
        /// Missing item id.
        item_id: String,
    },

    /// An ack or nack arrived for an item that is not currently leased.
    #[error("work item '{item_id}' in job '{job_id}' is not leased")]
    NotLeased {
        /// Partition job id.
        job_id: String,
        /// Item id.
        item_id: String,
    },

    /// A stored record failed to decode.
    #[error("corrupt queue record: {0}")]
    Corrupt(#[source] serde_json::Error),
}

impl QueueError {
    /// Stable error code for conditions and events.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unreachable { .. } => ErrorCode::QueueUnreachable,
            Self::ItemNotFound { .. } => ErrorCode::QueueItemNotFound,
            Self::NotLeased { .. } => ErrorCode::QueueItemNotLeased,
            Self::Corrupt(_) => ErrorCode::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkQueue trait
// ---------------------------------------------------------------------------

/// Durable at-least-once work queue keyed by job id.
///
/// The reconciler pushes, workers lease/ack/nack, and the aggregator reads
/// results. Items survive reconciler restarts.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Push a batch of items into the job's partition, in order. Items whose
    /// id is already present are skipped; returns the number newly enqueued.
    async fn push(&self, job_id: &str, items: &[WorkItem]) -> Result<usize, QueueError>;

    /// Lease the next pending item for `visibility`. Expired leases are
    /// reclaimed first. Returns `None` when the partition has no pending
    /// items.
    async fn lease(
        &self,
        job_id: &str,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<WorkItem>, QueueError>;

    /// Terminally acknowledge a leased item with the worker's outcome. Any
    /// failing check marks the item `Failed`; otherwise it is `Done`.
    async fn ack(
        &self,
        job_id: &str,
        item_id: &str,
        outcome: ItemOutcome,
    ) -> Result<(), QueueError>;

    /// Negatively acknowledge a leased item. The item returns to pending
    /// with its attempt counter bumped, or fails terminally once the budget
    /// is exhausted.
    async fn nack(&self, job_id: &str, item_id: &str, reason: &str) -> Result<(), QueueError>;

    /// Snapshot of the job's terminal results stream.
    async fn results(&self, job_id: &str) -> Result<Vec<WorkItemResult>, QueueError>;
}

/// Derive the terminal status for an acked item from its outcome.
pub fn status_for_outcome(outcome: &ItemOutcome) -> WorkItemStatus {
    if outcome.failed > 0 {
        WorkItemStatus::Failed
    } else {
        WorkItemStatus::Done
    }
}
