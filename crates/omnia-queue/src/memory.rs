//! In-memory work queue for tests and single-process deployments.

use crate::{
    ItemOutcome, QueueError, WorkItem, WorkItemResult, WorkItemStatus, WorkQueue,
    status_for_outcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

struct StoredItem {
    item: WorkItem,
    lease: Option<LeaseState>,
    result: Option<WorkItemResult>,
}

struct LeaseState {
    worker_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Partition {
    /// Push order; leases scan this sequence.
    order: Vec<String>,
    items: HashMap<String, StoredItem>,
}

/// Concurrency-safe in-memory queue. Each job id owns a disjoint partition.
#[derive(Default)]
pub struct MemoryQueue {
    partitions: Mutex<HashMap<String, Partition>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently held for a job, across all states.
    pub fn len(&self, job_id: &str) -> usize {
        self.partitions
            .lock()
            .unwrap()
            .get(job_id)
            .map(|p| p.items.len())
            .unwrap_or(0)
    }

    /// Returns `true` when the job's partition holds no items.
    pub fn is_empty(&self, job_id: &str) -> bool {
        self.len(job_id) == 0
    }

    fn reclaim_expired(partition: &mut Partition, now: DateTime<Utc>) {
        for stored in partition.items.values_mut() {
            let expired = stored
                .lease
                .as_ref()
                .is_some_and(|lease| lease.expires_at <= now);
            if expired {
                stored.lease = None;
                stored.item.status = WorkItemStatus::Pending;
            }
        }
    }

    fn terminal_result(item: &WorkItem, outcome: Option<&ItemOutcome>) -> WorkItemResult {
        WorkItemResult {
            item_id: item.id.clone(),
            scenario_id: item.scenario_id.clone(),
            provider_id: item.provider_id.clone(),
            status: item.status,
            passed: outcome.map(|o| o.passed),
            failed: outcome.map(|o| o.failed),
            payload: outcome.and_then(|o| o.payload.clone()),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, job_id: &str, items: &[WorkItem]) -> Result<usize, QueueError> {
        let mut partitions = self.partitions.lock().unwrap();
        let partition = partitions.entry(job_id.to_string()).or_default();
        let mut added = 0;
        for item in items {
            if partition.items.contains_key(&item.id) {
                continue;
            }
            partition.order.push(item.id.clone());
            partition.items.insert(
                item.id.clone(),
                StoredItem {
                    item: item.clone(),
                    lease: None,
                    result: None,
                },
            );
            added += 1;
        }
        debug!(job_id, added, total = partition.items.len(), "pushed work items");
        Ok(added)
    }

    async fn lease(
        &self,
        job_id: &str,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<WorkItem>, QueueError> {
        let mut partitions = self.partitions.lock().unwrap();
        let Some(partition) = partitions.get_mut(job_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        Self::reclaim_expired(partition, now);

        for id in partition.order.clone() {
            let Some(stored) = partition.items.get_mut(&id) else {
                continue;
            };
            if stored.item.status != WorkItemStatus::Pending {
                continue;
            }
            stored.item.status = WorkItemStatus::Leased;
            stored.lease = Some(LeaseState {
                worker_id: worker_id.to_string(),
                expires_at: now
                    + chrono::Duration::from_std(visibility)
                        .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            });
            return Ok(Some(stored.item.clone()));
        }
        Ok(None)
    }

    async fn ack(
        &self,
        job_id: &str,
        item_id: &str,
        outcome: ItemOutcome,
    ) -> Result<(), QueueError> {
        let mut partitions = self.partitions.lock().unwrap();
        let stored = partitions
            .get_mut(job_id)
            .and_then(|p| p.items.get_mut(item_id))
            .ok_or_else(|| QueueError::ItemNotFound {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            })?;
        if stored.item.status != WorkItemStatus::Leased {
            return Err(QueueError::NotLeased {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        stored.item.status = status_for_outcome(&outcome);
        stored.lease = None;
        stored.result = Some(MemoryQueue::terminal_result(&stored.item, Some(&outcome)));
        Ok(())
    }

    async fn nack(&self, job_id: &str, item_id: &str, reason: &str) -> Result<(), QueueError> {
        let mut partitions = self.partitions.lock().unwrap();
        let stored = partitions
            .get_mut(job_id)
            .and_then(|p| p.items.get_mut(item_id))
            .ok_or_else(|| QueueError::ItemNotFound {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            })?;
        if stored.item.status != WorkItemStatus::Leased {
            return Err(QueueError::NotLeased {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        stored.lease = None;
        if stored.item.attempt >= stored.item.max_attempts {
            stored.item.status = WorkItemStatus::Failed;
            let mut result = MemoryQueue::terminal_result(&stored.item, None);
            result.payload = Some(serde_json::json!({ "reason": reason }));
            stored.result = Some(result);
            debug!(job_id, item_id, reason, "retry budget exhausted");
        } else {
            stored.item.attempt += 1;
            stored.item.status = WorkItemStatus::Pending;
            debug!(job_id, item_id, attempt = stored.item.attempt, reason, "nacked");
        }
        Ok(())
    }

    async fn results(&self, job_id: &str) -> Result<Vec<WorkItemResult>, QueueError> {
        let partitions = self.partitions.lock().unwrap();
        let Some(partition) = partitions.get(job_id) else {
            return Ok(Vec::new());
        };
        Ok(partition
            .order
            .iter()
            .filter_map(|id| partition.items.get(id))
            .filter_map(|stored| stored.result.clone())
            .collect())
    }
}
