//! Redis-backed work queue.
//!
//! Layout per job partition:
//!
//! - `omnia:job:{job}:item:{id}` — JSON-encoded [`WorkItem`]
//! - `omnia:job:{job}:ids`      — list of item ids in push order
//! - `omnia:job:{job}:pending`  — list of leasable item ids
//! - `omnia:job:{job}:leases`   — zset of leased ids scored by expiry
//! - `omnia:job:{job}:results`  — hash of id → JSON [`WorkItemResult`]

use crate::{
    ItemOutcome, QueueError, WorkItem, WorkItemResult, WorkItemStatus, WorkQueue,
    status_for_outcome,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Work queue backed by a Redis endpoint (address plus optional password).
pub struct RedisQueue {
    manager: ConnectionManager,
}

impl RedisQueue {
    /// Connect to `addr` (`host:port`), authenticating when a password is
    /// given.
    pub async fn connect(addr: &str, password: Option<&str>) -> Result<Self, QueueError> {
        let url = match password {
            Some(password) => format!("redis://:{password}@{addr}/"),
            None => format!("redis://{addr}/"),
        };
        let client = redis::Client::open(url).map_err(Self::unreachable)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(Self::unreachable)?;
        Ok(Self { manager })
    }

    fn unreachable(err: redis::RedisError) -> QueueError {
        QueueError::Unreachable {
            message: err.to_string(),
        }
    }

    fn item_key(job_id: &str, item_id: &str) -> String {
        format!("omnia:job:{job_id}:item:{item_id}")
    }

    fn ids_key(job_id: &str) -> String {
        format!("omnia:job:{job_id}:ids")
    }

    fn pending_key(job_id: &str) -> String {
        format!("omnia:job:{job_id}:pending")
    }

    fn leases_key(job_id: &str) -> String {
        format!("omnia:job:{job_id}:leases")
    }

    fn results_key(job_id: &str) -> String {
        format!("omnia:job:{job_id}:results")
    }

    async fn load_item(
        conn: &mut ConnectionManager,
        job_id: &str,
        item_id: &str,
    ) -> Result<WorkItem, QueueError> {
        let raw: Option<String> = conn
            .get(Self::item_key(job_id, item_id))
            .await
            .map_err(Self::unreachable)?;
        let raw = raw.ok_or_else(|| QueueError::ItemNotFound {
            job_id: job_id.to_string(),
            item_id: item_id.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(QueueError::Corrupt)
    }

    async fn save_item(
        conn: &mut ConnectionManager,
        job_id: &str,
        item: &WorkItem,
    ) -> Result<(), QueueError> {
        let raw = serde_json::to_string(item).map_err(QueueError::Corrupt)?;
        let _: () = conn
            .set(Self::item_key(job_id, &item.id), raw)
            .await
            .map_err(Self::unreachable)?;
        Ok(())
    }

    async fn save_result(
        conn: &mut ConnectionManager,
        job_id: &str,
        result: &WorkItemResult,
    ) -> Result<(), QueueError> {
        let raw = serde_json::to_string(result).map_err(QueueError::Corrupt)?;
        let _: () = conn
            .hset(Self::results_key(job_id), &result.item_id, raw)
            .await
            .map_err(Self::unreachable)?;
        Ok(())
    }

    /// Move expired leases back to the front of the pending list.
    async fn reclaim_expired(
        conn: &mut ConnectionManager,
        job_id: &str,
    ) -> Result<(), QueueError> {
        let now = Utc::now().timestamp() as f64;
        let expired: Vec<String> = conn
            .zrangebyscore(Self::leases_key(job_id), "-inf", now)
            .await
            .map_err(Self::unreachable)?;
        for item_id in expired {
            let _: () = conn
                .zrem(Self::leases_key(job_id), &item_id)
                .await
                .map_err(Self::unreachable)?;
            let mut item = Self::load_item(conn, job_id, &item_id).await?;
            if item.status == WorkItemStatus::Leased {
                item.status = WorkItemStatus::Pending;
                Self::save_item(conn, job_id, &item).await?;
                let _: () = conn
                    .lpush(Self::pending_key(job_id), &item_id)
                    .await
                    .map_err(Self::unreachable)?;
                debug!(job_id, item_id, "lease expired; item reclaimed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, job_id: &str, items: &[WorkItem]) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let mut added = 0;
        for item in items {
            let raw = serde_json::to_string(item).map_err(QueueError::Corrupt)?;
            let fresh: bool = conn
                .set_nx(Self::item_key(job_id, &item.id), raw)
                .await
                .map_err(Self::unreachable)?;
            if !fresh {
                continue;
            }
            let _: () = conn
                .rpush(Self::ids_key(job_id), &item.id)
                .await
                .map_err(Self::unreachable)?;
            let _: () = conn
                .rpush(Self::pending_key(job_id), &item.id)
                .await
                .map_err(Self::unreachable)?;
            added += 1;
        }
        debug!(job_id, added, "pushed work items");
        Ok(added)
    }

    async fn lease(
        &self,
        job_id: &str,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<WorkItem>, QueueError> {
        let mut conn = self.manager.clone();
        Self::reclaim_expired(&mut conn, job_id).await?;

        let item_id: Option<String> = conn
            .lpop(Self::pending_key(job_id), None)
            .await
            .map_err(Self::unreachable)?;
        let Some(item_id) = item_id else {
            return Ok(None);
        };

        let mut item = Self::load_item(&mut conn, job_id, &item_id).await?;
        item.status = WorkItemStatus::Leased;
        Self::save_item(&mut conn, job_id, &item).await?;

        let expires_at = (Utc::now().timestamp() + visibility.as_secs() as i64) as f64;
        let _: () = conn
            .zadd(Self::leases_key(job_id), &item_id, expires_at)
            .await
            .map_err(Self::unreachable)?;
        debug!(job_id, item_id, worker_id, "leased work item");
        Ok(Some(item))
    }

    async fn ack(
        &self,
        job_id: &str,
        item_id: &str,
        outcome: ItemOutcome,
    ) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let mut item = Self::load_item(&mut conn, job_id, item_id).await?;
        if item.status != WorkItemStatus::Leased {
            return Err(QueueError::NotLeased {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        item.status = status_for_outcome(&outcome);
        Self::save_item(&mut conn, job_id, &item).await?;
        let _: () = conn
            .zrem(Self::leases_key(job_id), item_id)
            .await
            .map_err(Self::unreachable)?;

        let result = WorkItemResult {
            item_id: item.id.clone(),
            scenario_id: item.scenario_id.clone(),
            provider_id: item.provider_id.clone(),
            status: item.status,
            passed: Some(outcome.passed),
            failed: Some(outcome.failed),
            payload: outcome.payload,
        };
        Self::save_result(&mut conn, job_id, &result).await
    }

    async fn nack(&self, job_id: &str, item_id: &str, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let mut item = Self::load_item(&mut conn, job_id, item_id).await?;
        if item.status != WorkItemStatus::Leased {
            return Err(QueueError::NotLeased {
                job_id: job_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        let _: () = conn
            .zrem(Self::leases_key(job_id), item_id)
            .await
            .map_err(Self::unreachable)?;

        if item.attempt >= item.max_attempts {
            item.status = WorkItemStatus::Failed;
            Self::save_item(&mut conn, job_id, &item).await?;
            let result = WorkItemResult {
                item_id: item.id.clone(),
                scenario_id: item.scenario_id.clone(),
                provider_id: item.provider_id.clone(),
                status: WorkItemStatus::Failed,
                passed: None,
                failed: None,
                payload: Some(serde_json::json!({ "reason": reason })),
            };
            Self::save_result(&mut conn, job_id, &result).await?;
            debug!(job_id, item_id, reason, "retry budget exhausted");
        } else {
            item.attempt += 1;
            item.status = WorkItemStatus::Pending;
            Self::save_item(&mut conn, job_id, &item).await?;
            let _: () = conn
                .rpush(Self::pending_key(job_id), item_id)
                .await
                .map_err(Self::unreachable)?;
            debug!(job_id, item_id, attempt = item.attempt, reason, "nacked");
        }
        Ok(())
    }

    async fn results(&self, job_id: &str) -> Result<Vec<WorkItemResult>, QueueError> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .lrange(Self::ids_key(job_id), 0, -1)
            .await
            .map_err(Self::unreachable)?;
        let raw: std::collections::HashMap<String, String> = conn
            .hgetall(Self::results_key(job_id))
            .await
            .map_err(Self::unreachable)?;

        let mut results = Vec::new();
        for id in ids {
            if let Some(encoded) = raw.get(&id) {
                results.push(serde_json::from_str(encoded).map_err(QueueError::Corrupt)?);
            }
        }
        Ok(results)
    }
}
