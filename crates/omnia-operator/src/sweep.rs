//! TTL sweep: finished jobs whose `ttlSecondsAfterFinished` has elapsed
//! lose their child workload and override config. The job record itself
//! stays for the user to inspect or delete.

use crate::Context;
use crate::arena_job::override_config_name;
use chrono::Utc;
use omnia_core::{JobPhase, Object};
use omnia_store::{LabelSelector, StoreError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default pause between sweep passes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One sweep pass over all jobs; returns how many jobs were cleaned.
pub async fn sweep_finished_jobs(ctx: &Context) -> Result<usize, StoreError> {
    let jobs = ctx.jobs.list(None, &LabelSelector::everything()).await?;
    let now = Utc::now();
    let mut cleaned = 0;

    for job in jobs {
        let Some(ttl) = job.spec.ttl_seconds_after_finished else {
            continue;
        };
        let Some(status) = &job.status else { continue };
        if !matches!(
            status.phase,
            Some(JobPhase::Succeeded | JobPhase::Failed | JobPhase::Cancelled)
        ) {
            continue;
        }
        let Some(completed_at) = status.completed_at else {
            continue;
        };
        if now - completed_at < chrono::Duration::seconds(ttl) {
            continue;
        }

        let namespace = &job.metadata.namespace;
        let mut touched = false;
        match ctx.workloads.delete(namespace, &job.worker_workload_name()).await {
            Ok(()) => touched = true,
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => {
                warn!(job = %job.object_key(), error = %err, "ttl sweep failed to delete workload");
                continue;
            }
        }
        match ctx.configs.delete(namespace, &override_config_name(&job)).await {
            Ok(()) => touched = true,
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => {
                warn!(job = %job.object_key(), error = %err, "ttl sweep failed to delete config");
            }
        }
        if touched {
            info!(job = %job.object_key(), ttl, "ttl elapsed; cleaned finished job artefacts");
            cleaned += 1;
        } else {
            debug!(job = %job.object_key(), "ttl elapsed; nothing left to clean");
        }
    }
    Ok(cleaned)
}

/// Run sweep passes forever.
pub async fn run(ctx: std::sync::Arc<Context>, interval: Duration) {
    loop {
        if let Err(err) = sweep_finished_jobs(&ctx).await {
            warn!(error = %err, "ttl sweep pass failed");
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use chrono::Duration as ChronoDuration;
    use omnia_core::{
        ArenaJob, ArenaJobSpec, ArenaJobStatus, BatchWorkload, ObjectMeta, OwnerReference,
    };
    use omnia_license::License;
    use omnia_queue::MemoryQueue;
    use omnia_store::MemoryStore;
    use std::sync::Arc;

    async fn context() -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            Some(License::dev()),
            OperatorConfig::default(),
        ))
    }

    async fn finished_job(ctx: &Context, name: &str, ttl: i64, age_seconds: i64) -> ArenaJob {
        let job = ArenaJob {
            metadata: ObjectMeta::named("prod", name),
            spec: ArenaJobSpec {
                source_ref: "src".into(),
                arena_file: "suite.yaml".into(),
                ttl_seconds_after_finished: Some(ttl),
                ..ArenaJobSpec::default()
            },
            status: None,
        };
        let created = ctx.jobs.create(&job).await.unwrap();

        let workload = BatchWorkload {
            metadata: {
                let mut meta = ObjectMeta::named("prod", format!("{name}-worker"));
                meta.owner_references.push(OwnerReference::controller_of(&created));
                meta
            },
            ..BatchWorkload::default()
        };
        ctx.workloads.create(&workload).await.unwrap();

        let mut with_status = created.clone();
        with_status.status = Some(ArenaJobStatus {
            phase: Some(JobPhase::Succeeded),
            completed_at: Some(Utc::now() - ChronoDuration::seconds(age_seconds)),
            ..ArenaJobStatus::default()
        });
        ctx.jobs.update_status(&with_status).await.unwrap()
    }

    #[tokio::test]
    async fn sweeps_only_expired_jobs() {
        let ctx = context().await;
        finished_job(&ctx, "old", 60, 120).await;
        finished_job(&ctx, "fresh", 600, 10).await;

        let cleaned = sweep_finished_jobs(&ctx).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(ctx.workloads.get("prod", "old-worker").await.unwrap().is_none());
        assert!(ctx.workloads.get("prod", "fresh-worker").await.unwrap().is_some());
        // The job record itself survives.
        assert!(ctx.jobs.get("prod", "old").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn jobs_without_ttl_are_untouched() {
        let ctx = context().await;
        let job = finished_job(&ctx, "keep", 60, 120).await;
        let mut no_ttl = job.clone();
        no_ttl.spec.ttl_seconds_after_finished = None;
        ctx.jobs.update(&no_ttl).await.unwrap();

        let cleaned = sweep_finished_jobs(&ctx).await.unwrap();
        assert_eq!(cleaned, 0);
        assert!(ctx.workloads.get("prod", "keep-worker").await.unwrap().is_some());
    }
}
