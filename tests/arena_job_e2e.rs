//! End-to-end ArenaJob scenarios over the in-memory store and queue.

mod common;

use async_trait::async_trait;
use common::*;
use omnia_core::condition::find_condition;
use omnia_core::{
    AgentRuntime, AgentRuntimeStatus, ArenaJobType, BatchWorkloadStatus, ConditionStatus,
    ConditionType, Event, EventSeverity, ExecutionMode, FleetSpec, JobPhase, ScheduleSpec,
    SourcePhase, WorkloadCondition, WorkloadConditionType,
};
use omnia_license::License;
use omnia_operator::arena_job::{partition_key, reconcile_arena_job};
use omnia_queue::{ItemOutcome, MemoryQueue, QueueError, WorkItem, WorkItemResult, WorkQueue};
use omnia_store::{Api, LabelSelector};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

async fn mark_workload_complete(harness: &Harness, namespace: &str, name: &str) {
    let mut workload = harness
        .ctx
        .workloads
        .get(namespace, name)
        .await
        .unwrap()
        .unwrap();
    workload.status = Some(BatchWorkloadStatus {
        active: 0,
        succeeded: workload.spec.completions,
        failed: 0,
        conditions: vec![WorkloadCondition {
            condition_type: WorkloadConditionType::Complete,
            status: ConditionStatus::True,
            reason: "Completed".into(),
            message: "all completions finished".into(),
        }],
        start_time: None,
        completion_time: Some(chrono::Utc::now()),
    });
    harness.ctx.workloads.update_status(&workload).await.unwrap();
}

#[tokio::test]
async fn happy_path_direct_mode() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suites/chat.yaml", &["s1", "s2", "s3"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    seed_provider(&harness, "prod", "openai-b", "openai").await;
    let job = seed_job(&harness, "prod", "j", job_spec("arena-configs", "suites/chat.yaml", 2)).await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();

    // Worker workload created with parallelism 2.
    let workload = harness
        .ctx
        .workloads
        .get("prod", "j-worker")
        .await
        .unwrap()
        .expect("worker workload exists");
    assert_eq!(workload.spec.parallelism, 2);
    assert_eq!(workload.spec.completions, 2);

    // 6 items: the full scenario × provider matrix, stable ids.
    let refreshed = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = refreshed.status.clone().unwrap();
    assert_eq!(status.phase, Some(JobPhase::Running));
    assert_eq!(status.progress.total, 6);
    assert_eq!(status.progress.pending, 6);
    assert!(status.started_at.is_some());
    assert_eq!(
        find_condition(&status.conditions, ConditionType::JobCreated).unwrap().status,
        ConditionStatus::True
    );

    let partition = partition_key(&job);
    let mut pairs = BTreeSet::new();
    let mut leased = Vec::new();
    while let Some(item) = harness
        .queue
        .lease(&partition, "w", Duration::from_secs(60))
        .await
        .unwrap()
    {
        assert!(item.id.starts_with("j-openai-"));
        pairs.insert((item.scenario_id.clone(), item.provider_id.clone().unwrap()));
        leased.push(item);
    }
    assert_eq!(leased.len(), 6);
    for scenario in ["s1", "s2", "s3"] {
        for provider in ["openai-a", "openai-b"] {
            assert!(pairs.contains(&(scenario.to_string(), provider.to_string())));
        }
    }
    for item in &leased {
        harness
            .queue
            .ack(
                &partition,
                &item.id,
                ItemOutcome {
                    passed: 1,
                    failed: 0,
                    payload: None,
                },
            )
            .await
            .unwrap();
    }

    mark_workload_complete(&harness, "prod", "j-worker").await;
    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();

    let finished = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = finished.status.clone().unwrap();
    assert_eq!(status.phase, Some(JobPhase::Succeeded));
    assert_eq!(status.progress.total, 6);
    assert_eq!(status.progress.completed, 6);
    assert_eq!(status.progress.pending, 0);
    let summary = status.result_summary.unwrap();
    assert_eq!(summary.total_items, 6);
    assert_eq!(summary.passed_items, 6);
    assert_eq!(summary.per_scenario.len(), 3);
    assert!(status.completed_at.is_some());

    // Terminal phases are sticky: another pass writes nothing.
    let version_before = finished.metadata.resource_version.clone();
    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let untouched = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    assert_eq!(untouched.metadata.resource_version, version_before);
}

#[tokio::test]
async fn failing_items_fail_the_job() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1", "s2"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    let job = seed_job(&harness, "prod", "j", job_spec("arena-configs", "suite.yaml", 1)).await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let partition = partition_key(&job);
    drain_queue(harness.queue.as_ref(), &partition, &["j-openai-a-1"]).await;
    mark_workload_complete(&harness, "prod", "j-worker").await;
    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();

    let finished = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = finished.status.unwrap();
    assert_eq!(status.phase, Some(JobPhase::Failed));
    let ready = find_condition(&status.conditions, ConditionType::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "TestsFailed");
    let summary = status.result_summary.unwrap();
    assert_eq!(summary.failed_items, 1);
    assert_eq!(summary.passed_items, 1);
}

#[tokio::test]
async fn license_denies_scheduled_load_test() {
    let harness = harness(Some(License::open_core()));
    let mut spec = job_spec("arena-configs", "suite.yaml", 1);
    spec.job_type = Some(ArenaJobType::LoadTest);
    spec.schedule = Some(ScheduleSpec {
        cron: "0 2 * * *".into(),
    });
    seed_job(&harness, "prod", "load", spec).await;

    reconcile_arena_job(&harness.ctx, "prod", "load").await.unwrap();

    let job = harness.ctx.jobs.get("prod", "load").await.unwrap().unwrap();
    let status = job.status.unwrap();
    assert_eq!(status.phase, Some(JobPhase::Failed));
    let ready = find_condition(&status.conditions, ConditionType::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "LicenseViolation");

    // No child workload was created.
    assert!(
        harness
            .ctx
            .workloads
            .get("prod", "load-worker")
            .await
            .unwrap()
            .is_none()
    );

    // A warning event names the violation.
    let events: Api<Event> = Api::new(harness.store.clone());
    let recorded = events
        .list(Some("prod"), &LabelSelector::everything())
        .await
        .unwrap();
    let violation = recorded
        .iter()
        .find(|e| e.reason == "LicenseViolation")
        .expect("license violation event");
    assert_eq!(violation.severity, EventSeverity::Warning);
}

#[tokio::test]
async fn source_not_ready_recovers_when_source_turns_ready() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1"]);
    let source = seed_source(&harness, "prod", "arena-configs", SourcePhase::Fetching, None).await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    seed_job(&harness, "prod", "j", job_spec("arena-configs", "suite.yaml", 1)).await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let job = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = job.status.clone().unwrap();
    assert_eq!(status.phase, Some(JobPhase::Failed));
    let source_valid = find_condition(&status.conditions, ConditionType::SourceValid).unwrap();
    assert_eq!(source_valid.status, ConditionStatus::False);
    assert_eq!(source_valid.reason, "SourceNotReady");

    // The source turns Ready; the mapping watcher fires and the next pass
    // succeeds.
    let mut ready = harness
        .ctx
        .sources
        .get("prod", &source.metadata.name)
        .await
        .unwrap()
        .unwrap();
    ready.status = Some(omnia_core::ArenaSourceStatus {
        phase: SourcePhase::Ready,
        artifact: Some(ready_artifact("arena-configs")),
        message: None,
    });
    harness.ctx.sources.update_status(&ready).await.unwrap();

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let recovered = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = recovered.status.unwrap();
    assert_eq!(status.phase, Some(JobPhase::Running));
    assert_eq!(
        find_condition(&status.conditions, ConditionType::SourceValid).unwrap().status,
        ConditionStatus::True
    );
    assert!(
        harness
            .ctx
            .workloads
            .get("prod", "j-worker")
            .await
            .unwrap()
            .is_some()
    );
}

/// Queue that fails its first N pushes, then delegates.
struct FlakyQueue {
    inner: Arc<MemoryQueue>,
    failures_left: AtomicUsize,
}

#[async_trait]
impl WorkQueue for FlakyQueue {
    async fn push(&self, job_id: &str, items: &[WorkItem]) -> Result<usize, QueueError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::Unreachable {
                message: "connection refused".into(),
            });
        }
        self.inner.push(job_id, items).await
    }

    async fn lease(
        &self,
        job_id: &str,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<WorkItem>, QueueError> {
        self.inner.lease(job_id, worker_id, visibility).await
    }

    async fn ack(&self, job_id: &str, item_id: &str, outcome: ItemOutcome) -> Result<(), QueueError> {
        self.inner.ack(job_id, item_id, outcome).await
    }

    async fn nack(&self, job_id: &str, item_id: &str, reason: &str) -> Result<(), QueueError> {
        self.inner.nack(job_id, item_id, reason).await
    }

    async fn results(&self, job_id: &str) -> Result<Vec<WorkItemResult>, QueueError> {
        self.inner.results(job_id).await
    }
}

#[tokio::test]
async fn unreachable_queue_is_not_fatal_and_repush_dedupes() {
    let harness = harness(Some(License::dev()));
    let inner = harness.queue.clone();
    let flaky = Arc::new(FlakyQueue {
        inner: inner.clone(),
        failures_left: AtomicUsize::new(1),
    });
    let ctx = context_with_queue(&harness, flaky);

    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1", "s2", "s3"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    seed_provider(&harness, "prod", "openai-b", "openai").await;
    let job = seed_job(&harness, "prod", "j", job_spec("arena-configs", "suite.yaml", 2)).await;
    let partition = partition_key(&job);

    // First pass: the push fails, the job still runs.
    reconcile_arena_job(&ctx, "prod", "j").await.unwrap();
    let refreshed = ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    let status = refreshed.status.clone().unwrap();
    assert_eq!(status.phase, Some(JobPhase::Running));
    assert_eq!(
        find_condition(&status.conditions, ConditionType::JobCreated).unwrap().status,
        ConditionStatus::True
    );
    assert!(inner.is_empty(&partition), "failed push left nothing behind");

    // Second pass: the same deterministic ids land exactly once.
    reconcile_arena_job(&ctx, "prod", "j").await.unwrap();
    assert_eq!(inner.len(&partition), 6);

    // A third pass produces no duplicates.
    reconcile_arena_job(&ctx, "prod", "j").await.unwrap();
    assert_eq!(inner.len(&partition), 6);
}

#[tokio::test]
async fn workload_completion_waits_for_aggregator_completeness() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1", "s2"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    let job = seed_job(&harness, "prod", "j", job_spec("arena-configs", "suite.yaml", 1)).await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let partition = partition_key(&job);

    // Only one of two items terminal when the workload completes.
    let first = harness
        .queue
        .lease(&partition, "w", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    harness
        .queue
        .ack(&partition, &first.id, ItemOutcome { passed: 1, failed: 0, payload: None })
        .await
        .unwrap();
    mark_workload_complete(&harness, "prod", "j-worker").await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let waiting = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    assert_eq!(waiting.status.as_ref().unwrap().phase, Some(JobPhase::Running));

    // The second result arrives; the job may finish.
    drain_queue(harness.queue.as_ref(), &partition, &[]).await;
    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();
    let finished = harness.ctx.jobs.get("prod", "j").await.unwrap().unwrap();
    assert_eq!(finished.status.unwrap().phase, Some(JobPhase::Succeeded));
}

#[tokio::test]
async fn fleet_mode_partitions_by_scenario_only() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1", "s2", "s3"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;

    let runtimes: Api<AgentRuntime> = Api::new(harness.store.clone());
    let runtime = runtimes
        .create(&AgentRuntime {
            metadata: omnia_core::ObjectMeta::named("prod", "serving"),
            ..AgentRuntime::default()
        })
        .await
        .unwrap();
    let mut with_endpoint = runtime.clone();
    with_endpoint.status = Some(AgentRuntimeStatus {
        endpoint: Some("serving.prod:8443".into()),
    });
    runtimes.update_status(&with_endpoint).await.unwrap();

    let mut spec = job_spec("arena-configs", "suite.yaml", 1);
    spec.execution_mode = Some(ExecutionMode::Fleet);
    spec.fleet = Some(FleetSpec {
        runtime_ref: "serving".into(),
    });
    let job = seed_job(&harness, "prod", "fleet-j", spec).await;

    reconcile_arena_job(&harness.ctx, "prod", "fleet-j").await.unwrap();

    let partition = partition_key(&job);
    let mut items = Vec::new();
    while let Some(item) = harness
        .queue
        .lease(&partition, "w", Duration::from_secs(60))
        .await
        .unwrap()
    {
        items.push(item);
    }
    assert_eq!(items.len(), 3, "one item per scenario");
    assert!(items.iter().all(|i| i.provider_id.is_none()));
    assert!(items.iter().any(|i| i.id == "fleet-j-s1-0"));

    // The worker env carries the fleet target.
    let workload = harness
        .ctx
        .workloads
        .get("prod", "fleet-j-worker")
        .await
        .unwrap()
        .unwrap();
    let env = &workload.spec.template.containers[0].env;
    let ws_url = env.iter().find(|e| e.name == "ARENA_FLEET_WS_URL").unwrap();
    assert_eq!(ws_url.value.as_deref(), Some("ws://serving.prod:8443/ws"));
    let mode = env.iter().find(|e| e.name == "ARENA_EXECUTION_MODE").unwrap();
    assert_eq!(mode.value.as_deref(), Some("fleet"));
}

#[tokio::test]
async fn override_config_is_mounted_and_owned() {
    let harness = harness(Some(License::dev()));
    write_arena_config(&harness, "arena-configs", "suite.yaml", &["s1"]);
    seed_source(
        &harness,
        "prod",
        "arena-configs",
        SourcePhase::Ready,
        Some(ready_artifact("arena-configs")),
    )
    .await;
    seed_provider(&harness, "prod", "openai-a", "openai").await;
    let job = seed_job(&harness, "prod", "j", job_spec("arena-configs", "suite.yaml", 1)).await;

    reconcile_arena_job(&harness.ctx, "prod", "j").await.unwrap();

    let config = harness
        .ctx
        .configs
        .get("prod", "j-overrides")
        .await
        .unwrap()
        .expect("override config exists");
    assert!(config.metadata.is_controlled_by(
        harness
            .ctx
            .jobs
            .get("prod", "j")
            .await
            .unwrap()
            .unwrap()
            .metadata
            .uid
            .unwrap()
    ));
    let rendered = &config.data["overrides.json"];
    let parsed: serde_json::Value = serde_json::from_str(rendered).unwrap();
    assert_eq!(parsed["providers"]["default"][0]["id"], "openai-a");
    assert_eq!(parsed["bindings"]["prod/openai-a"]["type"], "openai");

    // Deleting the job cascades to its child artefacts.
    let _ = job;
    harness.ctx.jobs.delete("prod", "j").await.unwrap();
    assert!(harness.ctx.configs.get("prod", "j-overrides").await.unwrap().is_none());
    assert!(harness.ctx.workloads.get("prod", "j-worker").await.unwrap().is_none());
}
