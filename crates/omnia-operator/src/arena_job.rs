//! The ArenaJob reconciler: drives a job from Pending to a terminal phase,
//! idempotently, under arbitrary retry and crash-restart.
//!
//! Every step is restartable. Terminal phases are sticky; re-observing the
//! same generation after the status write is a no-op.

use crate::aggregate::summarize;
use crate::controller::{Action, ObjectKey, Reconciler};
use crate::volumes::ensure_workspace_claim;
use crate::workload::{WorkloadInputs, compose_worker_workload, workspace_of};
use crate::Context;
use async_trait::async_trait;
use chrono::Utc;
use omnia_arena::{ArenaConfig, build_work_items, partition_scenarios};
use omnia_core::{
    ArenaJob, ArenaJobStatus, BatchWorkload, Condition, ConditionStatus, ConditionType, ConfigMap,
    EventSeverity, ExecutionMode, JobPhase, Object, ObjectMeta, OwnerReference, Provider,
    ResultSummary, SourceArtifact, WorkloadConditionType, reason, upsert_condition,
};
use omnia_queue::WorkItem;
use omnia_resolver::{OverrideConfig, ProviderOverride, build_override_config};
use omnia_store::StoreError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RESULTS_POLL: Duration = Duration::from_secs(10);

/// Queue partition for a job.
pub fn partition_key(job: &ArenaJob) -> String {
    format!("{}/{}", job.metadata.namespace, job.metadata.name)
}

/// A Failed phase written for an unready source is recoverable: the source
/// mapping watcher re-enqueues the job when the source changes, and the
/// next pass may run to completion.
pub fn recoverable_source_failure(job: &ArenaJob) -> bool {
    if job.phase() != Some(JobPhase::Failed) {
        return false;
    }
    job.status
        .as_ref()
        .map(|status| &status.conditions)
        .and_then(|conditions| {
            omnia_core::condition::find_condition(conditions, ConditionType::SourceValid)
        })
        .is_some_and(|condition| condition.status == ConditionStatus::False)
}

/// Deterministic name of a job's override config.
pub fn override_config_name(job: &ArenaJob) -> String {
    format!("{}-overrides", job.metadata.name)
}

/// [`Reconciler`] adapter for the controller runtime.
pub struct ArenaJobReconciler {
    ctx: Arc<Context>,
}

impl ArenaJobReconciler {
    /// Build the reconciler over shared dependencies.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for ArenaJobReconciler {
    async fn reconcile(&self, key: ObjectKey) -> anyhow::Result<Action> {
        reconcile_arena_job(&self.ctx, &key.namespace, &key.name).await
    }
}

/// One reconcile pass for the job at (`namespace`, `name`).
pub async fn reconcile_arena_job(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Action> {
    // Step 1: fetch. A missing record means deletion already cascaded.
    let Some(job) = ctx.jobs.get(namespace, name).await? else {
        debug!(namespace, name, "job gone; nothing to do");
        return Ok(Action::done());
    };

    // Step 2: terminal phases are sticky, except the recoverable
    // source-not-ready failure, which the mapping watcher may revive.
    if job.is_terminal() && !recoverable_source_failure(&job) {
        return Ok(Action::done());
    }

    // Step 3: default the phase, stamp the observed generation.
    let mut status = job.status.clone().unwrap_or_default();
    if status.phase.is_none() {
        status.phase = Some(JobPhase::Pending);
    }
    status.observed_generation = job.metadata.generation;
    let generation = job.metadata.generation;

    // Step 4: license gate. Violations are terminal and never requeue.
    if let Some(license) = &ctx.license {
        if let Err(violation) = license.validate_arena_job(
            job.spec.job_type,
            job.effective_workers(),
            job.spec.schedule.is_some(),
        ) {
            status.phase = Some(JobPhase::Failed);
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    reason::LICENSE_VIOLATION,
                    violation.to_string(),
                    generation,
                ),
            );
            ctx.recorder
                .warning(&job, reason::LICENSE_VIOLATION, violation.to_string())
                .await;
            persist_status(ctx, &job, status).await?;
            return Ok(Action::done());
        }
    }

    // Step 5: the referenced source must be Ready with an artefact.
    let source = ctx.sources.get(namespace, &job.spec.source_ref).await?;
    let artifact = match source.as_ref().and_then(|s| s.ready_artifact()) {
        Some(artifact) => artifact.clone(),
        None => {
            let detail = match source {
                None => format!("source '{}' not found", job.spec.source_ref),
                Some(ref s) => format!(
                    "source '{}' is not ready (phase {})",
                    job.spec.source_ref,
                    s.status
                        .as_ref()
                        .map(|st| st.phase.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                ),
            };
            status.phase = Some(JobPhase::Failed);
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::SourceValid,
                    ConditionStatus::False,
                    reason::SOURCE_NOT_READY,
                    detail.clone(),
                    generation,
                ),
            );
            ctx.recorder
                .warning(&job, reason::SOURCE_NOT_READY, detail)
                .await;
            persist_status(ctx, &job, status).await?;
            // The source mapping watcher re-enqueues Pending jobs when the
            // source changes.
            return Ok(Action::done());
        }
    };
    upsert_condition(
        &mut status.conditions,
        Condition::new(
            ConditionType::SourceValid,
            ConditionStatus::True,
            "SourceReady",
            format!("artefact at revision {}", artifact.version),
            generation,
        ),
    );
    // A source-not-ready failure clears once the artefact is available.
    if status.phase == Some(JobPhase::Failed) {
        status.phase = Some(JobPhase::Pending);
    }

    // Step 6: with an existing child we only re-attempt the enqueue and
    // refresh status from the child.
    let child_name = job.worker_workload_name();
    if let Some(child) = ctx.workloads.get(namespace, &child_name).await? {
        // Re-attempt the enqueue with the same deterministic item ids; an
        // unresolved selector here just skips the attempt.
        match ctx
            .resolver
            .resolve_provider_groups(namespace, &job.spec.provider_overrides)
            .await
        {
            Ok(groups) => {
                let provider_ids = matrix_provider_ids(&groups);
                enqueue_items(ctx, &job, &artifact, &provider_ids, &mut status).await;
            }
            Err(err) => {
                warn!(job = %job.object_key(), error = %err, "provider re-resolution failed; skipping enqueue");
            }
        }
        let action = refresh_from_child(ctx, &job, &child, &mut status, generation).await;
        persist_status(ctx, &job, status).await?;
        return Ok(action);
    }

    // Step 7: resolve providers, tools, and the binding registry.
    let groups = match ctx
        .resolver
        .resolve_provider_groups(namespace, &job.spec.provider_overrides)
        .await
    {
        Ok(groups) => groups,
        Err(err) => return fail_resolution(ctx, &job, status, generation, err.to_string()).await,
    };
    let tools = match &job.spec.tool_registry_override {
        Some(selector) => match ctx.resolver.resolve_tool_overrides(namespace, selector).await {
            Ok(tools) => tools,
            Err(err) => {
                return fail_resolution(ctx, &job, status, generation, err.to_string()).await;
            }
        },
        None => Vec::new(),
    };
    // Binding-registry failure is non-fatal.
    let bindings = match ctx.resolver.build_binding_registry(namespace).await {
        Ok(bindings) => bindings,
        Err(err) => {
            warn!(job = %job.object_key(), error = %err, "binding registry unavailable");
            BTreeMap::new()
        }
    };
    let fleet_endpoint = match fleet_target(ctx, &job).await {
        Ok(endpoint) => endpoint,
        Err(err) => return fail_resolution(ctx, &job, status, generation, err).await,
    };

    // Step 8: compose and upsert the override config.
    let provider_overrides: BTreeMap<String, Vec<ProviderOverride>> = groups
        .iter()
        .map(|(group, providers)| {
            (
                group.clone(),
                providers.iter().map(ProviderOverride::from).collect(),
            )
        })
        .collect();
    let override_config = build_override_config(provider_overrides, tools, bindings);
    let override_name = match &override_config {
        Some(config) => Some(upsert_override_config(ctx, &job, config).await?),
        None => None,
    };

    // Workspace content volume, unless a shared filesystem replaces it.
    if ctx.config.filesystem_mode && ctx.config.shared_filesystem.is_none() {
        ensure_workspace_claim(&ctx.claims, namespace, &workspace_of(&job)).await?;
    }

    // Step 9: compose and create the worker workload.
    let flat_providers: Vec<Provider> = groups.values().flatten().cloned().collect();
    let workload = compose_worker_workload(
        &WorkloadInputs {
            job: &job,
            artifact: &artifact,
            providers: &flat_providers,
            override_config: override_name.as_deref(),
            fleet_endpoint: fleet_endpoint.as_deref(),
        },
        &ctx.config,
    );
    match ctx.workloads.create(&workload).await {
        Ok(_) | Err(StoreError::AlreadyExists { .. }) => {
            status.phase = Some(JobPhase::Running);
            status.started_at.get_or_insert_with(Utc::now);
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::JobCreated,
                    ConditionStatus::True,
                    reason::JOB_CREATED,
                    format!("worker workload '{child_name}' created"),
                    generation,
                ),
            );
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "WorkersStarting",
                    format!("{} workers starting", job.effective_workers()),
                    generation,
                ),
            );
            ctx.recorder
                .normal(
                    &job,
                    reason::JOB_CREATED,
                    format!("created worker workload '{child_name}'"),
                )
                .await;
            info!(job = %job.object_key(), workload = %child_name, "worker workload created");
        }
        Err(err) => {
            // Transient: record the condition and let the framework retry.
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::JobCreated,
                    ConditionStatus::False,
                    "WorkloadCreateFailed",
                    err.to_string(),
                    generation,
                ),
            );
            persist_status(ctx, &job, status).await?;
            return Err(err.into());
        }
    }

    // Step 10: fan out work items. Queue trouble is logged, not fatal.
    let provider_ids = matrix_provider_ids(&groups);
    enqueue_items(ctx, &job, &artifact, &provider_ids, &mut status).await;

    // Step 12: persist.
    persist_status(ctx, &job, status).await?;
    Ok(Action::done())
}

/// Fleet jobs resolve their target runtime's serving endpoint.
async fn fleet_target(ctx: &Context, job: &ArenaJob) -> Result<Option<String>, String> {
    if job.effective_execution_mode() != ExecutionMode::Fleet {
        return Ok(None);
    }
    let Some(fleet) = &job.spec.fleet else {
        return Err("fleet mode requires spec.fleet.runtimeRef".to_string());
    };
    ctx.resolver
        .resolve_fleet_endpoint(&job.metadata.namespace, &fleet.runtime_ref)
        .await
        .map(Some)
        .map_err(|err| err.to_string())
}

/// Terminal failure for unresolved referents; recovers via the mapping
/// watchers when the referent changes.
async fn fail_resolution(
    ctx: &Context,
    job: &ArenaJob,
    mut status: ArenaJobStatus,
    generation: i64,
    detail: String,
) -> anyhow::Result<Action> {
    status.phase = Some(JobPhase::Failed);
    upsert_condition(
        &mut status.conditions,
        Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            "ResolveFailed",
            detail.clone(),
            generation,
        ),
    );
    ctx.recorder
        .record(job, EventSeverity::Warning, "ResolveFailed", detail)
        .await;
    persist_status(ctx, job, status).await?;
    Ok(Action::done())
}

/// The provider dimension of the work-item matrix: the `default` group when
/// declared, otherwise every resolved provider.
fn matrix_provider_ids(groups: &BTreeMap<String, Vec<Provider>>) -> Vec<String> {
    let mut names: Vec<String> = match groups.get("default") {
        Some(providers) => providers.iter().map(|p| p.metadata.name.clone()).collect(),
        None => groups
            .values()
            .flatten()
            .map(|p| p.metadata.name.clone())
            .collect(),
    };
    names.sort();
    names.dedup();
    names
}

/// Scenario enumeration from the fetched content; any failure falls back to
/// an empty list (the item builder then emits per-provider items).
fn enumerate_scenarios(
    ctx: &Context,
    job: &ArenaJob,
    artifact: &SourceArtifact,
) -> Vec<omnia_arena::Scenario> {
    let mut candidates = Vec::new();
    if let Some(content_path) = &artifact.content_path {
        candidates.push(
            Path::new(&ctx.config.content_root)
                .join(content_path)
                .join(&job.spec.arena_file),
        );
    }
    candidates.push(Path::new(&artifact.url).join(&job.spec.arena_file));

    for path in candidates {
        let config = match ArenaConfig::load(&path) {
            Ok(config) => config,
            Err(_) => continue,
        };
        match partition_scenarios(&config, job.spec.scenarios.as_ref()) {
            Ok(scenarios) => {
                debug!(
                    job = %job.object_key(),
                    path = %path.display(),
                    scenarios = scenarios.len(),
                    "enumerated scenarios"
                );
                return scenarios;
            }
            Err(err) => {
                warn!(job = %job.object_key(), error = %err, "scenario filters are invalid");
                return Vec::new();
            }
        }
    }
    debug!(job = %job.object_key(), "arena config not readable locally; deferring to workers");
    Vec::new()
}

/// Step 10: build the deterministic item set and push it. Re-pushing after
/// a partial or failed attempt produces no duplicates.
async fn enqueue_items(
    ctx: &Context,
    job: &ArenaJob,
    artifact: &SourceArtifact,
    provider_ids: &[String],
    status: &mut ArenaJobStatus,
) {
    let scenarios = enumerate_scenarios(ctx, job, artifact);
    let items: Vec<WorkItem> = build_work_items(
        &partition_key(job),
        &job.metadata.name,
        job.effective_execution_mode(),
        &scenarios,
        provider_ids,
        &artifact.url,
    );

    match ctx.queue.push(&partition_key(job), &items).await {
        Ok(added) => {
            if added > 0 {
                ctx.recorder
                    .normal(
                        job,
                        reason::ITEMS_ENQUEUED,
                        format!("enqueued {added} of {} work items", items.len()),
                    )
                    .await;
            }
        }
        Err(err) => {
            warn!(
                job = %job.object_key(),
                error = %err,
                "work queue unreachable; workers will wait for items"
            );
        }
    }

    status.progress.total = items.len() as u32;
    status.progress.pending = status
        .progress
        .total
        .saturating_sub(status.progress.completed + status.progress.failed);
}

/// Step 11: fold the child workload's observed state and the aggregator's
/// verdict into the job status.
async fn refresh_from_child(
    ctx: &Context,
    job: &ArenaJob,
    child: &BatchWorkload,
    status: &mut ArenaJobStatus,
    generation: i64,
) -> Action {
    let child_status = child.status.clone().unwrap_or_default();
    status.active_workers = child_status.active;

    let summary = match ctx.queue.results(&partition_key(job)).await {
        Ok(results) => Some(summarize(&results)),
        Err(err) => {
            warn!(job = %job.object_key(), error = %err, "results stream unavailable");
            None
        }
    };
    if let Some(summary) = &summary {
        status.progress.completed = summary.passed_items;
        status.progress.failed = summary.failed_items;
        status.progress.pending = status
            .progress
            .total
            .saturating_sub(summary.passed_items + summary.failed_items);
    }

    if child.true_condition(WorkloadConditionType::Complete).is_some() {
        status
            .completed_at
            .get_or_insert_with(|| child_status.completion_time.unwrap_or_else(Utc::now));

        let Some(summary) = summary else {
            // Aggregator trouble keeps the job Running; retried shortly.
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "AwaitingResults",
                    "workload complete; results stream unavailable",
                    generation,
                ),
            );
            return Action::requeue_after(RESULTS_POLL);
        };

        // The workload completing does not outrank the aggregator: every
        // emitted item must have a terminal result before the job may end.
        if summary.total_items < status.progress.total {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "AwaitingResults",
                    format!(
                        "workload complete; {} of {} results pending",
                        status.progress.total - summary.total_items,
                        status.progress.total
                    ),
                    generation,
                ),
            );
            return Action::requeue_after(RESULTS_POLL);
        }

        return finish_job(ctx, job, status, summary, generation).await;
    }

    if let Some(condition) = child.true_condition(WorkloadConditionType::Failed) {
        status.phase = Some(JobPhase::Failed);
        status.completed_at.get_or_insert_with(Utc::now);
        let condition_reason = if condition.reason.is_empty() {
            reason::WORKLOAD_FAILED.to_string()
        } else {
            condition.reason.clone()
        };
        upsert_condition(
            &mut status.conditions,
            Condition::new(
                ConditionType::Ready,
                ConditionStatus::False,
                condition_reason,
                condition.message.clone(),
                generation,
            ),
        );
        ctx.recorder
            .warning(job, reason::WORKLOAD_FAILED, condition.message.clone())
            .await;
        return Action::done();
    }

    upsert_condition(
        &mut status.conditions,
        Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            "Running",
            format!(
                "{} workers active; {} of {} items terminal",
                child_status.active,
                status.progress.completed + status.progress.failed,
                status.progress.total
            ),
            generation,
        ),
    );
    Action::done()
}

async fn finish_job(
    ctx: &Context,
    job: &ArenaJob,
    status: &mut ArenaJobStatus,
    summary: ResultSummary,
    generation: i64,
) -> Action {
    upsert_condition(
        &mut status.conditions,
        Condition::new(
            ConditionType::Progressing,
            ConditionStatus::False,
            "Completed",
            "all work items terminal",
            generation,
        ),
    );

    if summary.failed_items > 0 {
        status.phase = Some(JobPhase::Failed);
        let message = format!(
            "{} of {} work items failed",
            summary.failed_items, summary.total_items
        );
        upsert_condition(
            &mut status.conditions,
            Condition::new(
                ConditionType::Ready,
                ConditionStatus::False,
                reason::TESTS_FAILED,
                message.clone(),
                generation,
            ),
        );
        ctx.recorder.warning(job, reason::TESTS_FAILED, message).await;
    } else {
        status.phase = Some(JobPhase::Succeeded);
        let message = format!("all {} work items passed", summary.total_items);
        upsert_condition(
            &mut status.conditions,
            Condition::new(
                ConditionType::Ready,
                ConditionStatus::True,
                reason::JOB_SUCCEEDED,
                message.clone(),
                generation,
            ),
        );
        ctx.recorder.normal(job, reason::JOB_SUCCEEDED, message).await;
    }
    status.result_summary = Some(summary);
    Action::done()
}

/// Upsert the job's override config artefact, owned by the job.
async fn upsert_override_config(
    ctx: &Context,
    job: &ArenaJob,
    config: &OverrideConfig,
) -> Result<String, StoreError> {
    let name = override_config_name(job);
    let rendered = config.to_json().map_err(StoreError::Serde)?;
    let mut config_map = ConfigMap {
        metadata: ObjectMeta::named(job.metadata.namespace.clone(), name.clone()),
        data: BTreeMap::from([("overrides.json".to_string(), rendered)]),
        binary_data: BTreeMap::new(),
    };
    config_map
        .metadata
        .owner_references
        .push(OwnerReference::controller_of(job));

    match ctx.configs.get(&job.metadata.namespace, &name).await? {
        Some(existing) => {
            // Update in place, keeping the stored identity.
            let mut updated = existing;
            updated.data = config_map.data;
            ctx.configs.update(&updated).await?;
        }
        None => {
            ctx.configs.create(&config_map).await?;
        }
    }
    Ok(name)
}

async fn persist_status(
    ctx: &Context,
    job: &ArenaJob,
    status: ArenaJobStatus,
) -> Result<(), StoreError> {
    let mut updated = job.clone();
    updated.status = Some(status);
    // A conflict means a newer record exists; the retry re-derives from it.
    ctx.jobs.update_status(&updated).await.map(|_| ())
}
