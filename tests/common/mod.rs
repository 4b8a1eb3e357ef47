//! Shared harness for end-to-end tests: an in-memory store and queue wired
//! into an operator context, plus seeding helpers.
#![allow(dead_code)]

use omnia_core::{
    ArenaJob, ArenaJobSpec, ArenaSource, ArenaSourceSpec, ArenaSourceStatus, ConfigMapSourceSpec,
    ObjectMeta, Provider, ProviderOverrideSelector, ProviderSpec, SourceArtifact, SourcePhase,
    SourceType,
};
use omnia_license::License;
use omnia_operator::Context;
use omnia_operator::config::OperatorConfig;
use omnia_queue::{ItemOutcome, MemoryQueue, WorkQueue};
use omnia_store::{MemoryStore, RawObject, Store};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub ctx: Arc<Context>,
    pub content: TempDir,
}

pub fn harness(license: Option<License>) -> Harness {
    harness_with_queue(license, Arc::new(MemoryQueue::new()))
}

pub fn harness_with_queue(license: Option<License>, queue: Arc<MemoryQueue>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let content = TempDir::new().expect("create content root");
    let config = OperatorConfig {
        content_root: content.path().display().to_string(),
        scratch_dir: content.path().join("scratch").display().to_string(),
        leader_election: false,
        ..OperatorConfig::default()
    };
    let ctx = Arc::new(Context::new(
        store.clone(),
        queue.clone(),
        license,
        config,
    ));
    Harness {
        store,
        queue,
        ctx,
        content,
    }
}

/// Wire a custom queue implementation (e.g. a flaky one) into a context
/// that shares the harness's store and content root.
pub fn context_with_queue(harness: &Harness, queue: Arc<dyn WorkQueue>) -> Arc<Context> {
    Arc::new(Context::new(
        harness.store.clone(),
        queue,
        Some(License::dev()),
        harness.ctx.config.clone(),
    ))
}

/// Write an arena config with the given scenario ids under the content
/// root, matching a source whose `contentPath` is `content_path`.
pub fn write_arena_config(
    harness: &Harness,
    content_path: &str,
    arena_file: &str,
    scenario_ids: &[&str],
) {
    let path = harness.content.path().join(content_path).join(arena_file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let scenarios: Vec<String> = scenario_ids
        .iter()
        .map(|id| format!("  - id: {id}\n    prompt: \"run {id}\""))
        .collect();
    std::fs::write(&path, format!("scenarios:\n{}\n", scenarios.join("\n"))).unwrap();
}

/// Create a source and drive its status to the given phase.
pub async fn seed_source(
    harness: &Harness,
    namespace: &str,
    name: &str,
    phase: SourcePhase,
    artifact: Option<SourceArtifact>,
) -> ArenaSource {
    let source = ArenaSource {
        metadata: ObjectMeta::named(namespace, name),
        spec: ArenaSourceSpec {
            source_type: SourceType::ConfigMap,
            config_map: Some(ConfigMapSourceSpec {
                name: format!("{name}-files"),
            }),
            ..ArenaSourceSpec::default()
        },
        status: None,
    };
    let created = harness.ctx.sources.create(&source).await.unwrap();
    let mut with_status = created.clone();
    with_status.status = Some(ArenaSourceStatus {
        phase,
        artifact,
        message: None,
    });
    harness.ctx.sources.update_status(&with_status).await.unwrap()
}

pub fn ready_artifact(content_path: &str) -> SourceArtifact {
    SourceArtifact {
        url: format!("scratch/{content_path}.tar.gz"),
        content_path: Some(content_path.to_string()),
        version: "cfg:0123abcd4567".to_string(),
        checksum: "sha256:feed".to_string(),
        size: Some(1024),
        last_modified: None,
    }
}

pub async fn seed_provider(harness: &Harness, namespace: &str, name: &str, provider_type: &str) {
    let provider = Provider {
        metadata: ObjectMeta::named(namespace, name),
        spec: ProviderSpec {
            provider_type: provider_type.to_string(),
            model: Some("test-model".to_string()),
            ..ProviderSpec::default()
        },
    };
    harness
        .ctx
        .store
        .create(RawObject::from_typed(&provider).unwrap())
        .await
        .unwrap();
}

pub fn job_spec(source_ref: &str, arena_file: &str, workers: i32) -> ArenaJobSpec {
    ArenaJobSpec {
        source_ref: source_ref.to_string(),
        arena_file: arena_file.to_string(),
        workers,
        provider_overrides: vec![ProviderOverrideSelector {
            group: "default".to_string(),
            selector: "openai-*".to_string(),
            match_labels: BTreeMap::new(),
        }],
        ..ArenaJobSpec::default()
    }
}

pub async fn seed_job(harness: &Harness, namespace: &str, name: &str, spec: ArenaJobSpec) -> ArenaJob {
    let job = ArenaJob {
        metadata: ObjectMeta::named(namespace, name),
        spec,
        status: None,
    };
    harness.ctx.jobs.create(&job).await.unwrap()
}

/// Lease and ack every pending item in a partition with the given outcome.
pub async fn drain_queue(queue: &dyn WorkQueue, partition: &str, failed_for: &[&str]) -> usize {
    let mut acked = 0;
    while let Some(item) = queue
        .lease(partition, "test-worker", std::time::Duration::from_secs(30))
        .await
        .unwrap()
    {
        let failing = failed_for.contains(&item.id.as_str());
        queue
            .ack(
                partition,
                &item.id,
                ItemOutcome {
                    passed: if failing { 0 } else { 1 },
                    failed: if failing { 1 } else { 0 },
                    payload: None,
                },
            )
            .await
            .unwrap();
        acked += 1;
    }
    acked
}
