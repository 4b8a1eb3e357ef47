//! Worker workload composition: the batch workload and pod template the
//! reconciler stamps out for a job.

use crate::config::OperatorConfig;
use omnia_core::env::{self, credential_env_name};
use omnia_core::labels::{WORKSPACE_LABEL, worker_labels};
use omnia_core::{
    ArenaJob, BatchWorkload, BatchWorkloadSpec, ContainerSpec, EnvVar, ExecutionMode, ObjectMeta,
    OwnerReference, PodSecurity, Provider, QUEUE_PASSWORD_KEY, RestartPolicy, SourceArtifact,
    VolumeMount, VolumeSource, VolumeSpec, WorkerPodTemplate,
};
use std::path::Path;

const CONTAINER_NAME: &str = "worker";
const SCRATCH_VOLUME: &str = "scratch";
const SCRATCH_MOUNT: &str = "/scratch";
const OVERRIDES_VOLUME: &str = "overrides";
const OVERRIDES_DIR: &str = "/etc/arena";
const CONTENT_VOLUME: &str = "workspace-content";

/// Inputs resolved before composition.
pub struct WorkloadInputs<'a> {
    /// The owning job.
    pub job: &'a ArenaJob,
    /// The Ready source artefact.
    pub artifact: &'a SourceArtifact,
    /// Every resolved provider, for credential and platform projection.
    pub providers: &'a [Provider],
    /// Name of the job's override config, when one was composed.
    pub override_config: Option<&'a str>,
    /// Fleet serving endpoint (`host:port`), fleet mode only.
    pub fleet_endpoint: Option<&'a str>,
}

/// The workspace grouping a job belongs to: its workspace label, falling
/// back to the namespace name.
pub fn workspace_of(job: &ArenaJob) -> String {
    job.metadata
        .labels
        .get(WORKSPACE_LABEL)
        .cloned()
        .unwrap_or_else(|| job.metadata.namespace.clone())
}

/// Deterministic name of a workspace's shared content volume claim.
pub fn content_claim_name(workspace: &str) -> String {
    format!("content-{workspace}")
}

/// Sub-path of a job's content inside the workspace volume:
/// `{workspace}/{namespace}/{sourceContentPath}[/{rootPath}]` where
/// `rootPath` is the arena file's directory.
pub fn content_sub_path(job: &ArenaJob, artifact: &SourceArtifact) -> String {
    let workspace = workspace_of(job);
    let mut sub_path = format!("{workspace}/{}", job.metadata.namespace);
    if let Some(content_path) = &artifact.content_path {
        sub_path.push('/');
        sub_path.push_str(content_path);
    }
    if let Some(parent) = Path::new(&job.spec.arena_file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        sub_path.push('/');
        sub_path.push_str(&parent.to_string_lossy());
    }
    sub_path
}

fn platform_env(provider: &Provider, env: &mut Vec<EnvVar>) {
    let Some(platform) = &provider.spec.platform else {
        return;
    };
    let prefix = credential_env_name(&provider.spec.provider_type);
    let prefix = prefix.trim_end_matches("_API_KEY");
    if let Some(region) = &platform.region {
        env.push(EnvVar::literal(format!("{prefix}_REGION"), region));
    }
    if let Some(project) = &platform.project {
        env.push(EnvVar::literal(format!("{prefix}_PROJECT"), project));
    }
    if let Some(endpoint) = &platform.endpoint {
        env.push(EnvVar::literal(format!("{prefix}_ENDPOINT"), endpoint));
    }
}

/// Compose the worker batch workload for a job.
pub fn compose_worker_workload(inputs: &WorkloadInputs<'_>, cfg: &OperatorConfig) -> BatchWorkload {
    let job = inputs.job;
    let replicas = inputs.job.effective_workers();
    let mode = job.effective_execution_mode();

    // Environment contract, stable order.
    let mut env_vars = vec![
        EnvVar::literal(env::ARENA_JOB_NAME, &job.metadata.name),
        EnvVar::literal(env::ARENA_JOB_NAMESPACE, &job.metadata.namespace),
        EnvVar::literal(env::ARENA_SOURCE_NAME, &job.spec.source_ref),
        EnvVar::literal(env::ARENA_FILE, &job.spec.arena_file),
        EnvVar::literal(env::ARENA_JOB_TYPE, job.effective_job_type().to_string()),
    ];
    if inputs.artifact.content_path.is_some() {
        env_vars.push(EnvVar::literal(env::ARENA_CONTENT_PATH, env::CONTENT_MOUNT_POINT));
        let basename = Path::new(&job.spec.arena_file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| job.spec.arena_file.clone());
        env_vars.push(EnvVar::literal(env::ARENA_CONFIG_FILE, basename));
        env_vars.push(EnvVar::literal(
            env::ARENA_CONTENT_VERSION,
            &inputs.artifact.version,
        ));
    }
    for provider in inputs.providers {
        if let Some(secret) = provider
            .spec
            .credential
            .as_ref()
            .and_then(|c| c.secret_ref.as_ref())
        {
            env_vars.push(EnvVar::from_secret(
                credential_env_name(&provider.spec.provider_type),
                &secret.name,
                &secret.key,
            ));
        }
        platform_env(provider, &mut env_vars);
    }
    env_vars.push(EnvVar::literal(env::ARENA_VERBOSE, job.spec.verbose.to_string()));
    env_vars.push(EnvVar::literal(env::ARENA_EXECUTION_MODE, mode.to_string()));
    if mode == ExecutionMode::Fleet {
        if let Some(endpoint) = inputs.fleet_endpoint {
            env_vars.push(EnvVar::literal(
                env::ARENA_FLEET_WS_URL,
                format!("ws://{endpoint}/ws"),
            ));
        }
    }
    if let Some(addr) = &cfg.queue.addr {
        env_vars.push(EnvVar::literal(env::REDIS_ADDR, addr));
    }
    if let Some(secret) = &cfg.queue.password_secret {
        env_vars.push(EnvVar::from_secret(env::REDIS_PASSWORD, secret, QUEUE_PASSWORD_KEY));
    } else if let Some(password) = &cfg.queue.password {
        env_vars.push(EnvVar::literal(env::REDIS_PASSWORD, password));
    }
    if inputs.override_config.is_some() {
        env_vars.push(EnvVar::literal(env::ARENA_OVERRIDES_PATH, env::OVERRIDES_MOUNT_PATH));
    }

    // Volumes: scratch always; overrides and workspace content as resolved.
    let mut volumes = vec![VolumeSpec {
        name: SCRATCH_VOLUME.to_string(),
        source: VolumeSource::EmptyDir,
    }];
    let mut mounts = vec![VolumeMount {
        name: SCRATCH_VOLUME.to_string(),
        mount_path: SCRATCH_MOUNT.to_string(),
        sub_path: None,
        read_only: false,
    }];
    if let Some(config_name) = inputs.override_config {
        volumes.push(VolumeSpec {
            name: OVERRIDES_VOLUME.to_string(),
            source: VolumeSource::ConfigMap {
                name: config_name.to_string(),
            },
        });
        mounts.push(VolumeMount {
            name: OVERRIDES_VOLUME.to_string(),
            mount_path: OVERRIDES_DIR.to_string(),
            sub_path: None,
            read_only: true,
        });
    }
    if cfg.filesystem_mode {
        let source = match &cfg.shared_filesystem {
            Some(shared) => VolumeSource::SharedFilesystem {
                server: shared.server.clone(),
                path: shared.path.clone(),
            },
            None => VolumeSource::Claim {
                claim_name: content_claim_name(&workspace_of(job)),
                read_only: true,
            },
        };
        volumes.push(VolumeSpec {
            name: CONTENT_VOLUME.to_string(),
            source,
        });
        mounts.push(VolumeMount {
            name: CONTENT_VOLUME.to_string(),
            mount_path: env::CONTENT_MOUNT_POINT.to_string(),
            sub_path: Some(content_sub_path(job, inputs.artifact)),
            read_only: true,
        });
    }

    let uses_workload_identity = inputs
        .providers
        .iter()
        .any(|p| p.spec.auth.as_ref().is_some_and(|a| a.workload_identity));

    let mut metadata = ObjectMeta::named(job.metadata.namespace.clone(), job.worker_workload_name());
    metadata.labels = worker_labels(&job.metadata.name);
    metadata
        .owner_references
        .push(OwnerReference::controller_of(job));

    BatchWorkload {
        metadata,
        spec: BatchWorkloadSpec {
            parallelism: replicas,
            completions: replicas,
            restart_policy: RestartPolicy::Never,
            ttl_seconds_after_finished: job.spec.ttl_seconds_after_finished,
            template: WorkerPodTemplate {
                containers: vec![ContainerSpec {
                    name: CONTAINER_NAME.to_string(),
                    image: cfg.worker_image.clone(),
                    env: env_vars,
                    volume_mounts: mounts,
                }],
                volumes,
                security: PodSecurity::default(),
                service_account: uses_workload_identity
                    .then(|| cfg.worker_service_account.clone()),
            },
        },
        status: None,
    }
}
