#![deny(unsafe_code)]
//! Omnia operator daemon: wires the state store, admission, queue, and
//! controllers, then reconciles under a leader lease until shutdown.

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use omnia_admission::OmniaAdmission;
use omnia_core::labels::JOB_LABEL;
use omnia_core::{JobPhase, Object};
use omnia_license::License;
use omnia_operator::arena_job::ArenaJobReconciler;
use omnia_operator::config::OperatorConfig;
use omnia_operator::controller::{Controller, ObjectKey};
use omnia_operator::leader::LeaderElector;
use omnia_operator::refresher::SourceRefresher;
use omnia_operator::{Context, sweep};
use omnia_queue::{MemoryQueue, RedisQueue, WorkQueue};
use omnia_store::{LabelSelector, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "omnia-operator", version, about = "Omnia control plane operator")]
struct Args {
    /// Path to the operator TOML config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run with the development license (all features enabled).
    #[arg(long)]
    dev: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("omnia=debug,omnia_operator=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("omnia=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => OperatorConfig::load(path)
            .with_context(|| format!("load config from {}", path.display()))?,
        None => OperatorConfig::from_env().context("load config from environment")?,
    };
    for warning in config.warnings() {
        warn!(%warning, "config warning");
    }

    let license = resolve_license(&args, &config)?;

    // The in-memory store backs single-node deployments; clustered
    // installations swap in the external state-store client at this seam.
    let store = Arc::new(MemoryStore::new());
    store.set_admission(Arc::new(OmniaAdmission::new(
        license.clone().unwrap_or_else(License::open_core),
    )));

    let queue: Arc<dyn WorkQueue> = match &config.queue.addr {
        Some(addr) => {
            let password = queue_password(&store, &config).await?;
            let queue = RedisQueue::connect(addr, password.as_deref())
                .await
                .with_context(|| format!("connect work queue at {addr}"))?;
            info!(addr, "connected to redis work queue");
            Arc::new(queue)
        }
        None => {
            info!("no queue address configured; using the in-memory queue");
            Arc::new(MemoryQueue::new())
        }
    };

    let ctx = Arc::new(Context::new(store, queue, license, config.clone()));

    if config.leader_election {
        let elector = LeaderElector::new(
            Arc::clone(&ctx.store),
            config.namespace.clone(),
            identity(),
            Duration::from_secs(config.lease_duration_seconds),
        );
        elector.acquire().await.context("acquire leader lease")?;
        let renew_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let elector = LeaderElector::new(
                Arc::clone(&renew_ctx.store),
                renew_ctx.config.namespace.clone(),
                identity(),
                Duration::from_secs(renew_ctx.config.lease_duration_seconds),
            );
            elector.renew_loop().await;
            warn!("leader lease lost; exiting");
            std::process::exit(1);
        });
    }

    run_controllers(ctx).await;
    Ok(())
}

fn identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("omnia-operator-{}", std::process::id()))
}

/// Queue password: a secret reference (key `redis-password`) wins over the
/// by-value setting.
async fn queue_password(
    store: &Arc<MemoryStore>,
    config: &OperatorConfig,
) -> Result<Option<String>> {
    if let Some(secret_name) = &config.queue.password_secret {
        let secrets: omnia_store::Api<omnia_core::Secret> =
            omnia_store::Api::new(Arc::clone(store) as Arc<dyn omnia_store::Store>);
        let secret = secrets
            .get(&config.namespace, secret_name)
            .await?
            .with_context(|| format!("queue password secret '{secret_name}' not found"))?;
        let password = secret
            .data
            .get(omnia_core::QUEUE_PASSWORD_KEY)
            .cloned()
            .with_context(|| {
                format!("secret '{secret_name}' has no '{}' key", omnia_core::QUEUE_PASSWORD_KEY)
            })?;
        return Ok(Some(password));
    }
    Ok(config.queue.password.clone())
}

fn resolve_license(args: &Args, config: &OperatorConfig) -> Result<Option<License>> {
    if args.dev {
        return Ok(Some(License::dev()));
    }
    match &config.license_token {
        Some(token) => {
            let secret = config
                .license_signing_secret
                .as_deref()
                .unwrap_or_default()
                .as_bytes()
                .to_vec();
            let license =
                License::from_token(token, &secret).context("parse license token")?;
            Ok(Some(license))
        }
        None => Ok(Some(License::open_core())),
    }
}

/// Start all controllers, watch pumps, and the TTL sweep; runs until
/// shutdown.
async fn run_controllers(ctx: Arc<Context>) {
    let job_controller = Controller::new(
        "arena-job",
        ArenaJobReconciler::new(Arc::clone(&ctx)),
        ctx.config.workers,
    );
    let source_controller = Controller::new(
        "arena-source",
        SourceRefresher::new(Arc::clone(&ctx)),
        ctx.config.workers,
    );

    // Prime both controllers with everything already in the store.
    prime(&ctx, &job_controller, &source_controller).await;

    // Trigger (a): ArenaJob change events.
    {
        let controller = Arc::clone(&job_controller);
        let mut watch = ctx.jobs.watch();
        tokio::spawn(async move {
            while let Some(event) = watch.next().await {
                let meta = event.object.metadata();
                controller.trigger(ObjectKey::new(meta.namespace.clone(), meta.name.clone()));
            }
        });
    }

    // Trigger (b): ArenaSource changes map to Pending jobs referencing the
    // source, and feed the refresher.
    {
        let job_controller = Arc::clone(&job_controller);
        let source_controller = Arc::clone(&source_controller);
        let pump_ctx = Arc::clone(&ctx);
        let mut watch = ctx.sources.watch();
        tokio::spawn(async move {
            while let Some(event) = watch.next().await {
                let meta = event.object.metadata();
                source_controller
                    .trigger(ObjectKey::new(meta.namespace.clone(), meta.name.clone()));
                for key in pending_jobs_for_source(&pump_ctx, &meta.namespace, &meta.name).await {
                    job_controller.trigger(key);
                }
            }
        });
    }

    // Trigger (c): child workload changes map back to the owning job via
    // the job label.
    {
        let controller = Arc::clone(&job_controller);
        let mut watch = ctx.workloads.watch();
        tokio::spawn(async move {
            while let Some(event) = watch.next().await {
                let meta = event.object.metadata();
                if let Some(job_name) = meta.labels.get(JOB_LABEL) {
                    controller.trigger(ObjectKey::new(meta.namespace.clone(), job_name.clone()));
                }
            }
        });
    }

    tokio::spawn(sweep::run(Arc::clone(&ctx), sweep::SWEEP_INTERVAL));

    let job_runner = tokio::spawn(Arc::clone(&job_controller).run());
    let source_runner = tokio::spawn(Arc::clone(&source_controller).run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(error = %err, "signal handler failed; shutting down"),
    }
    job_runner.abort();
    source_runner.abort();
}

/// Jobs in `namespace` that reference `source` and have not progressed past
/// Pending; only these re-enter reconcile on source changes.
async fn pending_jobs_for_source(ctx: &Context, namespace: &str, source: &str) -> Vec<ObjectKey> {
    let jobs = match ctx.jobs.list(Some(namespace), &LabelSelector::everything()).await {
        Ok(jobs) => jobs,
        Err(err) => {
            warn!(namespace, source, error = %err, "source mapping list failed");
            return Vec::new();
        }
    };
    jobs.into_iter()
        .filter(|job| job.spec.source_ref == source)
        .filter(|job| {
            matches!(job.phase(), None | Some(JobPhase::Pending))
                || omnia_operator::arena_job::recoverable_source_failure(job)
        })
        .map(|job| ObjectKey::new(job.metadata.namespace.clone(), job.metadata.name.clone()))
        .collect()
}

/// Seed the controllers with pre-existing records on startup.
async fn prime(
    ctx: &Context,
    jobs: &Arc<Controller<ArenaJobReconciler>>,
    sources: &Arc<Controller<SourceRefresher>>,
) {
    if let Ok(existing) = ctx.jobs.list(None, &LabelSelector::everything()).await {
        for job in existing {
            jobs.trigger(ObjectKey::new(
                job.metadata.namespace.clone(),
                job.metadata.name.clone(),
            ));
        }
    }
    if let Ok(existing) = ctx.sources.list(None, &LabelSelector::everything()).await {
        for source in existing {
            sources.trigger(ObjectKey::new(
                source.metadata.namespace.clone(),
                source.metadata.name.clone(),
            ));
        }
    }
}
