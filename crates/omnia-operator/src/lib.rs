//! omnia-operator
#![deny(unsafe_code)]
//!
//! The Omnia control plane: a watch-driven controller runtime, the ArenaJob
//! reconciler and its collaborators (workload composer, workspace volume
//! manager, result aggregator, event recorder), a leader-election lease,
//! and the TTL sweep for finished jobs.

pub mod aggregate;
pub mod arena_job;
pub mod config;
pub mod controller;
pub mod events;
pub mod leader;
pub mod refresher;
pub mod sweep;
pub mod volumes;
pub mod workload;

use config::OperatorConfig;
use events::EventRecorder;
use omnia_core::{
    AgentRuntime, ArenaJob, ArenaSource, BatchWorkload, ConfigMap, Secret, VolumeClaim,
};
use omnia_license::License;
use omnia_queue::WorkQueue;
use omnia_resolver::Resolver;
use omnia_store::{Api, Store};
use std::sync::Arc;

/// Shared dependencies handed to every reconcile.
pub struct Context {
    /// Raw store handle.
    pub store: Arc<dyn Store>,
    /// Typed ArenaJob access.
    pub jobs: Api<ArenaJob>,
    /// Typed ArenaSource access.
    pub sources: Api<ArenaSource>,
    /// Typed BatchWorkload access.
    pub workloads: Api<BatchWorkload>,
    /// Typed ConfigMap access.
    pub configs: Api<ConfigMap>,
    /// Typed Secret access.
    pub secrets: Api<Secret>,
    /// Typed VolumeClaim access.
    pub claims: Api<VolumeClaim>,
    /// Typed AgentRuntime access.
    pub runtimes: Api<AgentRuntime>,
    /// Provider/tool resolver.
    pub resolver: Resolver,
    /// The work queue.
    pub queue: Arc<dyn WorkQueue>,
    /// License validator; `None` skips the license gate.
    pub license: Option<License>,
    /// Event recorder.
    pub recorder: EventRecorder,
    /// Operator settings.
    pub config: OperatorConfig,
}

impl Context {
    /// Wire a context over a store and queue.
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn WorkQueue>,
        license: Option<License>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            jobs: Api::new(Arc::clone(&store)),
            sources: Api::new(Arc::clone(&store)),
            workloads: Api::new(Arc::clone(&store)),
            configs: Api::new(Arc::clone(&store)),
            secrets: Api::new(Arc::clone(&store)),
            claims: Api::new(Arc::clone(&store)),
            runtimes: Api::new(Arc::clone(&store)),
            resolver: Resolver::new(Arc::clone(&store)),
            recorder: EventRecorder::new(Arc::clone(&store)),
            store,
            queue,
            license,
            config,
        }
    }
}
