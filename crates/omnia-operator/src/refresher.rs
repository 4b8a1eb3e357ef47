//! ArenaSource refresher: polls each source's backend, flips the phase
//! through Pending → Fetching → Ready/Error, and records the fetched
//! artefact. ArenaJobs only ever consume the Ready artefact.

use crate::Context;
use crate::controller::{Action, ObjectKey, Reconciler};
use async_trait::async_trait;
use omnia_core::{
    ArenaSource, ArenaSourceStatus, Object, SourceArtifact, SourcePhase, SourceType,
};
use omnia_source::{ConfigMapFetcher, GitFetcher, OciFetcher, SourceError, SourceFetcher};
use omnia_store::Api;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// [`Reconciler`] adapter for ArenaSource records.
pub struct SourceRefresher {
    ctx: Arc<Context>,
}

impl SourceRefresher {
    /// Build the refresher over shared dependencies.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn scratch_for(&self, source: &ArenaSource) -> PathBuf {
        PathBuf::from(&self.ctx.config.scratch_dir)
            .join(&source.metadata.namespace)
            .join(&source.metadata.name)
    }

    fn fetcher_for(&self, source: &ArenaSource) -> Result<Box<dyn SourceFetcher>, SourceError> {
        let scratch = self.scratch_for(source);
        let timeout = self.ctx.config.fetch_timeout();
        match source.spec.source_type {
            SourceType::Git => {
                let spec = source.spec.git.clone().ok_or_else(|| {
                    SourceError::InvalidReference {
                        reference: source.metadata.name.clone(),
                        detail: "git source without a git block".to_string(),
                    }
                })?;
                Ok(Box::new(GitFetcher::new(spec, scratch, timeout)))
            }
            SourceType::Oci => {
                let spec = source.spec.oci.clone().ok_or_else(|| {
                    SourceError::InvalidReference {
                        reference: source.metadata.name.clone(),
                        detail: "oci source without an oci block".to_string(),
                    }
                })?;
                Ok(Box::new(OciFetcher::new(spec, scratch, timeout)?))
            }
            SourceType::ConfigMap => {
                let spec = source.spec.config_map.clone().ok_or_else(|| {
                    SourceError::InvalidReference {
                        reference: source.metadata.name.clone(),
                        detail: "configmap source without a configMap block".to_string(),
                    }
                })?;
                Ok(Box::new(ConfigMapFetcher::new(
                    Api::new(Arc::clone(&self.ctx.store)),
                    source.metadata.namespace.clone(),
                    spec.name,
                    scratch,
                )))
            }
        }
    }

    fn sync_interval(source: &ArenaSource) -> Duration {
        source
            .spec
            .sync_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL)
    }

    async fn write_status(&self, source: &ArenaSource, status: ArenaSourceStatus) {
        let mut updated = source.clone();
        updated.status = Some(status);
        if let Err(err) = self.ctx.sources.update_status(&updated).await {
            warn!(source = %source.object_key(), error = %err, "source status write failed");
        }
    }

    async fn refresh(&self, source: &ArenaSource) -> Action {
        // An up-to-date Ready source only needs a revision check at its
        // sync interval.
        let current = source.status.as_ref();
        let fetcher = match self.fetcher_for(source) {
            Ok(fetcher) => fetcher,
            Err(err) => {
                self.write_status(
                    source,
                    ArenaSourceStatus {
                        phase: SourcePhase::Error,
                        artifact: current.and_then(|s| s.artifact.clone()),
                        message: Some(err.to_string()),
                    },
                )
                .await;
                return Action::done();
            }
        };

        let revision = match fetcher.latest_revision().await {
            Ok(revision) => revision,
            Err(err) => {
                warn!(source = %source.object_key(), error = %err, "revision check failed");
                self.write_status(
                    source,
                    ArenaSourceStatus {
                        phase: SourcePhase::Error,
                        artifact: current.and_then(|s| s.artifact.clone()),
                        message: Some(err.to_string()),
                    },
                )
                .await;
                return Action::requeue_after(Self::sync_interval(source));
            }
        };

        let unchanged = current
            .filter(|s| s.phase == SourcePhase::Ready)
            .and_then(|s| s.artifact.as_ref())
            .is_some_and(|a| a.version == revision);
        if unchanged {
            return Action::requeue_after(Self::sync_interval(source));
        }

        self.write_status(
            source,
            ArenaSourceStatus {
                phase: SourcePhase::Fetching,
                artifact: current.and_then(|s| s.artifact.clone()),
                message: None,
            },
        )
        .await;

        match fetcher.fetch(&revision).await {
            Ok(artifact) => {
                info!(
                    source = %source.object_key(),
                    revision = %artifact.revision,
                    checksum = %artifact.checksum,
                    "source artefact refreshed"
                );
                self.write_status(
                    source,
                    ArenaSourceStatus {
                        phase: SourcePhase::Ready,
                        artifact: Some(SourceArtifact {
                            url: artifact.path.display().to_string(),
                            content_path: Some(source.metadata.name.clone()),
                            version: artifact.revision,
                            checksum: artifact.checksum,
                            size: Some(artifact.size),
                            last_modified: Some(artifact.last_modified),
                        }),
                        message: None,
                    },
                )
                .await;
            }
            Err(err) => {
                warn!(source = %source.object_key(), error = %err, "fetch failed");
                self.write_status(
                    source,
                    ArenaSourceStatus {
                        phase: SourcePhase::Error,
                        artifact: current.and_then(|s| s.artifact.clone()),
                        message: Some(err.to_string()),
                    },
                )
                .await;
            }
        }
        Action::requeue_after(Self::sync_interval(source))
    }
}

#[async_trait]
impl Reconciler for SourceRefresher {
    async fn reconcile(&self, key: ObjectKey) -> anyhow::Result<Action> {
        let Some(source) = self.ctx.sources.get(&key.namespace, &key.name).await? else {
            return Ok(Action::done());
        };
        Ok(self.refresh(&source).await)
    }
}
