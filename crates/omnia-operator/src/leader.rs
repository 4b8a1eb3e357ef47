//! Leader election over a lease record in the state store.
//!
//! Only one replica reconciles at a time: the leader holds a bounded lease
//! and renews it periodically; followers poll until the lease expires.

use chrono::Utc;
use omnia_core::{Lease, LeaseSpec, ObjectMeta};
use omnia_store::{Api, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the operator's leader lease.
pub const LEASE_NAME: &str = "omnia-operator-leader";

/// Leader elector for one operator replica.
pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
    lease_duration: Duration,
}

impl LeaderElector {
    /// Build an elector identified by `identity` (e.g. pod name).
    pub fn new(
        store: Arc<dyn Store>,
        namespace: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            leases: Api::new(store),
            namespace: namespace.into(),
            identity: identity.into(),
            lease_duration,
        }
    }

    fn renew_interval(&self) -> Duration {
        // Renew at a third of the window so one missed renewal is survivable.
        self.lease_duration / 3
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self) -> Result<(), StoreError> {
        loop {
            if self.try_acquire().await? {
                info!(identity = %self.identity, "acquired leader lease");
                return Ok(());
            }
            debug!(identity = %self.identity, "leader lease held elsewhere; waiting");
            tokio::time::sleep(self.renew_interval()).await;
        }
    }

    async fn try_acquire(&self) -> Result<bool, StoreError> {
        let now = Utc::now();
        match self.leases.get(&self.namespace, LEASE_NAME).await? {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta::named(self.namespace.clone(), LEASE_NAME),
                    spec: LeaseSpec {
                        holder: self.identity.clone(),
                        acquired_at: Some(now),
                        renewed_at: Some(now),
                        lease_duration_seconds: self.lease_duration.as_secs(),
                    },
                };
                match self.leases.create(&lease).await {
                    Ok(_) => Ok(true),
                    Err(StoreError::AlreadyExists { .. }) => Ok(false),
                    Err(err) => Err(err),
                }
            }
            Some(mut lease) => {
                let ours = lease.spec.holder == self.identity;
                if !ours && !lease.spec.is_expired(now) {
                    return Ok(false);
                }
                if !ours {
                    lease.spec.acquired_at = Some(now);
                }
                lease.spec.holder = self.identity.clone();
                lease.spec.renewed_at = Some(now);
                lease.spec.lease_duration_seconds = self.lease_duration.as_secs();
                match self.leases.update(&lease).await {
                    Ok(_) => Ok(true),
                    // Someone else renewed first; stay a follower.
                    Err(StoreError::Conflict { .. }) => Ok(false),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Renew the lease forever. Call only while leading; exits if the lease
    /// is lost.
    pub async fn renew_loop(&self) {
        loop {
            tokio::time::sleep(self.renew_interval()).await;
            match self.try_acquire().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "lost leader lease");
                    return;
                }
                Err(err) => {
                    warn!(identity = %self.identity, error = %err, "lease renewal failed");
                }
            }
        }
    }
}
