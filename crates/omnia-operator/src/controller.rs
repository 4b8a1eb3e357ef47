//! Watch-driven controller runtime.
//!
//! Each watched kind feeds object keys into a de-duplicating queue; a
//! configurable worker pool drains it. Reconciles for one key are
//! serialised (a key observed while in flight is re-queued when the flight
//! lands); failed reconciles are retried with exponential backoff.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Key of one reconcilable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Build a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What to do after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Wait for the next change event.
    AwaitChange,
    /// Re-run after the given delay even without a change event.
    RequeueAfter(Duration),
}

impl Action {
    /// Shorthand for [`Action::AwaitChange`].
    pub fn done() -> Self {
        Self::AwaitChange
    }

    /// Shorthand for [`Action::RequeueAfter`].
    pub fn requeue_after(delay: Duration) -> Self {
        Self::RequeueAfter(delay)
    }
}

/// One reconcile loop body.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Drive the object named by `key` toward its declared state. Errors
    /// are retried with backoff; terminal outcomes must be expressed in
    /// the object's status and return `Ok`.
    async fn reconcile(&self, key: ObjectKey) -> anyhow::Result<Action>;
}

struct ControllerState {
    /// Keys waiting to be picked up, oldest first.
    pending: Vec<ObjectKey>,
    /// Keys currently being reconciled.
    in_flight: HashSet<ObjectKey>,
    /// In-flight keys that saw another event and must run again.
    dirty: HashSet<ObjectKey>,
    /// Consecutive failures per key, for backoff.
    failures: std::collections::HashMap<ObjectKey, u32>,
}

/// A keyed work queue plus worker pool for one reconciler.
pub struct Controller<R: Reconciler> {
    name: String,
    reconciler: Arc<R>,
    state: Arc<Mutex<ControllerState>>,
    wake: Arc<Notify>,
    workers: usize,
}

impl<R: Reconciler> Controller<R> {
    /// Build a controller with the given worker count (minimum 1).
    pub fn new(name: impl Into<String>, reconciler: R, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reconciler: Arc::new(reconciler),
            state: Arc::new(Mutex::new(ControllerState {
                pending: Vec::new(),
                in_flight: HashSet::new(),
                dirty: HashSet::new(),
                failures: std::collections::HashMap::new(),
            })),
            wake: Arc::new(Notify::new()),
            workers: workers.max(1),
        })
    }

    /// Enqueue a key for reconciliation. De-duplicates against the pending
    /// queue; a key currently in flight is marked dirty and re-runs when
    /// its flight lands.
    pub fn trigger(&self, key: ObjectKey) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
        } else if !state.pending.contains(&key) {
            state.pending.push(key);
            self.wake.notify_waiters();
            self.wake.notify_one();
        }
    }

    fn next_key(&self) -> Option<ObjectKey> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .pending
            .iter()
            .position(|key| !state.in_flight.contains(key))?;
        let key = state.pending.remove(position);
        state.in_flight.insert(key.clone());
        Some(key)
    }

    fn land(&self, key: &ObjectKey, failed: bool) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(key);

        let backoff = if failed {
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            let exp = (*failures - 1).min(16);
            Some((BACKOFF_BASE * 2u32.saturating_pow(exp)).min(BACKOFF_CAP))
        } else {
            state.failures.remove(key);
            None
        };

        if state.dirty.remove(key) && !state.pending.contains(key) {
            state.pending.push(key.clone());
            self.wake.notify_one();
        }
        backoff
    }

    fn schedule_after(controller: Arc<Self>, key: ObjectKey, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.trigger(key);
        });
    }

    /// Run the worker pool until the task is dropped or aborted.
    pub async fn run(self: Arc<Self>) {
        info!(controller = %self.name, workers = self.workers, "controller starting");
        let mut handles = Vec::new();
        for worker in 0..self.workers {
            let controller = Arc::clone(&self);
            handles.push(tokio::spawn(controller.worker_loop(worker)));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        loop {
            let Some(key) = self.next_key() else {
                self.wake.notified().await;
                continue;
            };
            debug!(controller = %self.name, worker, key = %key, "reconciling");

            match self.reconciler.reconcile(key.clone()).await {
                Ok(Action::AwaitChange) => {
                    self.land(&key, false);
                }
                Ok(Action::RequeueAfter(delay)) => {
                    self.land(&key, false);
                    Self::schedule_after(Arc::clone(&self), key, delay);
                }
                Err(err) => {
                    error!(controller = %self.name, key = %key, error = %err, "reconcile failed");
                    if let Some(backoff) = self.land(&key, true) {
                        Self::schedule_after(Arc::clone(&self), key, backoff);
                    }
                }
            }
        }
    }
}
