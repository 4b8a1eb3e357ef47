//! Event recorder: typed `(reason, severity, message)` events attached to
//! source records. Recording failures are logged, never propagated.

use omnia_core::{Event, EventSeverity, Object, ObjectMeta, ObjectRef};
use omnia_store::{Api, Store};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Records events against the state store.
#[derive(Clone)]
pub struct EventRecorder {
    events: Api<Event>,
}

impl EventRecorder {
    /// Build a recorder over the given store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            events: Api::new(store),
        }
    }

    /// Record one event about `object`.
    pub async fn record<O: Object>(
        &self,
        object: &O,
        severity: EventSeverity,
        reason: &str,
        message: impl Into<String>,
    ) {
        let involved = ObjectRef::to_object(object);
        let name = format!(
            "{}.{}",
            involved.name,
            Uuid::new_v4().simple().to_string().split_at(10).0
        );
        let event = Event {
            metadata: ObjectMeta::named(involved.namespace.clone(), name),
            reason: reason.to_string(),
            severity,
            message: message.into(),
            involved,
            timestamp: Some(chrono::Utc::now()),
        };
        if let Err(err) = self.events.create(&event).await {
            warn!(reason, error = %err, "failed to record event");
        }
    }

    /// Shorthand for a Normal event.
    pub async fn normal<O: Object>(&self, object: &O, reason: &str, message: impl Into<String>) {
        self.record(object, EventSeverity::Normal, reason, message)
            .await;
    }

    /// Shorthand for a Warning event.
    pub async fn warning<O: Object>(&self, object: &O, reason: &str, message: impl Into<String>) {
        self.record(object, EventSeverity::Warning, reason, message)
            .await;
    }
}
