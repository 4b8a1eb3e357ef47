//! In-memory reference store.
//!
//! Backs tests and single-process deployments. Semantics match the external
//! cluster state store: monotonically increasing resource versions,
//! generation bumps on spec change, admission hooks before durable writes,
//! and owner-reference deletion cascade.

use crate::{
    AdmissionHook, AdmissionOperation, AdmissionRequest, LabelSelector, RawObject, Store,
    StoreError, WatchEvent, WatchEventType, json_merge_patch,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

const WATCH_BUFFER: usize = 256;

#[derive(Default)]
struct Inner {
    /// kind → (namespace/name → record).
    objects: HashMap<String, std::collections::BTreeMap<String, RawObject>>,
    next_resource_version: u64,
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// Concurrency-safe in-memory store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    watchers: Mutex<HashMap<String, broadcast::Sender<WatchEvent>>>,
    admission: RwLock<Option<Arc<dyn AdmissionHook>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with no admission hook.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            watchers: Mutex::new(HashMap::new()),
            admission: RwLock::new(None),
        }
    }

    /// Install the admission hook consulted before create/update/delete.
    pub fn set_admission(&self, hook: Arc<dyn AdmissionHook>) {
        *self.admission.write().unwrap() = Some(hook);
    }

    fn admission_hook(&self) -> Option<Arc<dyn AdmissionHook>> {
        self.admission.read().unwrap().clone()
    }

    async fn review(
        &self,
        operation: AdmissionOperation,
        kind: &str,
        object: Option<&RawObject>,
        old_object: Option<&RawObject>,
    ) -> Result<Vec<String>, StoreError> {
        let Some(hook) = self.admission_hook() else {
            return Ok(Vec::new());
        };
        let request = AdmissionRequest {
            operation,
            kind: kind.to_string(),
            object: object.cloned(),
            old_object: old_object.cloned(),
        };
        let response = hook.review(self, &request).await;
        if response.allowed {
            for warning in &response.warnings {
                warn!(kind, warning, "admission warning");
            }
            return Ok(response.warnings);
        }
        let denial = response.denial.unwrap_or(crate::AdmissionDenial {
            rule: "unknown".to_string(),
            message: "admission denied".to_string(),
            upgrade_hint: None,
        });
        let key = object
            .or(old_object)
            .map(RawObject::object_key)
            .unwrap_or_default();
        Err(StoreError::AdmissionDenied {
            kind: kind.to_string(),
            key,
            rule: denial.rule,
            message: denial.message,
        })
    }

    fn publish(&self, event_type: WatchEventType, object: RawObject) {
        let watchers = self.watchers.lock().unwrap();
        if let Some(tx) = watchers.get(&object.kind) {
            // Send only fails when there are no receivers; that is fine.
            let _ = tx.send(WatchEvent { event_type, object });
        }
    }

    fn sync_content_metadata(object: &mut RawObject) {
        if let Some(map) = object.content.as_object_mut() {
            if let Ok(meta) = serde_json::to_value(&object.metadata) {
                map.insert("metadata".to_string(), meta);
            }
        }
    }

    /// Children controlled (via owner references) by the given uid, across
    /// all kinds.
    fn controlled_children(inner: &Inner, owner_uid: Uuid) -> Vec<RawObject> {
        inner
            .objects
            .values()
            .flat_map(|records| records.values())
            .filter(|o| o.metadata.is_controlled_by(owner_uid))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RawObject>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .get(kind)
            .and_then(|records| records.get(&format!("{namespace}/{name}")))
            .cloned())
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<RawObject>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let Some(records) = inner.objects.get(kind) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter(|o| namespace.is_none_or(|ns| o.metadata.namespace == ns))
            .filter(|o| selector.matches(&o.metadata.labels))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: RawObject) -> Result<RawObject, StoreError> {
        let existing = self
            .get(&object.kind, &object.metadata.namespace, &object.metadata.name)
            .await?;
        if let Some(existing) = existing {
            return Err(StoreError::AlreadyExists {
                key: existing.object_key(),
                kind: existing.kind,
            });
        }
        self.review(AdmissionOperation::Create, &object.kind.clone(), Some(&object), None)
            .await?;

        let mut inner = self.inner.lock().unwrap();
        object.metadata.uid = Some(Uuid::new_v4());
        object.metadata.resource_version = Some(inner.bump_rv());
        object.metadata.generation = 1;
        object.metadata.creation_timestamp = Some(Utc::now());
        Self::sync_content_metadata(&mut object);

        let key = object.object_key();
        inner
            .objects
            .entry(object.kind.clone())
            .or_default()
            .insert(key, object.clone());
        drop(inner);

        debug!(kind = %object.kind, key = %object.object_key(), "created");
        self.publish(WatchEventType::Added, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: RawObject) -> Result<RawObject, StoreError> {
        let stored = self
            .get(&object.kind, &object.metadata.namespace, &object.metadata.name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: object.kind.clone(),
                key: object.object_key(),
            })?;
        if object.metadata.resource_version != stored.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: object.kind.clone(),
                key: object.object_key(),
                observed: object.metadata.resource_version.clone(),
            });
        }
        self.review(
            AdmissionOperation::Update,
            &object.kind.clone(),
            Some(&object),
            Some(&stored),
        )
        .await?;

        let mut inner = self.inner.lock().unwrap();
        let spec_changed = object.spec() != stored.spec();

        // A spec write never touches status.
        if let (Some(map), Some(status)) = (object.content.as_object_mut(), stored.status()) {
            map.insert("status".to_string(), status.clone());
        }

        object.metadata.uid = stored.metadata.uid;
        object.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        object.metadata.generation = if spec_changed {
            stored.metadata.generation + 1
        } else {
            stored.metadata.generation
        };
        object.metadata.resource_version = Some(inner.bump_rv());
        Self::sync_content_metadata(&mut object);

        let key = object.object_key();
        inner
            .objects
            .entry(object.kind.clone())
            .or_default()
            .insert(key, object.clone());
        drop(inner);

        self.publish(WatchEventType::Modified, object.clone());
        Ok(object)
    }

    async fn update_status(&self, object: RawObject) -> Result<RawObject, StoreError> {
        let mut stored = self
            .get(&object.kind, &object.metadata.namespace, &object.metadata.name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: object.kind.clone(),
                key: object.object_key(),
            })?;
        if object.metadata.resource_version != stored.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: object.kind.clone(),
                key: object.object_key(),
                observed: object.metadata.resource_version.clone(),
            });
        }

        let mut inner = self.inner.lock().unwrap();
        // A status write replaces only the status payload.
        if let Some(map) = stored.content.as_object_mut() {
            match object.status() {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(inner.bump_rv());
        Self::sync_content_metadata(&mut stored);

        let key = stored.object_key();
        inner
            .objects
            .entry(stored.kind.clone())
            .or_default()
            .insert(key, stored.clone());
        drop(inner);

        self.publish(WatchEventType::Modified, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<RawObject, StoreError> {
        let mut stored =
            self.get(kind, namespace, name)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    kind: kind.to_string(),
                    key: format!("{namespace}/{name}"),
                })?;

        let mut inner = self.inner.lock().unwrap();
        let spec_before = stored.spec().cloned();
        json_merge_patch(&mut stored.content, &patch);
        if stored.spec().cloned() != spec_before {
            stored.metadata.generation += 1;
        }
        stored.metadata.resource_version = Some(inner.bump_rv());
        Self::sync_content_metadata(&mut stored);

        let key = stored.object_key();
        inner
            .objects
            .entry(stored.kind.clone())
            .or_default()
            .insert(key, stored.clone());
        drop(inner);

        self.publish(WatchEventType::Modified, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        let stored = self
            .get(kind, namespace, name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.to_string(),
                key: format!("{namespace}/{name}"),
            })?;
        self.review(AdmissionOperation::Delete, kind, None, Some(&stored)).await?;

        let mut deleted = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(records) = inner.objects.get_mut(kind) {
                if let Some(object) = records.remove(&format!("{namespace}/{name}")) {
                    deleted.push(object);
                }
            }

            // Owner-reference cascade: removal of a controller removes its
            // children, transitively. Cascaded deletes skip admission.
            let mut frontier: Vec<Uuid> =
                deleted.iter().filter_map(|o| o.metadata.uid).collect();
            while let Some(owner_uid) = frontier.pop() {
                for child in Self::controlled_children(&inner, owner_uid) {
                    let removed = inner
                        .objects
                        .get_mut(&child.kind)
                        .and_then(|records| records.remove(&child.object_key()));
                    if let Some(object) = removed {
                        if let Some(uid) = object.metadata.uid {
                            frontier.push(uid);
                        }
                        deleted.push(object);
                    }
                }
            }
        }

        for object in deleted {
            debug!(kind = %object.kind, key = %object.object_key(), "deleted");
            self.publish(WatchEventType::Deleted, object);
        }
        Ok(())
    }

    fn watch(&self, kind: &str) -> BoxStream<'static, WatchEvent> {
        let mut watchers = self.watchers.lock().unwrap();
        let tx = watchers
            .entry(kind.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_BUFFER).0);
        let stream = BroadcastStream::new(tx.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "watch consumer lagged; events dropped");
                None
            }
        });
        Box::pin(stream)
    }
}
