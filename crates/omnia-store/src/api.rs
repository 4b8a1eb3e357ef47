//! Typed API handle over a raw [`Store`].

use crate::{LabelSelector, RawObject, Store, StoreError, WatchEventType};
use futures::StreamExt;
use futures::stream::BoxStream;
use omnia_core::Object;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed change event.
#[derive(Debug, Clone)]
pub struct TypedWatchEvent<K> {
    /// Flavour of the change.
    pub event_type: WatchEventType,
    /// The typed record.
    pub object: K,
}

/// Typed access to one record kind.
///
/// Cheap to clone; all clones share the underlying store handle.
pub struct Api<K> {
    store: Arc<dyn Store>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _kind: PhantomData,
        }
    }
}

impl<K: Object> Api<K> {
    /// Wrap a raw store handle.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    /// The underlying raw store.
    pub fn raw_store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Fetch one record.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        match self.store.get(K::KIND, namespace, name).await? {
            Some(raw) => Ok(Some(raw.to_typed()?)),
            None => Ok(None),
        }
    }

    /// List records, optionally namespace-restricted.
    pub async fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<K>, StoreError> {
        self.store
            .list(K::KIND, namespace, selector)
            .await?
            .iter()
            .map(RawObject::to_typed)
            .collect()
    }

    /// Create a record.
    pub async fn create(&self, object: &K) -> Result<K, StoreError> {
        let raw = RawObject::from_typed(object)?;
        self.store.create(raw).await?.to_typed()
    }

    /// Replace a record's spec.
    pub async fn update(&self, object: &K) -> Result<K, StoreError> {
        let raw = RawObject::from_typed(object)?;
        self.store.update(raw).await?.to_typed()
    }

    /// Replace a record's status.
    pub async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let raw = RawObject::from_typed(object)?;
        self.store.update_status(raw).await?.to_typed()
    }

    /// Delete a record (cascades to controlled children).
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.store.delete(K::KIND, namespace, name).await
    }

    /// Subscribe to typed change events. Records that fail to deserialise
    /// are skipped.
    pub fn watch(&self) -> BoxStream<'static, TypedWatchEvent<K>> {
        let stream = self.store.watch(K::KIND).filter_map(|event| async move {
            event.object.to_typed().ok().map(|object| TypedWatchEvent {
                event_type: event.event_type,
                object,
            })
        });
        Box::pin(stream)
    }
}
