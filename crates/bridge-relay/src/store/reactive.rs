//! # Reactive Store
//!
//! A cached, observable view of one durable key shared by every context.
//!
//! ## Write path
//!
//! `set` is a read-modify-write against durable storage, serialized per
//! instance. A failed put is retried once; after that the write fails with
//! [`BridgeError::Transport`]. On success the cache is updated, local
//! subscribers are notified if the value changed, and a [`StoreChange`] with a
//! fresh stamp goes out on the bus.
//!
//! ## Coherency
//!
//! Each instance remembers the last stamp it applied (its own writes
//! included). A change with a different stamp triggers a reload; only a
//! reloaded value that differs from the cache notifies subscribers.
//! Reloads are serialized with local writes.

use super::backend::{KvBackend, StorageError};
use bridge_bus::{
    BusMessage, ChangeStamp, EventFilter, InMemoryBus, ListenerId, ListenerRegistry, StoreChange,
    Topic,
};
use bridge_types::BridgeError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Values a [`ReactiveStore`] can hold.
pub trait StoreValue: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

/// New value for [`ReactiveStore::set`]: either a value or an updater.
pub enum Update<T> {
    Replace(T),
    With(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> Update<T> {
    pub fn with(f: impl FnOnce(&T) -> T + Send + 'static) -> Self {
        Update::With(Box::new(f))
    }

    fn apply(self, current: &T) -> T {
        match self {
            Update::Replace(value) => value,
            Update::With(f) => f(current),
        }
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Update::Replace(value)
    }
}

impl<T> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Replace(_) => f.write_str("Update::Replace"),
            Update::With(_) => f.write_str("Update::With"),
        }
    }
}

struct StoreState<T> {
    cached: Option<T>,
    last_stamp: Option<ChangeStamp>,
}

/// Observable cache of one durable key.
pub struct ReactiveStore<T> {
    key: String,
    fallback: T,
    backend: Arc<dyn KvBackend>,
    bus: Arc<InMemoryBus>,
    state: Mutex<StoreState<T>>,
    write_lock: tokio::sync::Mutex<()>,
    listeners: ListenerRegistry<T>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: StoreValue> ReactiveStore<T> {
    /// Open the store and start loading the durable value in the background.
    ///
    /// Must be called inside a tokio runtime. Until the load finishes,
    /// [`get_snapshot`](Self::get_snapshot) returns `None`.
    pub fn open(
        key: impl Into<String>,
        fallback: T,
        backend: Arc<dyn KvBackend>,
        bus: Arc<InMemoryBus>,
    ) -> Arc<Self> {
        let store = Arc::new(Self {
            key: key.into(),
            fallback,
            backend,
            bus: bus.clone(),
            state: Mutex::new(StoreState {
                cached: None,
                last_stamp: None,
            }),
            write_lock: tokio::sync::Mutex::new(()),
            listeners: ListenerRegistry::new(),
            task: Mutex::new(None),
        });

        // Subscribe before spawning so no change published meanwhile is lost.
        let subscription = bus.subscribe(EventFilter::topics(vec![Topic::Store]));
        let weak = Arc::downgrade(&store);
        let handle = tokio::spawn(async move {
            if let Some(store) = weak.upgrade() {
                store.load().await;
            }
            watch_changes(weak, subscription).await;
        });
        *store.task.lock() = Some(handle);
        store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached value, or `None` before the first load completes.
    pub fn get_snapshot(&self) -> Option<T> {
        self.state.lock().cached.clone()
    }

    /// Current value: the cache if loaded, else the durable value, else the
    /// fallback. Never fails.
    pub async fn get(&self) -> T {
        if let Some(value) = self.get_snapshot() {
            return value;
        }
        self.load().await
    }

    /// Write a value or apply an updater to the current one.
    pub async fn set(&self, update: impl Into<Update<T>>) -> Result<(), BridgeError> {
        let update = update.into();
        let _guard = self.write_lock.lock().await;

        let before = self.get_snapshot();
        let current = match self.read_durable().await {
            Ok(Some(value)) => value,
            Ok(None) => before.clone().unwrap_or_else(|| self.fallback.clone()),
            Err(e) => {
                debug!(key = %self.key, error = %e, "Read before write failed, using cache");
                before.clone().unwrap_or_else(|| self.fallback.clone())
            }
        };
        let next = update.apply(&current);

        let encoded = serde_json::to_value(&next)
            .map_err(|e| BridgeError::Transport(format!("encode {}: {e}", self.key)))?;
        self.put_with_retry(encoded).await?;

        let stamp = ChangeStamp::new();
        {
            let mut state = self.state.lock();
            state.cached = Some(next.clone());
            state.last_stamp = Some(stamp.clone());
        }

        if before.as_ref() != Some(&next) {
            self.listeners.emit(&next);
        }
        self.bus.publish_now(BusMessage::StoreChanged(StoreChange {
            key: self.key.clone(),
            stamp,
        }));
        Ok(())
    }

    /// Register a listener for value changes.
    ///
    /// The listener stays registered until the returned guard is dropped or
    /// [`StoreSubscription::unsubscribe`] is called.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> StoreSubscription<T> {
        let id = self.listeners.add(listener);
        StoreSubscription {
            listeners: self.listeners.clone(),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Apply a change notification from any context.
    ///
    /// Returns `true` if the cache changed and subscribers were notified.
    pub async fn apply_remote_change(&self, change: &StoreChange) -> bool {
        if change.key != self.key {
            return false;
        }
        // Held through the reload so a local write cannot land between the
        // read and the cache update.
        let _guard = self.write_lock.lock().await;
        {
            let mut state = self.state.lock();
            if state.last_stamp.as_ref() == Some(&change.stamp) {
                return false;
            }
            state.last_stamp = Some(change.stamp.clone());
        }

        let reloaded = match self.read_durable().await {
            Ok(Some(value)) => value,
            Ok(None) => return false,
            Err(e) => {
                debug!(key = %self.key, error = %e, "Reload after change failed");
                return false;
            }
        };

        let changed = {
            let mut state = self.state.lock();
            if state.cached.as_ref() == Some(&reloaded) {
                false
            } else {
                state.cached = Some(reloaded.clone());
                true
            }
        };
        if changed {
            debug!(key = %self.key, stamp = %change.stamp, "Applied remote change");
            self.listeners.emit(&reloaded);
        }
        changed
    }

    async fn load(&self) -> T {
        match self.read_durable().await {
            Ok(Some(value)) => {
                let mut state = self.state.lock();
                // A local write may have landed while the read was in flight.
                state.cached.get_or_insert(value).clone()
            }
            Ok(None) => {
                let mut state = self.state.lock();
                state.cached.get_or_insert_with(|| self.fallback.clone()).clone()
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "Load failed, using fallback");
                self.fallback.clone()
            }
        }
    }

    async fn read_durable(&self) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.key).await? {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| StorageError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put_with_retry(&self, encoded: serde_json::Value) -> Result<(), BridgeError> {
        if let Err(first) = self.backend.put(&self.key, encoded.clone()).await {
            warn!(key = %self.key, error = %first, "Store write failed, retrying once");
            self.backend.put(&self.key, encoded).await.map_err(|e| {
                warn!(key = %self.key, error = %e, "Store write failed after retry");
                BridgeError::Transport(format!("write {}: {e}", self.key))
            })?;
        }
        Ok(())
    }
}

impl<T> Drop for ReactiveStore<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn watch_changes<T: StoreValue>(
    store: Weak<ReactiveStore<T>>,
    mut subscription: bridge_bus::Subscription,
) {
    while let Some(message) = subscription.recv().await {
        let BusMessage::StoreChanged(change) = message else {
            continue;
        };
        let Some(store) = store.upgrade() else {
            break;
        };
        store.apply_remote_change(&change).await;
    }
}

/// Keeps a store listener registered while alive.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct StoreSubscription<T> {
    listeners: ListenerRegistry<T>,
    id: ListenerId,
}

impl<T> StoreSubscription<T> {
    pub fn unsubscribe(self) {}
}

impl<T> Drop for StoreSubscription<T> {
    fn drop(&mut self) {
        self.listeners.remove(self.id);
    }
}
