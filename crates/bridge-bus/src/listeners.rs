//! Listener registries for host events.
//!
//! Models the host's `addListener`/`removeListener` surfaces explicitly. Every
//! listener gets a [`ListenerId`]; removal by id succeeds exactly once, so
//! callers can prove they never double-remove or leak a handler.
//!
//! `emit` re-checks registration right before each call: a listener removed
//! by an earlier listener in the same emission is not invoked.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct RegistryInner<E> {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<ListenerId, Listener<E>>>,
}

/// A cloneable set of listeners for events of type `E`.
pub struct ListenerRegistry<E> {
    inner: Arc<RegistryInner<E>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn add(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.inner.listeners.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.inner.listeners.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.listeners.write().clear();
    }

    /// Call every registered listener in registration order.
    ///
    /// No lock is held while a listener runs, so listeners may add or remove
    /// listeners (including themselves). Returns how many were invoked.
    pub fn emit(&self, event: &E) -> usize {
        let ids: Vec<ListenerId> = self.inner.listeners.read().keys().copied().collect();
        let mut invoked = 0;
        for id in ids {
            let listener = self.inner.listeners.read().get(&id).cloned();
            if let Some(listener) = listener {
                listener(event);
                invoked += 1;
            }
        }
        invoked
    }
}

impl<E> Clone for ListenerRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
