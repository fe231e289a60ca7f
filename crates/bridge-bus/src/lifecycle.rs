//! Scope lifecycle (the host's `tabs.onRemoved`).

use crate::listeners::ListenerRegistry;
use crate::port::PortHub;
use bridge_types::ScopeId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Tracks live scopes and announces their destruction.
#[derive(Clone)]
pub struct Tabs {
    on_removed: ListenerRegistry<ScopeId>,
    ports: PortHub,
    live: Arc<Mutex<BTreeSet<ScopeId>>>,
    next_id: Arc<AtomicI64>,
}

impl Tabs {
    /// Scopes whose removal also severs the connections opened from them.
    pub fn new(ports: PortHub) -> Self {
        Self {
            on_removed: ListenerRegistry::new(),
            ports,
            live: Arc::new(Mutex::new(BTreeSet::new())),
            next_id: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Allocate a new scope.
    pub fn create(&self) -> ScopeId {
        let scope = ScopeId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.lock().insert(scope);
        scope
    }

    pub fn is_live(&self, scope: ScopeId) -> bool {
        self.live.lock().contains(&scope)
    }

    pub fn on_removed(&self) -> &ListenerRegistry<ScopeId> {
        &self.on_removed
    }

    /// Destroy a scope.
    ///
    /// Removal listeners run first, then every connection opened from the
    /// scope is severed. Returns `false` if the scope was not live.
    pub fn remove(&self, scope: ScopeId) -> bool {
        if !self.live.lock().remove(&scope) {
            return false;
        }
        info!(scope = %scope, "Scope removed");
        self.on_removed.emit(&scope);
        self.ports.sever_scope(scope);
        true
    }
}
