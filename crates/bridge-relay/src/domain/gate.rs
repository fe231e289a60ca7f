//! Origin gate.
//!
//! Decides whether an origin may use gated operations. The two capability
//! negotiation methods are exempt and always forwarded.

use crate::store::{ReactiveStore, Update};
use async_trait::async_trait;
use bridge_types::BridgeError;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::info;

/// Methods forwarded without consulting the gate.
pub const EXEMPT_METHODS: [&str; 2] = ["isEnabled", "enable"];

pub fn is_exempt(method: &str) -> bool {
    EXEMPT_METHODS.contains(&method)
}

/// `check(origin) -> allowed`. An `Err` is treated exactly like a denial.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn check(&self, origin: &str) -> Result<bool, BridgeError>;
}

/// In-memory allow-list for a single context.
#[derive(Debug, Default)]
pub struct AllowList {
    origins: RwLock<HashSet<String>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: RwLock::new(origins.into_iter().map(Into::into).collect()),
        }
    }

    /// Returns `false` if the origin was already allowed.
    pub fn allow(&self, origin: impl Into<String>) -> bool {
        self.origins.write().insert(origin.into())
    }

    pub fn revoke(&self, origin: &str) -> bool {
        self.origins.write().remove(origin)
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.origins.read().contains(origin)
    }

    pub fn len(&self) -> usize {
        self.origins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccessGate for AllowList {
    async fn check(&self, origin: &str) -> Result<bool, BridgeError> {
        Ok(self.is_allowed(origin))
    }
}

/// Allow-list kept in the durable store.
///
/// Every context opens its own instance over the same key, so an origin
/// approved by the privileged context becomes visible to every relay once
/// the change notification is applied.
pub struct StoredAllowList {
    store: Arc<ReactiveStore<BTreeSet<String>>>,
}

impl StoredAllowList {
    pub fn new(store: Arc<ReactiveStore<BTreeSet<String>>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ReactiveStore<BTreeSet<String>>> {
        &self.store
    }

    pub async fn allow(&self, origin: &str) -> Result<(), BridgeError> {
        let origin = origin.to_string();
        info!(origin = %origin, "Origin allowed");
        self.store
            .set(Update::with(move |current: &BTreeSet<String>| {
                let mut next = current.clone();
                next.insert(origin);
                next
            }))
            .await
    }

    pub async fn revoke(&self, origin: &str) -> Result<(), BridgeError> {
        let origin = origin.to_string();
        info!(origin = %origin, "Origin revoked");
        self.store
            .set(Update::with(move |current: &BTreeSet<String>| {
                let mut next = current.clone();
                next.remove(&origin);
                next
            }))
            .await
    }

    /// Seed origins that must be allowed from the start.
    pub async fn seed<I, S>(&self, origins: I) -> Result<(), BridgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let seeded: Vec<String> = origins.into_iter().map(Into::into).collect();
        if seeded.is_empty() {
            return Ok(());
        }
        self.store
            .set(Update::with(move |current: &BTreeSet<String>| {
                let mut next = current.clone();
                next.extend(seeded);
                next
            }))
            .await
    }
}

#[async_trait]
impl AccessGate for StoredAllowList {
    async fn check(&self, origin: &str) -> Result<bool, BridgeError> {
        Ok(self.store.get().await.contains(origin))
    }
}
