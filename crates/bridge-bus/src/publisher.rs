//! # Bus Publisher
//!
//! Defines the publishing side of the broadcast bus.

use crate::events::{BusMessage, EventFilter};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Trait for publishing messages to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a message; returns the number of live receivers.
    async fn publish(&self, message: BusMessage) -> usize;

    /// Total number of messages published so far.
    fn messages_published(&self) -> u64;
}

/// In-memory broadcast bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer delivery
/// in publish order. Every subscriber sees every message of its topics,
/// including its own.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,

    /// Active subscription count by filter.
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    messages_published: AtomicU64,

    capacity: usize,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            messages_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to messages matching a filter.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let topic_key = format!("{:?}", filter.topics);

        *self.subscriptions.write().entry(topic_key.clone()).or_insert(0) += 1;

        debug!(topics = ?filter.topics, "New bus subscription");

        Subscription::new(receiver, filter, self.subscriptions.clone(), topic_key)
    }

    /// Publish without going through the async trait.
    pub fn publish_now(&self, message: BusMessage) -> usize {
        let topic = message.topic();
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(message) {
            Ok(receivers) => {
                debug!(topic = ?topic, receivers, "Bus message published");
                receivers
            }
            Err(_) => {
                // Nobody listening is normal for a page without the relay.
                debug!(topic = ?topic, "Bus message dropped (no receivers)");
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, message: BusMessage) -> usize {
        self.publish_now(message)
    }

    fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}
