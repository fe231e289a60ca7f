//! # Bus Messages
//!
//! What travels over the shared broadcast bus, grouped by topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Topic a bus message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `window.postMessage` traffic inside one document.
    Window,
    /// Broadcasts from the privileged context to every content context.
    Runtime,
    /// Durable-store invalidations.
    Store,
}

/// A window message with the origin the transport attributes to its source.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    /// Origin of the document that posted the message, set by the host.
    pub source_origin: String,
    pub data: Value,
}

impl WindowMessage {
    pub fn new(source_origin: impl Into<String>, data: Value) -> Self {
        Self {
            source_origin: source_origin.into(),
            data,
        }
    }
}

/// Stamp deduplicating cross-context store invalidations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeStamp(String);

impl ChangeStamp {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ChangeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// "Key `key` changed; reload it."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub stamp: ChangeStamp,
}

/// Everything carried by [`crate::InMemoryBus`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Window(WindowMessage),
    Runtime(Value),
    StoreChanged(StoreChange),
}

impl BusMessage {
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Window(_) => Topic::Window,
            Self::Runtime(_) => Topic::Runtime,
            Self::StoreChanged(_) => Topic::Store,
        }
    }
}

/// Topic filter for subscriptions. Empty means every topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub topics: Vec<Topic>,
}

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn topics(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    #[must_use]
    pub fn matches(&self, message: &BusMessage) -> bool {
        self.topics.is_empty() || self.topics.contains(&message.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::all();
        assert!(filter.matches(&BusMessage::Runtime(Value::Null)));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topics(vec![Topic::Store]);
        let change = BusMessage::StoreChanged(StoreChange {
            key: "accounts".into(),
            stamp: ChangeStamp::new(),
        });
        assert!(filter.matches(&change));
        assert!(!filter.matches(&BusMessage::Window(WindowMessage::new(
            "https://a.example",
            Value::Null
        ))));
    }

    #[test]
    fn test_stamps_are_unique() {
        assert_ne!(ChangeStamp::new(), ChangeStamp::new());
    }
}
