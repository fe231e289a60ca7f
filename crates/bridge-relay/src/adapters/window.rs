//! Window bus as an [`EnvelopeTransport`].

use crate::ports::EnvelopeTransport;
use async_trait::async_trait;
use bridge_bus::{BusMessage, InMemoryBus, WindowMessage};
use bridge_types::BridgeError;
use serde_json::Value;
use std::sync::Arc;

/// Posts envelopes into one document's window bus.
///
/// The host stamps `origin` as the source origin of every message; the
/// sending code cannot choose it.
#[derive(Clone)]
pub struct WindowTransport {
    bus: Arc<InMemoryBus>,
    origin: String,
}

impl WindowTransport {
    pub fn new(bus: Arc<InMemoryBus>, origin: impl Into<String>) -> Self {
        Self {
            bus,
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn post(&self, message: Value) -> usize {
        self.bus
            .publish_now(BusMessage::Window(WindowMessage::new(self.origin.clone(), message)))
    }
}

#[async_trait]
impl EnvelopeTransport for WindowTransport {
    /// Never fails: a window post with no listener is simply unseen.
    async fn dispatch(&self, message: Value) -> Result<(), BridgeError> {
        self.post(message);
        Ok(())
    }
}
