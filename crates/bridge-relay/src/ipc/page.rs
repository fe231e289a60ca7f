//! The untrusted page's side of the bridge.

use crate::adapters::WindowTransport;
use crate::domain::pending::PendingRequestStore;
use crate::ipc::engine::{CorrelationEngine, Incoming};
use bridge_bus::{BusMessage, EventFilter, InMemoryBus, ListenerId, ListenerRegistry, Topic};
use bridge_types::{BridgeError, Broadcast, Envelope, Request, Sender};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Request API exposed to page scripts.
///
/// Requests go out on the window bus; responses and broadcasts come back on
/// it. Only messages the host attributes to this page's own origin are
/// considered.
pub struct PageClient {
    origin: String,
    engine: Arc<CorrelationEngine>,
    events: ListenerRegistry<Broadcast>,
    listener: JoinHandle<()>,
}

impl PageClient {
    /// Attach to a document's window bus and start listening.
    pub fn spawn(
        window: Arc<InMemoryBus>,
        origin: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let origin = origin.into();
        let transport = Arc::new(WindowTransport::new(window.clone(), origin.clone()));
        let engine = Arc::new(CorrelationEngine::new(
            Sender::Page,
            Arc::new(PendingRequestStore::new(request_timeout)),
            transport,
        ));
        let events = ListenerRegistry::new();

        let mut subscription = window.subscribe(EventFilter::topics(vec![Topic::Window]));
        let listener = {
            let engine = engine.clone();
            let events = events.clone();
            let origin = origin.clone();
            tokio::spawn(async move {
                while let Some(message) = subscription.recv().await {
                    let BusMessage::Window(message) = message else {
                        continue;
                    };
                    if message.source_origin != origin {
                        debug!(source = %message.source_origin, "Ignoring foreign window message");
                        continue;
                    }
                    if let Incoming::Other(Envelope::Broadcast(broadcast)) =
                        engine.on_incoming(&message.data)
                    {
                        if broadcast.sender == Sender::Extension {
                            events.emit(&broadcast);
                        }
                    }
                }
            })
        };

        Self {
            origin,
            engine,
            events,
            listener,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Invoke `method` on the privileged side.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        self.engine.send(Request::new(method, params)).await
    }

    /// Like [`request`](Self::request) with an explicit deadline.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.engine
            .send_with_timeout(Request::new(method, params), Some(timeout))
            .await
    }

    /// Listen for broadcasts from the privileged side.
    pub fn on_event(&self, listener: impl Fn(&Broadcast) + Send + Sync + 'static) -> ListenerId {
        self.events.add(listener)
    }

    pub fn off_event(&self, id: ListenerId) -> bool {
        self.events.remove(id)
    }

    pub fn pending_requests(&self) -> usize {
        self.engine.pending().pending_count()
    }

    /// The correlation table, for sweeping with
    /// [`cleanup_task`](crate::domain::cleanup_task).
    pub fn pending_store(&self) -> Arc<PendingRequestStore> {
        self.engine.pending().clone()
    }

    /// Stop listening and reject anything still outstanding.
    pub fn shutdown(&self) {
        self.listener.abort();
        self.engine.teardown();
    }
}

impl Drop for PageClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
