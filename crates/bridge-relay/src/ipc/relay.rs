//! # Proxy Relay
//!
//! Runs in the content context between one untrusted document and the
//! privileged context.
//!
//! ```text
//!  page ── window bus ──▶ relay ── gate ──▶ PrivilegedLink ──▶ background
//!   ▲                       │                                      │
//!   └───── response ────────┴──────────── reply ◀──────────────────┘
//!
//!  background ── runtime bus (broadcast) ──▶ relay ── gate ──▶ window bus
//! ```
//!
//! The `sender` field is never used for authorization. Every forwarded request
//! carries the relay's own document origin, overwriting whatever the page
//! wrote.

use crate::adapters::WindowTransport;
use crate::domain::gate::{is_exempt, AccessGate};
use crate::ports::PrivilegedLink;
use bridge_bus::{BusMessage, EventFilter, InMemoryBus, Subscription, Topic, WindowMessage};
use bridge_types::{ApiError, Broadcast, Envelope, Request, Response, Sender};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub forwarded: AtomicU64,
    pub refused: AtomicU64,
    /// Forwarding failed; the page got an internal error
    pub failed: AtomicU64,
    /// Cross-talk, foreign frames, and broadcasts failing the gate
    pub dropped: AtomicU64,
    pub broadcasts: AtomicU64,
}

pub struct ProxyRelay {
    origin: String,
    window: WindowTransport,
    privileged: Arc<dyn PrivilegedLink>,
    gate: Arc<dyn AccessGate>,
    stats: RelayStats,
}

impl ProxyRelay {
    pub fn new(
        window: Arc<InMemoryBus>,
        origin: impl Into<String>,
        privileged: Arc<dyn PrivilegedLink>,
        gate: Arc<dyn AccessGate>,
    ) -> Arc<Self> {
        let origin = origin.into();
        Arc::new(Self {
            window: WindowTransport::new(window, origin.clone()),
            origin,
            privileged,
            gate,
            stats: RelayStats::default(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Start both listener loops.
    ///
    /// Subscriptions are taken before returning, so nothing posted after
    /// `spawn` returns is missed.
    pub fn spawn(self: &Arc<Self>, window: &InMemoryBus, runtime: &InMemoryBus) -> RelayHandle {
        let page_sub = window.subscribe(EventFilter::topics(vec![Topic::Window]));
        let runtime_sub = runtime.subscribe(EventFilter::topics(vec![Topic::Runtime]));

        let page = tokio::spawn(self.clone().page_loop(page_sub));
        let extension = tokio::spawn(self.clone().extension_loop(runtime_sub));
        debug!(origin = %self.origin, "Relay started");
        RelayHandle { page, extension }
    }

    async fn page_loop(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(message) = subscription.recv().await {
            if let BusMessage::Window(message) = message {
                self.on_page_message(message);
            }
        }
    }

    async fn extension_loop(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(message) = subscription.recv().await {
            if let BusMessage::Runtime(message) = message {
                // Inline, so broadcasts keep their order.
                self.on_extension_message(&message).await;
            }
        }
    }

    /// Classify a window message; page requests are handled concurrently.
    fn on_page_message(self: &Arc<Self>, message: WindowMessage) {
        if message.source_origin != self.origin {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(source = %message.source_origin, "Ignoring message from foreign frame");
            return;
        }
        match Envelope::decode(&message.data) {
            Ok(Envelope::Request(request)) if request.sender == Sender::Page => {
                let relay = self.clone();
                tokio::spawn(async move {
                    if let Some(reply) = relay.process_request(request).await {
                        relay.window.post(reply);
                    }
                });
            }
            // Our own responses and re-emitted broadcasts echo back here.
            Ok(_) => {}
            Err(reason) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(reason = %reason, "Ignoring non-protocol window message");
            }
        }
    }

    /// Gate and forward one page request; returns what to post back.
    ///
    /// Requests without a correlation id are forwarded but get no reply,
    /// since the page could not match one.
    pub async fn process_request(&self, mut request: Request) -> Option<Value> {
        request.origin = Some(self.origin.clone());
        let correlation_id = request.correlation_id.clone();

        if !is_exempt(&request.method) {
            let allowed = match self.gate.check(&self.origin).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(origin = %self.origin, error = %e, "Gate check failed");
                    false
                }
            };
            if !allowed {
                self.stats.refused.fetch_add(1, Ordering::Relaxed);
                warn!(origin = %self.origin, method = %request.method, "Request refused");
                let id = correlation_id?;
                let refused = Response::error(id, ApiError::refused("origin not allowed"));
                return Some(Envelope::Response(refused).to_value());
            }
        }

        let method = request.method.clone();
        let outcome = self
            .privileged
            .forward(Envelope::Request(request).to_value())
            .await;
        let id = correlation_id?;

        match outcome {
            Ok(reply) => match Envelope::decode(&reply) {
                Ok(Envelope::Response(response)) if response.correlation_id == id => {
                    self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                    debug!(correlation_id = %id, method = %method, "Relayed response");
                    Some(reply)
                }
                _ => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(correlation_id = %id, method = %method, "Privileged reply is not a matching response");
                    let internal = Response::error(id, ApiError::internal("malformed reply"));
                    Some(Envelope::Response(internal).to_value())
                }
            },
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(correlation_id = %id, method = %method, error = %e, "Forwarding failed");
                let internal = Response::error(id, ApiError::internal(e.to_string()));
                Some(Envelope::Response(internal).to_value())
            }
        }
    }

    /// Re-emit a privileged broadcast into the page if the gate allows it.
    pub async fn on_extension_message(&self, message: &Value) -> bool {
        let broadcast = match Envelope::decode(message) {
            Ok(Envelope::Broadcast(b)) if b.sender == Sender::Extension => b,
            _ => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring runtime message that is not a broadcast");
                return false;
            }
        };

        match self.gate.check(&self.origin).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = %broadcast.event, origin = %self.origin, "Broadcast withheld");
                return false;
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let event = Broadcast {
            origin: Some(self.origin.clone()),
            ..broadcast
        };
        self.window.post(Envelope::Broadcast(event).to_value());
        true
    }
}

/// Running relay loops; dropping the handle stops them.
pub struct RelayHandle {
    page: JoinHandle<()>,
    extension: JoinHandle<()>,
}

impl RelayHandle {
    pub fn shutdown(&self) {
        self.page.abort();
        self.extension.abort();
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
