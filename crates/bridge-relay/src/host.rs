//! # Extension Host
//!
//! The privileged context's dispatcher: takes requests off the runtime inbox,
//! looks up the capability handler for the method and hands it a [`Respond`]
//! that must be used exactly once.

use async_trait::async_trait;
use bridge_bus::{BusMessage, IncomingMessage, InMemoryBus, ReplyHandle};
use bridge_types::{ApiError, Broadcast, CorrelationId, Envelope, Request, Sender, WireEnvelope};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Answers one request. Consuming it sends the response; dropping it
/// unanswered sends an internal error instead.
pub struct Respond {
    reply: Option<ReplyHandle>,
    correlation_id: Option<CorrelationId>,
    method: String,
}

impl Respond {
    fn new(reply: ReplyHandle, correlation_id: Option<CorrelationId>, method: String) -> Self {
        Self {
            reply: Some(reply),
            correlation_id,
            method,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn data(self, data: Value) {
        self.respond(Ok(data));
    }

    pub fn error(self, error: ApiError) {
        self.respond(Err(error));
    }

    pub fn respond(mut self, outcome: Result<Value, ApiError>) {
        if let Some(reply) = self.reply.take() {
            let message = self.encode(outcome);
            if !reply.send(message) {
                debug!(method = %self.method, "Requester stopped waiting");
            }
        }
    }

    fn encode(&self, outcome: Result<Value, ApiError>) -> Value {
        let (data, error) = match outcome {
            Ok(data) => (Some(data), None),
            Err(error) => (None, Some(error.to_value())),
        };
        WireEnvelope {
            data,
            error,
            correlation_id: self.correlation_id.clone().map(String::from),
            ..WireEnvelope::addressed(Sender::Extension)
        }
        .to_value()
    }
}

impl Drop for Respond {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            warn!(method = %self.method, "Handler dropped its responder unanswered");
            let message = self.encode(Err(ApiError::internal("handler did not respond")));
            let _ = reply.send(message);
        }
    }
}

/// A privileged capability.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, request: Request, respond: Respond);
}

/// Adapts an async function returning the outcome into a handler.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ApiError>> + Send,
{
    async fn handle(&self, request: Request, respond: Respond) {
        respond.respond((self.0)(request).await);
    }
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ApiError>> + Send,
{
    FnHandler(f)
}

/// `method name -> handler`.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered for `method`, if any.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: impl CapabilityHandler + 'static,
    ) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.insert(method.into(), Arc::new(handler))
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

#[derive(Debug, Default)]
pub struct HostStats {
    pub dispatched: AtomicU64,
    pub unknown_methods: AtomicU64,
    pub ignored: AtomicU64,
    pub broadcasts: AtomicU64,
}

/// Dispatches runtime messages to capability handlers.
pub struct ExtensionHost {
    handlers: HandlerTable,
    runtime_bus: Arc<InMemoryBus>,
    stats: HostStats,
}

impl ExtensionHost {
    pub fn new(handlers: HandlerTable, runtime_bus: Arc<InMemoryBus>) -> Arc<Self> {
        info!(methods = ?handlers.methods(), "Extension host ready");
        Arc::new(Self {
            handlers,
            runtime_bus,
            stats: HostStats::default(),
        })
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    /// Serve the inbox until every sender is gone. Each message is handled
    /// in its own task.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<IncomingMessage>) {
        while let Some(incoming) = inbox.recv().await {
            let host = self.clone();
            tokio::spawn(async move { host.dispatch(incoming).await });
        }
        info!("Extension host inbox closed");
    }

    /// Handle one runtime message.
    pub async fn dispatch(&self, incoming: IncomingMessage) {
        let (message, sender, reply) = incoming.into_parts();
        let mut request = match Envelope::decode(&message) {
            Ok(Envelope::Request(request)) => request,
            Ok(_) | Err(_) => {
                // Dropping the reply handle tells the sender nobody answered.
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring runtime message that is not a request");
                return;
            }
        };

        // Host provenance wins over whatever the message claims.
        if let Some(origin) = sender.origin {
            request.origin = Some(origin);
        }

        let respond = Respond::new(reply, request.correlation_id.clone(), request.method.clone());
        match self.handlers.get(&request.method) {
            Some(handler) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(method = %request.method, origin = ?request.origin, "Dispatching");
                handler.handle(request, respond).await;
            }
            None => {
                self.stats.unknown_methods.fetch_add(1, Ordering::Relaxed);
                warn!(method = %request.method, "Unknown method");
                let info = format!("unknown method {}", request.method);
                respond.error(ApiError::invalid_request(info));
            }
        }
    }

    /// Notify every content context.
    pub fn broadcast(&self, event: &str, data: Option<Value>) -> usize {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let message = Envelope::Broadcast(Broadcast::new(event, data)).to_value();
        self.runtime_bus.publish_now(BusMessage::Runtime(message))
    }
}
