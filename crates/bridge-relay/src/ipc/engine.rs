//! Request correlation over a fire-and-forget transport.

use crate::domain::pending::PendingRequestStore;
use crate::ports::EnvelopeTransport;
use bridge_types::{
    BridgeError, CorrelationId, Envelope, MalformedEnvelope, Request, Sender,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What became of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A response that settled one of our requests.
    Resolved(CorrelationId),
    /// A response nobody is waiting for; dropped.
    Unmatched(CorrelationId),
    /// Not a response for us; hand it to the non-response consumer.
    Other(Envelope),
    /// Cross-talk or garbage; dropped.
    Ignored(MalformedEnvelope),
}

/// Sends requests and matches responses to them.
pub struct CorrelationEngine {
    sender: Sender,
    pending: Arc<PendingRequestStore>,
    transport: Arc<dyn EnvelopeTransport>,
}

impl CorrelationEngine {
    /// `sender` is the side this engine speaks for; responses it sent itself
    /// are never matched.
    pub fn new(
        sender: Sender,
        pending: Arc<PendingRequestStore>,
        transport: Arc<dyn EnvelopeTransport>,
    ) -> Self {
        Self {
            sender,
            pending,
            transport,
        }
    }

    pub fn pending(&self) -> &Arc<PendingRequestStore> {
        &self.pending
    }

    /// Send a request with the store's default deadline.
    pub async fn send(&self, request: Request) -> Result<Value, BridgeError> {
        self.send_with_timeout(request, None).await
    }

    /// Send a request and wait for its response.
    ///
    /// Uses the request's correlation id if it has one, else generates a
    /// fresh one. Resolves exactly once: with the response data, the decoded
    /// error payload, or [`BridgeError::Timeout`] at the deadline.
    pub async fn send_with_timeout(
        &self,
        mut request: Request,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let (correlation_id, rx) =
            self.pending
                .register(&request.method, request.correlation_id.take(), timeout)?;
        let _abandon = AbandonGuard {
            pending: &self.pending,
            correlation_id: correlation_id.clone(),
        };
        let deadline = self.pending.effective_timeout(timeout);

        debug!(
            correlation_id = %correlation_id,
            method = %request.method,
            "Sending request"
        );

        request.correlation_id = Some(correlation_id.clone());
        request.sender = self.sender;
        // On failure the guard drops the pending entry.
        self.transport
            .dispatch(Envelope::Request(request).to_value())
            .await?;

        let settled = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    // A response racing the deadline finds nothing to settle.
                    self.pending.expire(&correlation_id);
                    return Err(BridgeError::Timeout(deadline));
                }
            },
            None => rx.await,
        };

        settled.unwrap_or_else(|_| Err(BridgeError::Transport("request abandoned".into())))
    }

    /// Route one inbound message.
    ///
    /// Responses matching a pending request settle it; malformed messages and
    /// unmatched responses are dropped at debug level.
    pub fn on_incoming(&self, message: &Value) -> Incoming {
        let envelope = match Envelope::decode(message) {
            Ok(envelope) => envelope,
            Err(reason) => {
                debug!(reason = %reason, "Ignoring non-protocol message");
                return Incoming::Ignored(reason);
            }
        };

        let response = match envelope {
            Envelope::Response(response) if response.sender != self.sender => response,
            other => return Incoming::Other(other),
        };

        let result = response
            .outcome
            .map_err(|payload| BridgeError::from_error_payload(&payload));
        if self.pending.complete(&response.correlation_id, result) {
            Incoming::Resolved(response.correlation_id)
        } else {
            Incoming::Unmatched(response.correlation_id)
        }
    }

    /// Reject every outstanding request.
    pub fn teardown(&self) -> usize {
        self.pending.drain("bridge torn down")
    }
}

/// Removes the pending entry if the caller stops waiting before it settles.
struct AbandonGuard<'a> {
    pending: &'a PendingRequestStore,
    correlation_id: CorrelationId,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.pending.cancel(&self.correlation_id) {
            debug!(correlation_id = %self.correlation_id, "Request abandoned");
        }
    }
}
