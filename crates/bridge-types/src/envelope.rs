//! # Envelope
//!
//! The universal wrapper for every message exchanged between contexts.
//!
//! ## Wire vs. Typed Form
//!
//! - [`WireEnvelope`] is the flat, externally observable shape with the exact
//!   camelCase field names other implementations expect.
//! - [`Envelope`] is the tagged union produced by classifying a wire message
//!   once at the boundary: a request, a response or a broadcast.
//!
//! ## Classification Rules
//!
//! 1. `target` must equal [`PROTOCOL_TARGET`] and `sender` must be known.
//! 2. `event` present → broadcast (must not carry a `correlationId`).
//! 3. `method` present → request.
//! 4. `correlationId` present → response with exactly one of `data`/`error`.
//!
//! The `origin` field is never authoritative when it comes from the page; the
//! relay overwrites it before forwarding.

use crate::correlation::{CorrelationId, ScopeId};
use crate::errors::{ApiError, MalformedEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Constant identifying this protocol family on shared transports.
pub const PROTOCOL_TARGET: &str = "wallet-bridge";

/// Which side of the page boundary produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Page,
    Extension,
}

/// Flat wire form of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_scope: Option<i64>,
}

impl WireEnvelope {
    /// An empty envelope already addressed to this protocol.
    pub fn addressed(sender: Sender) -> Self {
        Self {
            sender: Some(sender),
            target: Some(PROTOCOL_TARGET.to_string()),
            ..Default::default()
        }
    }

    /// Decode the wire form from an arbitrary JSON message.
    pub fn from_value(value: &Value) -> Result<Self, MalformedEnvelope> {
        if !value.is_object() {
            return Err(MalformedEnvelope::Undecodable("not an object".into()));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| MalformedEnvelope::Undecodable(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Check target and sender; returns the sender on success.
    pub fn addressed_sender(&self) -> Result<Sender, MalformedEnvelope> {
        if self.target.as_deref() != Some(PROTOCOL_TARGET) {
            return Err(MalformedEnvelope::ForeignTarget);
        }
        self.sender.ok_or(MalformedEnvelope::MissingSender)
    }
}

/// An operation invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub data: Option<Value>,
    pub sender: Sender,
    pub correlation_id: Option<CorrelationId>,
    pub origin: Option<String>,
    pub channel_scope: Option<ScopeId>,
}

impl Request {
    /// A page-originated request without a correlation id.
    pub fn new(method: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            method: method.into(),
            data,
            sender: Sender::Page,
            correlation_id: None,
            origin: None,
            channel_scope: None,
        }
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// The answer to a request, matched by correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub sender: Sender,
    /// `Ok(data)` or `Err(error payload)`.
    pub outcome: Result<Value, Value>,
    pub origin: Option<String>,
}

impl Response {
    pub fn data(correlation_id: CorrelationId, data: Value) -> Self {
        Self {
            correlation_id,
            sender: Sender::Extension,
            outcome: Ok(data),
            origin: None,
        }
    }

    pub fn error(correlation_id: CorrelationId, error: ApiError) -> Self {
        Self {
            correlation_id,
            sender: Sender::Extension,
            outcome: Err(error.to_value()),
            origin: None,
        }
    }
}

/// A notification with no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub event: String,
    pub data: Option<Value>,
    pub sender: Sender,
    pub origin: Option<String>,
}

impl Broadcast {
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
            sender: Sender::Extension,
            origin: None,
        }
    }
}

/// A classified protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Broadcast(Broadcast),
}

impl Envelope {
    /// Decode and classify an arbitrary JSON message.
    pub fn decode(value: &Value) -> Result<Self, MalformedEnvelope> {
        Self::try_from(WireEnvelope::from_value(value)?)
    }

    pub fn sender(&self) -> Sender {
        match self {
            Envelope::Request(r) => r.sender,
            Envelope::Response(r) => r.sender,
            Envelope::Broadcast(b) => b.sender,
        }
    }

    pub fn to_value(&self) -> Value {
        WireEnvelope::from(self.clone()).to_value()
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = MalformedEnvelope;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let sender = wire.addressed_sender()?;
        let correlation_id = wire.correlation_id.map(CorrelationId::from);

        if let Some(event) = wire.event {
            if correlation_id.is_some() {
                return Err(MalformedEnvelope::Ambiguous(
                    "broadcast carries a correlation id",
                ));
            }
            return Ok(Envelope::Broadcast(Broadcast {
                event,
                data: wire.data,
                sender,
                origin: wire.origin,
            }));
        }

        if let Some(method) = wire.method {
            return Ok(Envelope::Request(Request {
                method,
                data: wire.data,
                sender,
                correlation_id,
                origin: wire.origin,
                channel_scope: wire.channel_scope.map(ScopeId),
            }));
        }

        let Some(correlation_id) = correlation_id else {
            return Err(MalformedEnvelope::Unclassifiable);
        };
        let outcome = match (wire.data, wire.error) {
            (Some(_), Some(_)) => {
                return Err(MalformedEnvelope::Ambiguous(
                    "response carries both data and error",
                ))
            }
            (None, Some(error)) => Err(error),
            (data, None) => Ok(data.unwrap_or(Value::Null)),
        };
        Ok(Envelope::Response(Response {
            correlation_id,
            sender,
            outcome,
            origin: wire.origin,
        }))
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Request(r) => WireEnvelope {
                method: Some(r.method),
                data: r.data,
                correlation_id: r.correlation_id.map(String::from),
                origin: r.origin,
                channel_scope: r.channel_scope.map(|s| s.0),
                ..WireEnvelope::addressed(r.sender)
            },
            Envelope::Response(r) => {
                let (data, error) = match r.outcome {
                    Ok(data) => (Some(data), None),
                    Err(error) => (None, Some(error)),
                };
                WireEnvelope {
                    data,
                    error,
                    correlation_id: Some(r.correlation_id.into()),
                    origin: r.origin,
                    ..WireEnvelope::addressed(r.sender)
                }
            }
            Envelope::Broadcast(b) => WireEnvelope {
                event: Some(b.event),
                data: b.data,
                origin: b.origin,
                ..WireEnvelope::addressed(b.sender)
            },
        }
    }
}
