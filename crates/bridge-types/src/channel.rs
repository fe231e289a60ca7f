//! Persistent-channel message shapes.
//!
//! Conversations between the privileged side and a UI component use the same
//! wire envelope, tagged by `method` and scoped by `channelScope`.

use crate::correlation::ScopeId;
use crate::envelope::{Sender, WireEnvelope};
use crate::errors::{ApiError, MalformedEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REQUEST_DATA: &str = "requestData";
pub const RETURN_DATA: &str = "returnData";

/// Payload of a conversation turn: `{data?, error?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Reply {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ApiError) -> Self {
        Self {
            data: None,
            error: Some(error.to_value()),
        }
    }

    /// Synthesized answer for a conversation whose scope went away.
    pub fn refused() -> Self {
        Self::error(ApiError::refused("user closed the window"))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Wire form as sent by the privileged side.
    pub fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            data: self.data.clone(),
            error: self.error.clone(),
            ..WireEnvelope::addressed(Sender::Extension)
        }
    }
}

/// A classified persistent-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The UI component asks for the payload of its scope.
    RequestData { scope: ScopeId },
    /// The UI component hands back its answer.
    ReturnData { scope: ScopeId, reply: Reply },
    /// Payload posted to the UI component.
    Reply(Reply),
}

impl ChannelMessage {
    pub fn decode(value: &Value) -> Result<Self, MalformedEnvelope> {
        let wire = WireEnvelope::from_value(value)?;
        wire.addressed_sender()?;

        let scope = wire.channel_scope.map(ScopeId);
        match wire.method.as_deref() {
            Some(REQUEST_DATA) => Ok(ChannelMessage::RequestData {
                scope: scope.ok_or(MalformedEnvelope::Ambiguous("requestData without scope"))?,
            }),
            Some(RETURN_DATA) => Ok(ChannelMessage::ReturnData {
                scope: scope.ok_or(MalformedEnvelope::Ambiguous("returnData without scope"))?,
                reply: Reply {
                    data: wire.data,
                    error: wire.error,
                },
            }),
            Some(_) => Err(MalformedEnvelope::Unclassifiable),
            None => Ok(ChannelMessage::Reply(Reply {
                data: wire.data,
                error: wire.error,
            })),
        }
    }

    pub fn to_value(&self, sender: Sender) -> Value {
        let wire = match self {
            ChannelMessage::RequestData { scope } => WireEnvelope {
                method: Some(REQUEST_DATA.to_string()),
                channel_scope: Some(scope.0),
                ..WireEnvelope::addressed(sender)
            },
            ChannelMessage::ReturnData { scope, reply } => WireEnvelope {
                method: Some(RETURN_DATA.to_string()),
                channel_scope: Some(scope.0),
                data: reply.data.clone(),
                error: reply.error.clone(),
                ..WireEnvelope::addressed(sender)
            },
            ChannelMessage::Reply(reply) => WireEnvelope {
                sender: Some(sender),
                ..reply.to_wire()
            },
        };
        wire.to_value()
    }
}
