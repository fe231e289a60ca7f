//! Outbound ports.

use async_trait::async_trait;
use bridge_types::BridgeError;
use serde_json::Value;

/// Fire-and-forget delivery of an encoded envelope.
///
/// Responses come back on some other path and are matched by correlation id.
#[async_trait]
pub trait EnvelopeTransport: Send + Sync {
    async fn dispatch(&self, message: Value) -> Result<(), BridgeError>;
}

/// Request/reply link into the privileged context.
#[async_trait]
pub trait PrivilegedLink: Send + Sync {
    /// Forward an encoded request and wait for the encoded reply.
    async fn forward(&self, request: Value) -> Result<Value, BridgeError>;
}
