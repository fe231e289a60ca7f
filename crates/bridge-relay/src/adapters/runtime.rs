//! Runtime messaging as a [`PrivilegedLink`].

use crate::ports::PrivilegedLink;
use async_trait::async_trait;
use bridge_bus::{BusError, RuntimeClient};
use bridge_types::BridgeError;
use serde_json::Value;

#[async_trait]
impl PrivilegedLink for RuntimeClient {
    async fn forward(&self, request: Value) -> Result<Value, BridgeError> {
        self.send_message(request).await.map_err(|e| match e {
            BusError::ChannelClosed => {
                BridgeError::Transport("privileged context unreachable".into())
            }
            other => BridgeError::Transport(other.to_string()),
        })
    }
}
