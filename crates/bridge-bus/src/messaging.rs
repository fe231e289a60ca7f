//! One-shot runtime messaging (the host's `runtime.sendMessage`).
//!
//! A content context sends a JSON message to the privileged context and
//! awaits exactly one reply. The host attaches a [`MessageSender`] describing
//! where the message came from; the payload itself is never trusted for that.

use crate::BusError;
use bridge_types::ScopeId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Host-provided provenance of a runtime message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSender {
    pub origin: Option<String>,
    pub scope: Option<ScopeId>,
}

/// Answers one runtime message. Consuming it sends the reply.
#[derive(Debug)]
pub struct ReplyHandle(oneshot::Sender<Value>);

impl ReplyHandle {
    /// Returns `false` if the sender stopped waiting.
    pub fn send(self, reply: Value) -> bool {
        self.0.send(reply).is_ok()
    }
}

/// A message as delivered to the privileged context.
#[derive(Debug)]
pub struct IncomingMessage {
    pub message: Value,
    pub sender: MessageSender,
    reply: ReplyHandle,
}

impl IncomingMessage {
    pub fn into_parts(self) -> (Value, MessageSender, ReplyHandle) {
        (self.message, self.sender, self.reply)
    }
}

/// Cloneable entry point into the privileged context's inbox.
#[derive(Debug, Clone)]
pub struct RuntimeEndpoint {
    tx: mpsc::Sender<IncomingMessage>,
}

impl RuntimeEndpoint {
    /// A client whose messages carry `sender` as provenance.
    pub fn client(&self, sender: MessageSender) -> RuntimeClient {
        RuntimeClient {
            tx: self.tx.clone(),
            sender,
        }
    }
}

/// Sends runtime messages on behalf of one content context.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    tx: mpsc::Sender<IncomingMessage>,
    sender: MessageSender,
}

impl RuntimeClient {
    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    /// Send a message and wait for its reply.
    pub async fn send_message(&self, message: Value) -> Result<Value, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IncomingMessage {
                message,
                sender: self.sender.clone(),
                reply: ReplyHandle(reply_tx),
            })
            .await
            .map_err(|_| BusError::ChannelClosed)?;
        reply_rx.await.map_err(|_| BusError::NoResponse)
    }
}

/// Create the privileged inbox and its endpoint.
pub fn runtime_channel(buffer: usize) -> (RuntimeEndpoint, mpsc::Receiver<IncomingMessage>) {
    let (tx, rx) = mpsc::channel(buffer);
    (RuntimeEndpoint { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_and_reply() {
        let (endpoint, mut inbox) = runtime_channel(8);
        let client = endpoint.client(MessageSender {
            origin: Some("https://dapp.example".into()),
            scope: Some(ScopeId(4)),
        });

        let server = tokio::spawn(async move {
            let incoming = inbox.recv().await.unwrap();
            let (message, sender, reply) = incoming.into_parts();
            assert_eq!(sender.scope, Some(ScopeId(4)));
            reply.send(json!({"echo": message}));
        });

        let reply = client.send_message(json!("hi")).await.unwrap();
        assert_eq!(reply, json!({"echo": "hi"}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_reply_is_no_response() {
        let (endpoint, mut inbox) = runtime_channel(8);
        let client = endpoint.client(MessageSender::default());
        tokio::spawn(async move {
            let incoming = inbox.recv().await.unwrap();
            drop(incoming);
        });
        assert_eq!(
            client.send_message(json!(1)).await,
            Err(BusError::NoResponse)
        );
    }

    #[tokio::test]
    async fn test_closed_inbox() {
        let (endpoint, inbox) = runtime_channel(1);
        drop(inbox);
        let client = endpoint.client(MessageSender::default());
        assert_eq!(
            client.send_message(json!(1)).await,
            Err(BusError::ChannelClosed)
        );
    }
}
