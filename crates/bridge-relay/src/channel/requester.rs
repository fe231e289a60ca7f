//! UI-component side of a persistent conversation.

use bridge_bus::{ListenerId, Port, PortHub};
use bridge_types::{BridgeError, ChannelMessage, Reply, ScopeId, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Name of the persistent connection UI components open.
pub const CHANNEL_NAME: &str = "wallet-bridge-channel";

/// The listener pair installed by one `request_data` call.
struct OneShot {
    tx: Option<oneshot::Sender<Reply>>,
    listeners: Option<(ListenerId, ListenerId)>,
}

impl OneShot {
    /// Take the sender and unregister both listeners. Only the first call
    /// does anything.
    fn fire(slot: &Mutex<OneShot>, port: &Port, reply: Reply) {
        let (tx, listeners) = {
            let mut state = slot.lock();
            (state.tx.take(), state.listeners.take())
        };
        if let Some((on_message, on_disconnect)) = listeners {
            port.on_message().remove(on_message);
            port.on_disconnect().remove(on_disconnect);
        }
        if let Some(tx) = tx {
            let _ = tx.send(reply);
        }
    }
}

/// Talks to the privileged context on behalf of one UI component.
pub struct ChannelRequester {
    port: Port,
    scope: ScopeId,
    timeout: Duration,
}

impl ChannelRequester {
    /// Open the connection for the component living in `scope`.
    ///
    /// Fails with [`BridgeError::NotInitialized`] when the host could not
    /// tell which scope the component lives in.
    pub fn connect(
        ports: &PortHub,
        scope: Option<ScopeId>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let scope = scope.ok_or_else(|| {
            BridgeError::NotInitialized("could not determine the hosting scope".into())
        })?;
        let port = ports.connect(CHANNEL_NAME, Some(scope));
        debug!(scope = %scope, port = port.id(), "Channel requester connected");
        Ok(Self {
            port,
            scope,
            timeout,
        })
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    /// Ask for this scope's payload and resolve with the next message.
    ///
    /// If the connection goes away first the result is [`Reply::refused`].
    pub async fn request_data(&self) -> Result<Reply, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(OneShot {
            tx: Some(tx),
            listeners: None,
        }));

        let on_message = {
            let slot = slot.clone();
            let port = self.port.clone();
            self.port.on_message().add(move |message| {
                let reply = match ChannelMessage::decode(message) {
                    Ok(ChannelMessage::Reply(reply)) => reply,
                    _ => {
                        debug!("Ignoring non-reply channel message");
                        return;
                    }
                };
                OneShot::fire(&slot, &port, reply);
            })
        };
        let on_disconnect = {
            let slot = slot.clone();
            let port = self.port.clone();
            self.port
                .on_disconnect()
                .add(move |_| OneShot::fire(&slot, &port, Reply::refused()))
        };
        let fired_early = {
            let mut state = slot.lock();
            if state.tx.is_some() {
                state.listeners = Some((on_message, on_disconnect));
            }
            state.tx.is_none()
        };
        if fired_early {
            self.port.on_message().remove(on_message);
            self.port.on_disconnect().remove(on_disconnect);
        }

        let request = ChannelMessage::RequestData { scope: self.scope };
        if self.port.post(request.to_value(Sender::Extension)).is_err() {
            // Disconnected before we could ask; nothing will fire.
            OneShot::fire(&slot, &self.port, Reply::refused());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::Transport("channel listener dropped".into())),
            Err(_) => {
                OneShot::fire(&slot, &self.port, Reply::refused());
                Err(BridgeError::Timeout(self.timeout))
            }
        }
    }

    /// Hand the answer back to the privileged context.
    pub fn return_data(&self, reply: Reply) -> Result<(), BridgeError> {
        let message = ChannelMessage::ReturnData {
            scope: self.scope,
            reply,
        };
        self.port
            .post(message.to_value(Sender::Extension))
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// Close the connection; the privileged side sees a disconnect.
    pub fn close(&self) {
        self.port.disconnect();
    }

    /// Listeners currently installed on this end (leak checks).
    pub fn installed_listeners(&self) -> usize {
        self.port.on_message().len() + self.port.on_disconnect().len()
    }
}
