//! # Persistent Ports
//!
//! Long-lived, bidirectional connections between a UI component and the
//! privileged context (the host's `runtime.connect` / `onConnect`).
//!
//! A [`Port`] is one end of a connection. `post` delivers synchronously to the
//! listeners of the other end, so messages on one port keep their order.
//! `disconnect` notifies the other end only; severing a whole scope through
//! [`PortHub::sever_scope`] notifies both ends, as happens when the tab that
//! owns the connection is closed.

use crate::listeners::ListenerRegistry;
use crate::BusError;
use bridge_types::ScopeId;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct PortEnd {
    on_message: ListenerRegistry<Value>,
    on_disconnect: ListenerRegistry<()>,
}

struct Connection {
    id: u64,
    name: String,
    scope: Option<ScopeId>,
    connected: AtomicBool,
    ends: [PortEnd; 2],
}

/// One end of a persistent connection.
#[derive(Clone)]
pub struct Port {
    connection: Arc<Connection>,
    side: usize,
}

impl Port {
    fn pair(id: u64, name: String, scope: Option<ScopeId>) -> (Port, Port) {
        let connection = Arc::new(Connection {
            id,
            name,
            scope,
            connected: AtomicBool::new(true),
            ends: [PortEnd::default(), PortEnd::default()],
        });
        (
            Port {
                connection: connection.clone(),
                side: 0,
            },
            Port {
                connection,
                side: 1,
            },
        )
    }

    fn own(&self) -> &PortEnd {
        &self.connection.ends[self.side]
    }

    fn peer(&self) -> &PortEnd {
        &self.connection.ends[1 - self.side]
    }

    pub fn id(&self) -> u64 {
        self.connection.id
    }

    pub fn name(&self) -> &str {
        &self.connection.name
    }

    /// Scope (tab) of the context that opened the connection.
    pub fn scope(&self) -> Option<ScopeId> {
        self.connection.scope
    }

    pub fn is_connected(&self) -> bool {
        self.connection.connected.load(Ordering::Acquire)
    }

    /// Messages posted by the other end.
    pub fn on_message(&self) -> &ListenerRegistry<Value> {
        &self.own().on_message
    }

    /// Fired once when the connection goes away.
    pub fn on_disconnect(&self) -> &ListenerRegistry<()> {
        &self.own().on_disconnect
    }

    /// Deliver a message to the other end.
    pub fn post(&self, message: Value) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected(self.id()));
        }
        self.peer().on_message.emit(&message);
        Ok(())
    }

    /// Close the connection from this end.
    pub fn disconnect(&self) {
        if self.connection.connected.swap(false, Ordering::AcqRel) {
            debug!(port = self.id(), name = %self.name(), "Port disconnected");
            self.peer().on_disconnect.emit(&());
        }
    }

    fn sever(&self) {
        if self.connection.connected.swap(false, Ordering::AcqRel) {
            debug!(port = self.id(), name = %self.name(), "Port severed");
            self.peer().on_disconnect.emit(&());
            self.own().on_disconnect.emit(&());
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("scope", &self.scope())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Accepts connections on behalf of the privileged context.
#[derive(Clone, Default)]
pub struct PortHub {
    on_connect: ListenerRegistry<Port>,
    accepted: Arc<Mutex<Vec<Port>>>,
    next_id: Arc<AtomicU64>,
}

impl PortHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners invoked with the privileged end of every new connection.
    pub fn on_connect(&self) -> &ListenerRegistry<Port> {
        &self.on_connect
    }

    /// Open a connection from a UI context living in `scope`.
    ///
    /// Returns the caller's end; the other end is handed to every
    /// `on_connect` listener before this returns.
    pub fn connect(&self, name: impl Into<String>, scope: Option<ScopeId>) -> Port {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (client, server) = Port::pair(id, name.into(), scope);

        {
            let mut accepted = self.accepted.lock();
            accepted.retain(Port::is_connected);
            accepted.push(server.clone());
        }

        debug!(port = id, scope = ?scope, "Port connected");
        self.on_connect.emit(&server);
        client
    }

    /// Disconnect every connection opened from `scope`, notifying both ends.
    pub fn sever_scope(&self, scope: ScopeId) -> usize {
        let severed: Vec<Port> = {
            let mut accepted = self.accepted.lock();
            let (matching, rest) = accepted
                .drain(..)
                .partition(|p: &Port| p.scope() == Some(scope));
            *accepted = rest;
            matching
        };
        for port in &severed {
            port.sever();
        }
        severed.len()
    }

    pub fn open_connections(&self) -> usize {
        self.accepted.lock().iter().filter(|p| p.is_connected()).count()
    }

    /// Privileged ends of the connections still open.
    pub fn connections(&self) -> Vec<Port> {
        self.accepted
            .lock()
            .iter()
            .filter(|p| p.is_connected())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_post_reaches_peer_in_order() {
        let hub = PortHub::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        hub.on_connect().add(move |port: &Port| {
            let sink = sink.clone();
            port.on_message().add(move |msg| sink.lock().push(msg.clone()));
        });

        let client = hub.connect("popup", Some(ScopeId(1)));
        client.post(json!(1)).unwrap();
        client.post(json!(2)).unwrap();
        assert_eq!(*received.lock(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_reply_from_inside_handler() {
        let hub = PortHub::new();
        hub.on_connect().add(|port: &Port| {
            let reply_port = port.clone();
            port.on_message().add(move |msg| {
                let _ = reply_port.post(json!({"echo": msg}));
            });
        });

        let client = hub.connect("popup", None);
        let got = Arc::new(Mutex::new(None));
        let slot = got.clone();
        client.on_message().add(move |msg| *slot.lock() = Some(msg.clone()));
        client.post(json!("ping")).unwrap();
        assert_eq!(*got.lock(), Some(json!({"echo": "ping"})));
    }

    #[test]
    fn test_disconnect_notifies_peer_once() {
        let hub = PortHub::new();
        let server_side = Arc::new(Mutex::new(None));
        let slot = server_side.clone();
        hub.on_connect().add(move |port: &Port| *slot.lock() = Some(port.clone()));

        let client = hub.connect("popup", None);
        let server = server_side.lock().clone().unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        server.on_disconnect().add(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        client.disconnect();
        client.disconnect();
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(matches!(client.post(json!(1)), Err(BusError::Disconnected(_))));
    }

    #[test]
    fn test_sever_scope_notifies_both_ends() {
        let hub = PortHub::new();
        let client = hub.connect("popup", Some(ScopeId(9)));
        let other = hub.connect("popup", Some(ScopeId(10)));
        let fired = Arc::new(AtomicU64::new(0));
        let f = fired.clone();
        client.on_disconnect().add(move |_| {
            f.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(hub.sever_scope(ScopeId(9)), 1);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(!client.is_connected());
        assert!(other.is_connected());
        assert_eq!(hub.open_connections(), 1);
    }
}
