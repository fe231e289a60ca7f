//! # Channel Responder
//!
//! Privileged side of a persistent conversation with a UI component.
//!
//! A conversation targets one scope. Opening it installs three kinds of
//! handler: a connection handler on the hub, a message handler on every port
//! it sees, and a removal handler on the scope lifecycle. All of them live in
//! one entry of an owned map; the first terminal event removes the entry and
//! tears every handler down once.

use super::conversation::{ConversationEvent, ConversationState};
use bridge_bus::{ListenerId, Port, PortHub, Tabs};
use bridge_types::{ChannelMessage, Reply, ScopeId, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Identifies one conversation inside a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conv-{}", self.0)
    }
}

#[derive(Default)]
struct HandlerSet {
    connection: Option<ListenerId>,
    lifecycle: Option<ListenerId>,
    messages: Vec<(Port, ListenerId)>,
}

struct Conversation {
    scope: ScopeId,
    payload: Reply,
    state: ConversationState,
    handlers: HandlerSet,
    resolve: oneshot::Sender<Reply>,
}

struct ResponderInner {
    ports: PortHub,
    tabs: Tabs,
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
    next_id: AtomicU64,
    handlers_removed: AtomicU64,
}

/// Answers `requestData` and collects `returnData` for open conversations.
#[derive(Clone)]
pub struct ChannelResponder {
    inner: Arc<ResponderInner>,
}

/// A conversation that has been opened but not yet answered.
pub struct PendingConversation {
    id: ConversationId,
    rx: oneshot::Receiver<Reply>,
}

impl PendingConversation {
    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Wait for the answer, or for the synthesized refusal if the scope goes
    /// away first.
    pub async fn wait(self) -> Reply {
        self.rx.await.unwrap_or_else(|_| Reply::refused())
    }
}

impl ChannelResponder {
    pub fn new(ports: PortHub, tabs: Tabs) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                ports,
                tabs,
                conversations: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                handlers_removed: AtomicU64::new(0),
            }),
        }
    }

    /// Open a conversation with the UI component in `scope` and wait for its
    /// answer.
    pub async fn open(&self, scope: ScopeId, payload: Reply) -> Reply {
        self.begin(scope, payload).wait().await
    }

    /// Open a conversation without waiting on it yet.
    pub fn begin(&self, scope: ScopeId, payload: Reply) -> PendingConversation {
        let id = ConversationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();

        if !self.inner.tabs.is_live(scope) {
            debug!(conversation = %id, scope = %scope, "Scope already gone");
            let _ = tx.send(Reply::refused());
            return PendingConversation { id, rx };
        }

        // Insert first: handlers may fire synchronously while being installed.
        self.inner.conversations.lock().insert(
            id,
            Conversation {
                scope,
                payload,
                state: ConversationState::Opened,
                handlers: HandlerSet::default(),
                resolve: tx,
            },
        );
        info!(conversation = %id, scope = %scope, "Conversation opened");

        let weak = Arc::downgrade(&self.inner);
        let lifecycle = self.inner.tabs.on_removed().add(move |removed: &ScopeId| {
            if *removed == scope {
                if let Some(inner) = weak.upgrade() {
                    inner.finish(id, ConversationEvent::ScopeDestroyed, Reply::refused());
                }
            }
        });
        if !self.inner.record(id, |h| h.lifecycle = Some(lifecycle)) {
            self.inner.remove_lifecycle(lifecycle);
        }

        let weak = Arc::downgrade(&self.inner);
        let connection = self.inner.ports.on_connect().add(move |port: &Port| {
            if let Some(inner) = weak.upgrade() {
                ResponderInner::attach(&inner, id, port.clone());
            }
        });
        if !self.inner.record(id, |h| h.connection = Some(connection)) {
            self.inner.remove_connection(connection);
        }

        for port in self.inner.ports.connections() {
            ResponderInner::attach(&self.inner, id, port);
        }

        PendingConversation { id, rx }
    }

    pub fn open_conversations(&self) -> usize {
        self.inner.conversations.lock().len()
    }

    pub fn state(&self, id: ConversationId) -> Option<ConversationState> {
        self.inner.conversations.lock().get(&id).map(|c| c.state)
    }

    /// Total handlers removed by teardowns so far.
    pub fn handlers_removed(&self) -> u64 {
        self.inner.handlers_removed.load(Ordering::Relaxed)
    }
}

impl ResponderInner {
    /// Store a handler id in a live conversation. Returns `false` if the
    /// conversation already finished, in which case the caller removes it.
    fn record(&self, id: ConversationId, f: impl FnOnce(&mut HandlerSet)) -> bool {
        match self.conversations.lock().get_mut(&id) {
            Some(conversation) => {
                f(&mut conversation.handlers);
                true
            }
            None => false,
        }
    }

    fn attach(inner: &Arc<Self>, id: ConversationId, port: Port) {
        let weak: Weak<Self> = Arc::downgrade(inner);
        let reply_port = port.clone();
        let listener = port.on_message().add(move |message: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_port_message(id, &reply_port, message);
            }
        });

        let stale = {
            let mut conversations = inner.conversations.lock();
            match conversations.get_mut(&id) {
                Some(conversation) => {
                    conversation.handlers.messages.push((port.clone(), listener));
                    false
                }
                None => true,
            }
        };
        if stale {
            port.on_message().remove(listener);
        }
    }

    fn on_port_message(&self, id: ConversationId, port: &Port, message: &Value) {
        let message = match ChannelMessage::decode(message) {
            Ok(message) => message,
            Err(reason) => {
                debug!(conversation = %id, reason = %reason, "Ignoring channel message");
                return;
            }
        };

        match message {
            ChannelMessage::RequestData { scope } => {
                let payload = {
                    let mut conversations = self.conversations.lock();
                    let Some(conversation) = conversations.get_mut(&id) else {
                        return;
                    };
                    if conversation.scope != scope {
                        return;
                    }
                    let Some(next) = conversation
                        .state
                        .transition(ConversationEvent::DataRequested)
                    else {
                        return;
                    };
                    conversation.state = next;
                    conversation.payload.clone()
                };
                // Posting runs the peer's listeners inline; no lock held.
                if let Err(e) = port.post(ChannelMessage::Reply(payload).to_value(Sender::Extension))
                {
                    debug!(conversation = %id, error = %e, "Could not deliver payload");
                }
            }
            ChannelMessage::ReturnData { scope, reply } => {
                let ours = self
                    .conversations
                    .lock()
                    .get(&id)
                    .is_some_and(|c| c.scope == scope);
                if ours {
                    self.finish(id, ConversationEvent::DataReturned, reply);
                }
            }
            ChannelMessage::Reply(_) => {}
        }
    }

    /// Apply a terminal event. The first one removes the conversation,
    /// resolves it and tears its handlers down; later ones are no-ops.
    fn finish(&self, id: ConversationId, event: ConversationEvent, reply: Reply) -> bool {
        let conversation = {
            let mut conversations = self.conversations.lock();
            let Some(conversation) = conversations.get_mut(&id) else {
                return false;
            };
            let Some(next) = conversation.state.transition(event) else {
                return false;
            };
            conversation.state = next;
            conversations.remove(&id)
        };
        let Some(conversation) = conversation else {
            return false;
        };

        info!(
            conversation = %id,
            scope = %conversation.scope,
            state = ?conversation.state,
            "Conversation finished"
        );
        let _ = conversation.resolve.send(reply);
        self.teardown(conversation.handlers);
        true
    }

    /// Remove every handler of a finished conversation. Takes the set by
    /// value, so it can only run once per conversation.
    fn teardown(&self, handlers: HandlerSet) {
        if let Some(id) = handlers.connection {
            self.remove_connection(id);
        }
        if let Some(id) = handlers.lifecycle {
            self.remove_lifecycle(id);
        }
        for (port, id) in handlers.messages {
            if port.on_message().remove(id) {
                self.handlers_removed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn remove_connection(&self, id: ListenerId) {
        if self.ports.on_connect().remove(id) {
            self.handlers_removed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn remove_lifecycle(&self, id: ListenerId) {
        if self.tabs.on_removed().remove(id) {
            self.handlers_removed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
