#![allow(missing_docs)]

//! Bridge Relay - request/response and event relay between a web page and a
//! wallet extension's privileged context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── page ────────────────┐
//! │  PageClient ─ CorrelationEngine      │
//! │        │       (PendingRequestStore) │
//! └────────┼─────────────────────────────┘
//!          │ window message (WindowTransport)
//! ┌────────┼──────── content relay ──────┐
//! │   ProxyRelay ── AccessGate           │
//! └────────┼─────────────────────────────┘
//!          │ runtime message (PrivilegedLink)
//! ┌────────┼──────── background ─────────┐
//! │  ExtensionHost ── HandlerTable       │
//! │        │                             │
//! │  ChannelResponder ◀─port─▶ popup     │
//! │  ReactiveStore ◀─▶ KvBackend         │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Every request resolves at most once: with its response, a timeout or a
//!   transport failure.
//! - `isEnabled` and `enable` bypass the origin gate; every other method is
//!   refused for origins that are not allowed and never reaches a handler.
//! - A conversation with a UI component resolves exactly once, even when the
//!   answer races the destruction of its scope.
//!
//! # Usage
//!
//! ```ignore
//! use bridge_relay::{PageClient, ProxyRelay};
//!
//! let relay = ProxyRelay::new(window.clone(), origin, link, gate);
//! let _handle = relay.spawn(&window, &runtime_bus);
//! let page = PageClient::spawn(window, origin, None);
//! let enabled = page.request("isEnabled", None).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod channel;
pub mod codec;
pub mod domain;
pub mod host;
pub mod ipc;
pub mod ports;
pub mod store;

pub use adapters::WindowTransport;
pub use channel::{
    ChannelRequester, ChannelResponder, ConversationId, ConversationState, PendingConversation,
    CHANNEL_NAME,
};
pub use codec::{BincodeCodec, CodecError, CodecSlot, LedgerCodec, UnspentOutput};
pub use domain::{
    AccessGate, AllowList, BridgeConfig, ConfigError, PendingRequestStore, StoredAllowList,
};
pub use host::{handler_fn, CapabilityHandler, ExtensionHost, HandlerTable, Respond};
pub use ipc::{CorrelationEngine, Incoming, PageClient, ProxyRelay, RelayHandle};
pub use ports::{EnvelopeTransport, PrivilegedLink};
pub use store::{KvBackend, MemoryBackend, ReactiveStore, StorageError, Update};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
