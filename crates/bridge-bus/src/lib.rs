//! # Bridge Bus - Host Transports
//!
//! The message-passing primitives the host environment gives each isolated
//! context. Nothing here understands the protocol; payloads are raw JSON and
//! classification happens in the consumers.
//!
//! ## Transports
//!
//! ```text
//!  page ──window message──┐                        ┌── store invalidation ──┐
//!                         ▼                        ▼                        │
//!                   ┌────────────┐   topic   ┌────────────┐                 │
//!  relay ◀─────────▶│ InMemoryBus│◀─────────▶│ subscribers│◀────────────────┘
//!                   └────────────┘  filters  └────────────┘
//!
//!  relay ──RuntimeClient::send_message──▶ background (mpsc + oneshot reply)
//!  popup ──PortHub::connect──▶ background on_connect (persistent Port)
//!  Tabs::remove ──▶ on_removed listeners, then ports of that scope severed
//! ```
//!
//! ## Ordering
//!
//! Messages on one bus, or on one port, arrive in send order. Nothing is
//! promised across different transports.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod lifecycle;
pub mod listeners;
pub mod messaging;
pub mod port;
pub mod publisher;
pub mod subscriber;

use thiserror::Error;

pub use events::{BusMessage, ChangeStamp, EventFilter, StoreChange, Topic, WindowMessage};
pub use lifecycle::Tabs;
pub use listeners::{ListenerId, ListenerRegistry};
pub use messaging::{runtime_channel, IncomingMessage, MessageSender, ReplyHandle, RuntimeClient, RuntimeEndpoint};
pub use port::{Port, PortHub};
pub use publisher::{EventPublisher, InMemoryBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum messages buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Failures of the host transports themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The receiving context is gone.
    #[error("receiving end closed")]
    ChannelClosed,

    /// The receiver dropped the message without answering.
    #[error("message dropped without a response")]
    NoResponse,

    /// The persistent port was disconnected.
    #[error("port {0} disconnected")]
    Disconnected(u64),
}
