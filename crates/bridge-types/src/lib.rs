//! # Bridge Types Crate
//!
//! Everything that crosses a context boundary is defined here: the wire
//! envelope, its tagged classification, identifiers, and the error taxonomy.
//!
//! ## Design Principles
//!
//! - **Single Message Shape**: every page, relay, background and popup message
//!   is an [`WireEnvelope`] on the wire.
//! - **Classify Once**: consumers decode into [`Envelope`] at the boundary and
//!   branch on the variant instead of probing optional fields.
//! - **Inert Cross-Talk**: anything without the protocol target or a known
//!   sender decodes to [`MalformedEnvelope`] and is dropped by the caller.

pub mod channel;
pub mod correlation;
pub mod envelope;
pub mod errors;

pub use channel::{ChannelMessage, Reply, REQUEST_DATA, RETURN_DATA};
pub use correlation::{CorrelationId, ScopeId};
pub use envelope::{Broadcast, Envelope, Request, Response, Sender, WireEnvelope, PROTOCOL_TARGET};
pub use errors::{codes, ApiError, BridgeError, ErrorKind, MalformedEnvelope};
