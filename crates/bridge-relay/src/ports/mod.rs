//! Port traits the bridge core depends on.

pub mod outbound;

pub use outbound::{EnvelopeTransport, PrivilegedLink};
