//! Adapters from the host transports to the outbound ports.

pub mod runtime;
pub mod window;

pub use window::WindowTransport;
