//! Request/response plumbing between the page, the relay and the
//! privileged context.

pub mod engine;
pub mod page;
pub mod relay;

pub use engine::{CorrelationEngine, Incoming};
pub use page::PageClient;
pub use relay::{ProxyRelay, RelayHandle, RelayStats};
