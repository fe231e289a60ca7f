//! Domain types for the bridge core.
//!
//! Configuration, the origin gate and the pending-request table.

pub mod config;
pub mod gate;
pub mod pending;

pub use config::{parse_duration, AccessConfig, BridgeConfig, BusConfig, ConfigError, TimeoutConfig};
pub use gate::{is_exempt, AccessGate, AllowList, StoredAllowList, EXEMPT_METHODS};
pub use pending::{cleanup_task, PendingRequestStore, PendingResult, PendingStats};
