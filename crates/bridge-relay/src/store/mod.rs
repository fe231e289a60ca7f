//! Durable storage and the reactive cache on top of it.

pub mod backend;
pub mod reactive;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use backend::{KvBackend, MemoryBackend, StorageError};
pub use reactive::{ReactiveStore, StoreSubscription, StoreValue, Update};
#[cfg(feature = "rocksdb")]
pub use rocks::RocksDbBackend;
