//! # Bridge Runtime
//!
//! Runs a complete wallet-extension environment in one process.
//!
//! ## Modular Structure
//!
//! - `config` - TOML file plus `BRIDGE_*` environment overrides
//! - `environment` - background context, tabs and popups
//! - `wallet` - capability handlers and approval popups
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (from file/env)
//! 2. Open the durable backend
//! 3. Build the background context (allow-list and wallet seeded, codec loaded)
//! 4. Serve the privileged inbox and sweep abandoned requests
//! 5. Signal ready

pub mod config;
pub mod environment;
pub mod wallet;

pub use config::{load_config, RuntimeConfig, WalletConfig};
pub use environment::{BridgeEnvironment, TabSession, ACCOUNT_CHANGE_EVENT};
pub use wallet::{PopupLauncher, PopupRequest, WalletState};

use anyhow::{Context, Result};
use bridge_bus::IncomingMessage;
use bridge_relay::domain::cleanup_task;
use bridge_relay::KvBackend;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Open the durable backend named by `config`.
pub fn open_backend(config: &WalletConfig) -> Result<Arc<dyn KvBackend>> {
    match &config.data_dir {
        #[cfg(feature = "rocksdb")]
        Some(dir) => {
            let backend = bridge_relay::store::RocksDbBackend::open(dir)
                .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
            info!(path = %dir.display(), "Using RocksDB storage");
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "rocksdb"))]
        Some(dir) => {
            warn!(
                path = %dir.display(),
                "Built without the rocksdb feature; using in-memory storage"
            );
            Ok(Arc::new(bridge_relay::MemoryBackend::new()))
        }
        None => Ok(Arc::new(bridge_relay::MemoryBackend::new())),
    }
}

/// The runtime owning the background context and its tasks.
pub struct BridgeRuntime {
    environment: Arc<BridgeEnvironment>,
    /// Taken by `start`.
    inbox: Mutex<Option<mpsc::Receiver<IncomingMessage>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeRuntime {
    pub async fn new(config: &RuntimeConfig) -> Result<Self> {
        info!("Creating bridge runtime");
        let backend = open_backend(&config.wallet)?;
        let (environment, inbox) = BridgeEnvironment::new(config, backend)
            .await
            .context("Failed to build background context")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            environment,
            inbox: Mutex::new(Some(inbox)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Start serving the privileged inbox.
    pub fn start(&self) -> Result<()> {
        let inbox = self
            .inbox
            .lock()
            .take()
            .context("Bridge runtime already started")?;

        let host = self.environment.host().clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = host.run(inbox) => {}
                _ = shutdown.changed() => {
                    info!("[host] Shutdown signal received");
                }
            }
        });

        info!("Bridge runtime started");
        Ok(())
    }

    /// Open a tab and sweep its page's abandoned requests until shutdown.
    pub fn open_tab(&self, origin: &str) -> TabSession {
        let tab = self.environment.open_tab(origin);
        let store = tab.page().pending_store();
        let interval = self.environment.config().timeouts.pending_sweep;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cleanup_task(store, interval) => {}
                _ = shutdown.changed() => {}
            }
        });
        tab
    }

    pub fn environment(&self) -> Arc<BridgeEnvironment> {
        Arc::clone(&self.environment)
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        info!("Initiating shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_start_twice_fails() {
        let runtime = BridgeRuntime::new(&RuntimeConfig::default()).await.unwrap();
        runtime.start().unwrap();
        assert!(runtime.start().is_err());
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_exempt_request_through_runtime() {
        let runtime = BridgeRuntime::new(&RuntimeConfig::default()).await.unwrap();
        runtime.start().unwrap();

        let tab = runtime.open_tab("https://dapp.example");
        assert_eq!(tab.page().request("isEnabled", None).await, Ok(json!(false)));
        runtime.shutdown();
    }

    #[test]
    fn test_memory_backend_without_data_dir() {
        let backend = open_backend(&WalletConfig::default());
        assert!(backend.is_ok());
    }
}
