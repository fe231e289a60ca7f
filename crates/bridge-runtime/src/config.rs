//! # Runtime Configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment,
//! then validated.
//!
//! ```toml
//! [bridge.timeouts]
//! conversation = "30s"
//!
//! [bridge.access]
//! allowed_origins = ["https://dapp.example"]
//!
//! [wallet]
//! address = "addr_test1qz..."
//! balance = 42000000
//! ```

use anyhow::{Context, Result};
use bridge_relay::domain::{parse_duration, BridgeConfig};
use bridge_telemetry::TelemetryConfig;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Relay, correlation and channel settings.
    pub bridge: BridgeConfig,
    /// Logging; taken from the environment when the file has no section.
    pub telemetry: Option<TelemetryConfig>,
    /// Demo wallet contents and storage location.
    pub wallet: WalletConfig,
}

/// Wallet the background context starts with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub address: String,
    /// Balance in lovelace.
    pub balance: u64,
    /// RocksDB directory. In-memory storage when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address: "addr_test1qz2fxv2umyhttkxyxp8x0dlpdt3k6cwng5pxj3jhsydzer3jcu5d8ps7zex2k2xt3uqxgjqnnj83ws8lhrn648jjxtwq2ytjqp".to_string(),
            balance: 42_000_000,
            data_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse runtime configuration")
    }

    /// Apply `BRIDGE_*` overrides.
    ///
    /// - `BRIDGE_PAGE_TIMEOUT`: page request deadline (e.g. `10s`)
    /// - `BRIDGE_CONVERSATION_TIMEOUT`: popup `requestData` deadline
    /// - `BRIDGE_ALLOWED_ORIGINS`: comma-separated origins to pre-allow
    /// - `BRIDGE_DATA_DIR`: RocksDB directory
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("BRIDGE_PAGE_TIMEOUT") {
            let timeout = parse_duration(&value).context("BRIDGE_PAGE_TIMEOUT")?;
            self.bridge.timeouts.page_request = Some(timeout);
        }
        if let Some(value) = lookup("BRIDGE_CONVERSATION_TIMEOUT") {
            self.bridge.timeouts.conversation =
                parse_duration(&value).context("BRIDGE_CONVERSATION_TIMEOUT")?;
        }
        if let Some(value) = lookup("BRIDGE_ALLOWED_ORIGINS") {
            self.bridge.access.allowed_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup("BRIDGE_DATA_DIR") {
            self.wallet.data_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bridge
            .validate()
            .context("Invalid bridge configuration")
    }

    /// Logging configuration for one context.
    pub fn telemetry_for(&self, context: &str) -> TelemetryConfig {
        let mut telemetry = self
            .telemetry
            .clone()
            .unwrap_or_else(TelemetryConfig::from_env);
        telemetry.context = context.to_string();
        telemetry
    }
}

/// Load configuration from `path` (if any) and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config = RuntimeConfig::from_toml(&text)?;
            info!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => RuntimeConfig::default(),
    };
    config.apply_env(|key| env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_toml_sections() {
        let config = RuntimeConfig::from_toml(
            r#"
            [bridge.timeouts]
            page_request = "10s"
            conversation = "250ms"

            [bridge.access]
            allowed_origins = ["https://dapp.example"]

            [telemetry]
            log_level = "debug"
            json_logs = true

            [wallet]
            balance = 7
            "#,
        )
        .unwrap();
        assert_eq!(
            config.bridge.timeouts.page_request,
            Some(Duration::from_secs(10))
        );
        assert_eq!(config.bridge.timeouts.conversation, Duration::from_millis(250));
        assert_eq!(config.wallet.balance, 7);
        assert!(!config.wallet.address.is_empty());

        let telemetry = config.telemetry_for("content");
        assert_eq!(telemetry.log_level, "debug");
        assert!(telemetry.json_logs);
        assert_eq!(telemetry.context, "content");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_env(vars(&[
                ("BRIDGE_PAGE_TIMEOUT", "5s"),
                ("BRIDGE_CONVERSATION_TIMEOUT", "2m"),
                ("BRIDGE_ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
                ("BRIDGE_DATA_DIR", "/var/lib/bridge"),
            ]))
            .unwrap();
        assert_eq!(config.bridge.timeouts.page_request, Some(Duration::from_secs(5)));
        assert_eq!(config.bridge.timeouts.conversation, Duration::from_secs(120));
        assert_eq!(
            config.bridge.access.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.wallet.data_dir, Some(PathBuf::from("/var/lib/bridge")));
    }

    #[test]
    fn test_bad_env_duration_names_variable() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env(vars(&[("BRIDGE_CONVERSATION_TIMEOUT", "whenever")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("BRIDGE_CONVERSATION_TIMEOUT"));
    }

    #[test]
    fn test_invalid_origin_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.bridge.access.allowed_origins = vec!["dapp.example".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[wallet]\nbalance = 99").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.wallet.balance, 99);

        assert!(load_config(Some(Path::new("/nonexistent/bridge.toml"))).is_err());
    }
}
