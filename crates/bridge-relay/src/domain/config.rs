//! Bridge configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("invalid store key: {0}")]
    InvalidStoreKey(String),
}

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Deadlines for requests and conversations
    pub timeouts: TimeoutConfig,
    /// Allow-list seeding
    pub access: AccessConfig,
    /// Transport sizing
    pub bus: BusConfig,
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.timeouts.page_request {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(
                    "page_request timeout cannot be 0".into(),
                ));
            }
        }

        if self.timeouts.conversation.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "conversation timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.pending_sweep.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "pending_sweep interval cannot be 0".into(),
            ));
        }

        if self.bus.capacity == 0 {
            return Err(ConfigError::InvalidLimit("bus capacity cannot be 0".into()));
        }

        if self.bus.runtime_inbox == 0 {
            return Err(ConfigError::InvalidLimit(
                "runtime_inbox cannot be 0".into(),
            ));
        }

        if self.access.store_key.trim().is_empty() {
            return Err(ConfigError::InvalidStoreKey(
                "allow-list store key cannot be empty".into(),
            ));
        }

        for origin in &self.access.allowed_origins {
            if !is_plausible_origin(origin) {
                return Err(ConfigError::InvalidOrigin(origin.clone()));
            }
        }

        Ok(())
    }
}

/// An origin is `scheme://host[:port]` with nothing after the authority.
fn is_plausible_origin(origin: &str) -> bool {
    match origin.split_once("://") {
        Some((scheme, authority)) => {
            !scheme.is_empty()
                && !authority.is_empty()
                && !authority.contains('/')
                && !authority.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Parse `"250ms"`, `"30s"`, `"2m"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime_serde::parse_duration(s)
        .map_err(|reason| ConfigError::InvalidTimeout(format!("{s:?}: {reason}")))
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for page requests (none by default: the user may take as
    /// long as they like to approve a prompt)
    #[serde(with = "humantime_serde::option")]
    pub page_request: Option<Duration>,
    /// Deadline for a popup `requestData`
    #[serde(with = "humantime_serde")]
    pub conversation: Duration,
    /// How often abandoned pending requests are swept
    #[serde(with = "humantime_serde")]
    pub pending_sweep: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_request: None,
            conversation: Duration::from_secs(30),
            pending_sweep: Duration::from_secs(5),
        }
    }
}

/// Allow-list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Origins allowed before the user has approved anything
    pub allowed_origins: Vec<String>,
    /// Durable key holding the allow-list
    pub store_key: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            store_key: "whitelisted".to_string(),
        }
    }
}

/// Transport sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per broadcast subscriber
    pub capacity: usize,
    /// Runtime messages queued for the privileged context
    pub runtime_inbox: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: bridge_bus::DEFAULT_CHANNEL_CAPACITY,
            runtime_inbox: 256,
        }
    }
}

/// Human-readable durations: "30s", "250ms", "5m" or plain seconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::{format_duration, parse_duration};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&format_duration(d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    fn format_duration(duration: &Duration) -> String {
        if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.conversation, Duration::from_secs(30));
        assert_eq!(config.timeouts.page_request, None);
        assert_eq!(config.access.store_key, "whitelisted");
    }

    #[test]
    fn test_zero_conversation_timeout() {
        let mut config = BridgeConfig::default();
        config.timeouts.conversation = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_bad_origin_rejected() {
        let mut config = BridgeConfig::default();
        config.access.allowed_origins = vec!["https://ok.example".into(), "not an origin".into()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidOrigin("not an origin".into()))
        );
    }

    #[test]
    fn test_origin_with_path_rejected() {
        assert!(is_plausible_origin("http://localhost:3000"));
        assert!(!is_plausible_origin("https://dapp.example/path"));
        assert!(!is_plausible_origin("dapp.example"));
    }

    #[test]
    fn test_parse_durations() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_public_parse_reports_input() {
        assert_eq!(parse_duration(" 45s "), Ok(Duration::from_secs(45)));
        let err = parse_duration("later").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(ref m) if m.contains("later")));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: BridgeConfig = serde_json::from_value(serde_json::json!({
            "timeouts": { "page_request": "10s", "conversation": "500ms" },
            "access": { "allowed_origins": ["https://dapp.example"] }
        }))
        .unwrap();
        assert_eq!(config.timeouts.page_request, Some(Duration::from_secs(10)));
        assert_eq!(config.timeouts.conversation, Duration::from_millis(500));
        assert_eq!(config.timeouts.pending_sweep, Duration::from_secs(5));
        assert_eq!(config.bus.runtime_inbox, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_round_trips_durations() {
        let config = BridgeConfig::default();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["timeouts"]["conversation"], "30s");
        assert!(value["timeouts"]["page_request"].is_null());
    }
}
