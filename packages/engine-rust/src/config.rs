//! Engine-level configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the retry invoker and the dispatcher.
///
/// Deserializable with every field optional, so an embedding application can
/// carry it inside its own settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of attempts per invocation, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds. Overrides any delay the
    /// failover strategy suggests; `None` defers to the strategy.
    pub retry_delay_ms: Option<u64>,
    /// Interval between sweeps of expired parked invocations in milliseconds.
    pub sweep_interval_ms: u64,
}

impl EngineConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }

    /// Parses a JSON document, filling absent fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is malformed or a field has the wrong type.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: None,
            sweep_interval_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.retry_delay().is_none());
        assert_eq!(config.sweep_interval_ms, 1000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"maxAttempts": 5, "retryDelayMs": 250}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay(), Some(Duration::from_millis(250)));
        assert_eq!(config.sweep_interval_ms, 1000);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(EngineConfig::from_json(r#"{"maxAttempts": "many"}"#).is_err());
    }
}
