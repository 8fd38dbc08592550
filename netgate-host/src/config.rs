//! Host configuration
//!
//! Limits applied to every plugin the loader instantiates. Values can be
//! set in code or read from a JSON file; missing fields take their defaults.
//!
//! ```json
//! {
//!   "fuel_limit": 10000000,
//!   "max_request_bytes": 1048576,
//!   "max_response_bytes": 4194304,
//!   "request_timeout_ms": 30000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Limits for plugin execution and proxied requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Fuel granted to each call into the guest
    pub fuel_limit: u64,

    /// Largest encoded request a guest may send
    pub max_request_bytes: usize,

    /// Largest response body returned to a guest
    pub max_response_bytes: usize,

    /// Deadline handed to the HTTP handler
    pub request_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            fuel_limit: 10_000_000,
            max_request_bytes: 1024 * 1024,
            max_response_bytes: 4 * 1024 * 1024,
            request_timeout_ms: 30_000,
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = fuel;
        self
    }

    pub fn with_max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check that every limit is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fuel_limit == 0 {
            return Err(ConfigError::Invalid("fuel_limit must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".into(),
            ));
        }
        // Buffers cross the boundary with i32 lengths
        for (name, value) in [
            ("max_request_bytes", self.max_request_bytes),
            ("max_response_bytes", self.max_response_bytes),
        ] {
            if value == 0 || value > i32::MAX as usize {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}",
                    name,
                    i32::MAX
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fuel_limit, 10_000_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HostConfig::from_json_str(r#"{ "fuel_limit": 500 }"#).unwrap();
        assert_eq!(config.fuel_limit, 500);
        assert_eq!(config.max_request_bytes, HostConfig::default().max_request_bytes);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            HostConfig::from_json_str(r#"{ "fuel_limit": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_json_str(r#"{ "max_response_bytes": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = HostConfig::new()
            .with_fuel_limit(42)
            .with_max_request_bytes(10)
            .with_max_response_bytes(20)
            .with_request_timeout(Duration::from_millis(1500));
        assert_eq!(config.fuel_limit, 42);
        assert_eq!(config.max_request_bytes, 10);
        assert_eq!(config.max_response_bytes, 20);
        assert_eq!(config.request_timeout_ms, 1500);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = HostConfig::new().with_request_timeout(Duration::MAX);
        assert_eq!(config.request_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netgate.json");
        std::fs::write(&path, r#"{ "request_timeout_ms": 250 }"#).unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));

        let missing = HostConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
