//! Fan-out timing and limits
//!
//! Every field has a default. A `config.toml` in the data
//! directory may override any field:
//!
//! ```toml
//! connect_timeout_ms = 10000
//! send_timeout_ms = 5000
//! collect_timeout_ms = 3000
//! close_timeout_ms = 1000
//! verify_limit = 5
//! max_concurrency = 0   # 0 = one worker per relay
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the optional config file inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Config loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File exists but could not be read
    #[error("Cannot read config {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for [`FanOutConfig`]
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Parse error
        #[source]
        source: toml::de::Error,
    },
}

/// Timeouts and limits for publish and verify fan-outs
///
/// Connection and operation timeouts are independent; neither is derived
/// from the other, and each relay gets a fresh budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Budget for establishing a connection to one relay
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// Budget for pushing an event and receiving the relay's answer
    #[serde(rename = "send_timeout_ms", with = "millis")]
    pub send_timeout: Duration,

    /// Time box for collecting verification results from one relay
    #[serde(rename = "collect_timeout_ms", with = "millis")]
    pub collect_timeout: Duration,

    /// Budget for unsubscribing and closing one connection
    #[serde(rename = "close_timeout_ms", with = "millis")]
    pub close_timeout: Duration,

    /// Maximum events requested per relay when verifying
    pub verify_limit: usize,

    /// Relays contacted at once; 0 means all of them
    pub max_concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        FanOutConfig {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            collect_timeout: Duration::from_secs(3),
            close_timeout: Duration::from_secs(1),
            verify_limit: 5,
            max_concurrency: 0,
        }
    }
}

impl FanOutConfig {
    /// Load `config.toml` from `dir`, falling back to defaults if absent
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text).map_err(|source| ConfigError::Parse { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Number of workers for a fan-out over `relays` endpoints
    pub fn workers_for(&self, relays: usize) -> usize {
        let workers = match self.max_concurrency {
            0 => relays,
            n => n.min(relays),
        };
        workers.max(1)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = FanOutConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.collect_timeout, Duration::from_secs(3));
        assert_eq!(config.close_timeout, Duration::from_secs(1));
        assert_eq!(config.verify_limit, 5);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = FanOutConfig::from_toml("send_timeout_ms = 750\nmax_concurrency = 2").unwrap();
        assert_eq!(config.send_timeout, Duration::from_millis(750));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_close_timeout_is_independent_of_send_timeout() {
        let config =
            FanOutConfig::from_toml("send_timeout_ms = 9000\nclose_timeout_ms = 250").unwrap();
        assert_eq!(config.send_timeout, Duration::from_secs(9));
        assert_eq!(config.close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        assert_eq!(FanOutConfig::load(dir.path()).unwrap(), FanOutConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "verify_limit = \"many\"").unwrap();
        assert!(matches!(
            FanOutConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_workers_for() {
        let mut config = FanOutConfig::default();
        assert_eq!(config.workers_for(6), 6);
        assert_eq!(config.workers_for(0), 1);

        config.max_concurrency = 1;
        assert_eq!(config.workers_for(6), 1);

        config.max_concurrency = 10;
        assert_eq!(config.workers_for(3), 3);
    }
}
