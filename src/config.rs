//! Process-wide configuration, loaded once at startup.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```
//! use ttlcall::config::Config;
//!
//! let config = Config::from_json_str(r#"{ "debug": true, "request_timeout_secs": 5 }"#).unwrap();
//! assert!(config.debug);
//! assert_eq!(config.namespace, "ttlcall");
//! assert_eq!(config.request_timeout().map(|t| t.as_secs()), Some(5));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::logging::Logger;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enables the debug log sink.
    pub debug: bool,
    /// Parent directory of the cache namespace.
    pub cache_dir: PathBuf,
    /// Name of the directory under `cache_dir` that holds cache entries.
    pub namespace: String,
    /// Per-request timeout for the TCP transport. `None` waits indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            cache_dir: std::env::temp_dir(),
            namespace: "ttlcall".to_owned(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `json` is not a valid config object.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Directory that holds one file per cache entry.
    pub fn namespace_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.namespace)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Builds the logger every component receives.
    pub fn logger(&self) -> Logger {
        Logger::tracing(self.debug)
    }
}
