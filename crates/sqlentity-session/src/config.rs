//! Session configuration.

use serde::{Deserialize, Serialize};
use sqlentity_core::{ConfigError, Error, Result};

/// Configuration for [`Session`](crate::Session) behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Wrap LAZY relationship fields in factory-issued handles on `find`.
    pub lazy_loading: bool,
    /// Capacity of the per-session statement cache. 0 disables caching.
    pub statement_cache_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lazy_loading: true,
            statement_cache_size: 256,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    #[must_use]
    pub fn statement_cache_size(mut self, capacity: usize) -> Self {
        self.statement_cache_size = capacity;
        self
    }

    /// Parse a JSON document. Missing keys take their defaults; unknown keys
    /// are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }
}
