//! Runtime configuration.
//!
//! Configuration is a plain serde struct so hosts can embed it in their own
//! settings files. Missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::DEFAULT_MAX_POOL_SIZE;

/// Default number of scheduler passes a single flush may take.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 100;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Idle edge records kept for reuse. Extra released edges are freed.
    pub max_pool_size: usize,

    /// Passes one flush may take before it gives up on effects that keep
    /// re-triggering each other. Also bounds re-entrant subscription reruns.
    pub max_flush_passes: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON text.
    ///
    /// ```rust
    /// use trellis_core::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::from_json(r#"{ "max_pool_size": 64 }"#).unwrap();
    /// assert_eq!(config.max_pool_size, 64);
    /// assert_eq!(config.max_flush_passes, 100);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flush_passes == 0 {
            return Err(ConfigError::Invalid("max_flush_passes must be at least 1"));
        }
        Ok(())
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_max_flush_passes(mut self, max_flush_passes: usize) -> Self {
        self.max_flush_passes = max_flush_passes;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
