//! Pool configuration
//!
//! Codec limits (levels, window cap, page size) are compile-time constants in
//! [`crate::level`]. Only the reclaim interval and lifecycle switches can be
//! tuned here.

use crate::error::{Error, Result};
use crate::level::RECLAIM_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for [`PoolConfig::load`] and [`PoolConfig::from_env`]
pub const ENV_PREFIX: &str = "ZSTD_WSM";

/// Workspace pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle seconds before a workspace may be reclaimed
    pub reclaim_threshold_secs: u64,
    /// Allocate one max-level workspace at startup
    pub preallocate: bool,
    /// Run the background reclaim thread
    pub reclaim_thread: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reclaim_threshold_secs: RECLAIM_THRESHOLD.as_secs(),
            preallocate: true,
            reclaim_thread: true,
        }
    }
}

impl PoolConfig {
    pub fn reclaim_threshold(&self) -> Duration {
        Duration::from_secs(self.reclaim_threshold_secs)
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let reclaim_threshold_secs = std::env::var(format!("{}_RECLAIM_THRESHOLD_SECS", ENV_PREFIX))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.reclaim_threshold_secs);

        let preallocate = std::env::var(format!("{}_PREALLOCATE", ENV_PREFIX))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.preallocate);

        let reclaim_thread = std::env::var(format!("{}_RECLAIM_THREAD", ENV_PREFIX))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.reclaim_thread);

        Self {
            reclaim_threshold_secs,
            preallocate,
            reclaim_thread,
        }
    }

    /// Layer defaults, an optional config file and `ZSTD_WSM_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load pool config: {}", e)))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Invalid pool config: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to encode pool config: {}", e)))
    }

    /// No background thread; reclaim is driven by hand
    pub fn manual() -> Self {
        Self {
            preallocate: true,
            reclaim_thread: false,
            ..Self::default()
        }
    }
}
