//! AdChoices configuration
//!
//! All tunable timings and limits in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::types::Position;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdChoicesConfig {
    /// Cross-frame collection timings.
    pub aggregation: AggregationConfig,
    /// Button injection and panel defaults.
    pub presentation: PresentationConfig,
    /// Privacy popup window.
    pub popup: PopupConfig,
    /// Session registry.
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// How long to wait for postMessage replies before presenting what arrived.
    pub pull_timeout_ms: u64,
    /// Delay before a scheduled chain-init discovery round runs.
    pub discovery_wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Interval between attempts to find the button container.
    pub inject_retry_ms: u64,
    /// Attempts before button injection is abandoned.
    pub max_inject_attempts: u32,
    /// Button corner when `createPlayer` gives none.
    pub default_position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    /// Window name prefix; a random suffix is appended per open.
    pub name_prefix: String,
    /// Exclusive upper bound of the random name suffix.
    pub name_suffix_max: u32,
    /// `window.open` feature string.
    pub features: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Session ids are drawn from `0..id_space`.
    pub id_space: u32,
}

// ============================================================
// Defaults
// ============================================================

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { pull_timeout_ms: 1_000, discovery_wait_ms: 2_000 }
    }
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self { inject_retry_ms: 100, max_inject_attempts: 50, default_position: Position::TopRight }
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            name_prefix: "adp_info_".into(),
            name_suffix_max: 100_001,
            features: "width=400,height=500,scrollbars=yes,location=0,menubar=0,toolbar=0,status=0"
                .into(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { id_space: 100_000_000 }
    }
}

// ============================================================
// Loading
// ============================================================

impl AdChoicesConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} — using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::ConfigError(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.aggregation.pull_timeout_ms)
    }

    pub fn discovery_wait(&self) -> Duration {
        Duration::from_millis(self.aggregation.discovery_wait_ms)
    }

    pub fn inject_retry(&self) -> Duration {
        Duration::from_millis(self.presentation.inject_retry_ms)
    }
}
