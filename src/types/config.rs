//! Runtime configuration structures.
//!
//! Configuration is loaded from an optional JSON file with per-section
//! defaults applied for anything omitted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Filesystem layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Config watcher behaviour.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Periodic state snapshot behaviour.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl RuntimeConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> crate::types::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Filesystem layout for module catalogs, agent configs and the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root directory containing the `tools/`, `services/` and `modules/`
    /// catalogs.
    pub modules_root: PathBuf,

    /// Root directory that relative `config_file` references resolve against.
    pub configs_root: PathBuf,

    /// Per-agent configuration file.
    pub agents_file: PathBuf,

    /// Persistent state store file.
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            modules_root: PathBuf::from("modules"),
            configs_root: PathBuf::from("configs"),
            agents_file: PathBuf::from("configs/agents.json"),
            state_file: PathBuf::from("data/state.json"),
        }
    }
}

/// Config watcher behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Enable hot reload of the agents config file.
    pub enabled: bool,

    /// Debounce window after a change notification, in milliseconds.
    /// Editors often emit several events per save.
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 250,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Periodic state snapshot behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Enable the background snapshot loop.
    pub enabled: bool,

    /// Interval between snapshot passes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
