//! Persisted monitor settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::{Result, TelemetryError};

/// Connection feeds never poll faster than this.
pub const MIN_CONNECTION_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CONNECTION_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_STALE_AFTER_FAILURES: u32 = 5;

/// Cadences and feed options. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub connection_interval_ms: u64,
    pub process_interval_ms: u64,
    pub stats_interval_ms: u64,
    pub show_tcp: bool,
    pub show_udp: bool,
    pub initial_buffer_capacity: usize,
    /// Consecutive failed cycles after which a collection feed is emptied.
    /// Zero keeps stale data forever.
    pub stale_after_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_library: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection_interval_ms: DEFAULT_CONNECTION_INTERVAL_MS,
            process_interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            show_tcp: true,
            show_udp: true,
            initial_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            stale_after_failures: DEFAULT_STALE_AFTER_FAILURES,
            native_library: None,
        }
    }
}

/// Clamp a requested connection interval to the supported minimum.
pub fn clamp_connection_interval(ms: u64) -> u64 {
    ms.max(MIN_CONNECTION_INTERVAL_MS)
}

impl MonitorConfig {
    /// `<config dir>/sightline/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sightline").join("settings.json"))
    }

    /// Read settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TelemetryError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            TelemetryError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        Ok(config.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TelemetryError::Config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TelemetryError::Config(format!("cannot serialize settings: {e}")))?;
        std::fs::write(path, json + "\n")
            .map_err(|e| TelemetryError::Config(format!("cannot write {}: {e}", path.display())))
    }

    /// Overwrite `path` with defaults and return them.
    pub fn reset(path: &Path) -> Result<Self> {
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Apply lower bounds to values a hand-edited file may have broken.
    pub fn normalized(mut self) -> Self {
        self.connection_interval_ms = clamp_connection_interval(self.connection_interval_ms);
        self.process_interval_ms = self.process_interval_ms.max(MIN_CONNECTION_INTERVAL_MS);
        self.stats_interval_ms = self.stats_interval_ms.max(MIN_CONNECTION_INTERVAL_MS);
        self.initial_buffer_capacity = self.initial_buffer_capacity.max(1);
        self
    }

    pub fn connection_interval(&self) -> Duration {
        Duration::from_millis(clamp_connection_interval(self.connection_interval_ms))
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
