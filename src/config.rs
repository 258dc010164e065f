//! Configuration types for the coordination core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Backend endpoint settings.
    pub backend: BackendConfig,
    /// Retry delay schedule shared by all polling consumers.
    pub backoff: BackoffConfig,
    /// Round-trip latency probe settings.
    pub latency: LatencyConfig,
    /// Presence heartbeat and roster settings.
    pub presence: PresenceConfig,
    /// Voice net session settings.
    pub voice: VoiceConfig,
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the coordination backend.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_owned(),
            request_timeout_ms: 5_000,
        }
    }
}

/// Exponential backoff schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay for attempt 0, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for the doubled delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts after which the controller stops yielding delays.
    pub max_retries: u32,
    /// Uniform jitter fraction applied to each delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            max_retries: 5,
            jitter: 0.1,
        }
    }
}

/// Latency probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Interval between probes in milliseconds.
    pub probe_interval_ms: u64,
    /// Round trips at or below this are classified healthy (ms).
    pub healthy_threshold_ms: u64,
    /// Round trips above this (but within healthy) degrade readiness (ms).
    pub elevated_threshold_ms: u64,
    /// Timeout budget for a single probe request (ms).
    pub request_timeout_ms: u64,
    /// Number of recent samples kept in the rolling window.
    pub window: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 20_000,
            healthy_threshold_ms: 300,
            elevated_threshold_ms: 150,
            request_timeout_ms: 5_000,
            window: 10,
        }
    }
}

/// Presence heartbeat and roster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Heartbeat write interval while attached to a net (ms).
    pub heartbeat_interval_ms: u64,
    /// Roster read-side poll interval (ms).
    pub roster_poll_interval_ms: u64,
    /// Records older than this are treated offline (ms).
    ///
    /// Nine missed heartbeats' worth of grace at the default cadence.
    pub recency_window_ms: u64,
    /// Timeout budget for a single presence write or read (ms).
    pub request_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            roster_poll_interval_ms: 15_000,
            recency_window_ms: 90_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// Voice net session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Timeout budget for the token request during join (ms).
    pub join_timeout_ms: u64,
    /// Minimum simulated roster size (inclusive).
    pub sim_roster_min: usize,
    /// Maximum simulated roster size (inclusive).
    pub sim_roster_max: usize,
    /// Maximum randomized join offset for simulated participants (seconds).
    pub sim_join_offset_max_secs: i64,
    /// Probability that a simulated participant starts muted.
    pub mute_probability: f64,
    /// Probability that a simulated participant is speaking; also the
    /// per-tick probability that the simulated roster churns.
    pub activity_variance: f64,
    /// Interval between simulated churn ticks (ms).
    pub churn_interval_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 8_000,
            sim_roster_min: 2,
            sim_roster_max: 8,
            sim_join_offset_max_secs: 30,
            mute_probability: 0.2,
            activity_variance: 0.3,
            churn_interval_ms: 12_000,
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CoordError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CoordError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/netcontrol/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("netcontrol").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("netcontrol")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/netcontrol-config/config.toml")
        }
    }
}
