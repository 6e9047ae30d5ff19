//! Configuration Module
//!
//! Provides TOML-based configuration for netwarden.
//! Configuration is optional - CLI arguments can override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::report::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureSettings,
    pub window: WindowSettings,
    pub features: FeatureSettings,
    pub model: ModelSettings,
    pub output: OutputSettings,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if it exists, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.window.interval_secs == 0 {
            anyhow::bail!("window.interval_secs must be greater than 0");
        }
        if self.features.oversized_packet_bytes == 0 {
            anyhow::bail!("features.oversized_packet_bytes must be greater than 0");
        }
        if self.features.short_lived_packets == 0 {
            anyhow::bail!("features.short_lived_packets must be greater than 0");
        }
        if self.capture.channel_timeout_ms <= 0 {
            anyhow::bail!("capture.channel_timeout_ms must be positive");
        }
        Ok(())
    }
}

/// Capture-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Network interface to capture on (None = auto-detect)
    pub interface: Option<String>,
    /// BPF filter expression
    pub filter: Option<String>,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Capture read timeout in milliseconds
    pub channel_timeout_ms: i32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interface: None,
            filter: None,
            promiscuous: true,
            channel_timeout_ms: 100,
        }
    }
}

/// Aggregation-window configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Aggregation interval in seconds
    pub interval_secs: u64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self { interval_secs: 1 }
    }
}

/// Feature-extraction thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Packet sizes above this byte count are counted as oversized
    pub oversized_packet_bytes: u32,
    /// Minimum occurrence count before a port is reported as dominant
    pub port_frequency_min: u64,
    /// Windows with fewer packets than this are flagged short-lived
    pub short_lived_packets: u64,
    /// Port marking known attack traffic for self-evaluation
    pub sentinel_port: u16,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            oversized_packet_bytes: 1500,
            port_frequency_min: 5,
            short_lived_packets: 5,
            sentinel_port: 9,
        }
    }
}

/// Model-artifact configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to the persisted clustering artifact
    pub path: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: "kmeans_model.json".to_string(),
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Report format (text, json)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            verbose: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
