use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gpuwire_protocol::wire::{DEFAULT_COMPRESSION_THRESHOLD, HEADER_SIZE};

use crate::error::CoreError;

/// Top-level gpuwire configuration, loaded from gpuwire.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Bytes in flight per direction before writes fail
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Record payloads above this size are LZ4-compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Which native backend the server drives
    #[serde(default)]
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How the two session endpoints are connected
    #[serde(default)]
    pub mode: TransportMode,
}

/// Native backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    D3d12,
    Metal,
    Opengl,
    Vulkan,
    #[default]
    Null,
}

/// Endpoint connection selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Both endpoints share in-process memory channels
    #[default]
    Memory,
    /// Channels are bridged over an async byte stream
    Stream,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            compression_threshold: default_compression_threshold(),
        }
    }
}

impl WireConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: WireConfig =
            toml::from_str(&content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists and is valid, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("using default configuration ({}): {}", path, e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.channel.capacity <= HEADER_SIZE {
            return Err(CoreError::ConfigError(format!(
                "channel capacity {} cannot hold a single record header ({} bytes)",
                self.channel.capacity, HEADER_SIZE
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::ConfigError(e.to_string()))
    }
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::D3d12 => "d3d12",
            BackendKind::Metal => "metal",
            BackendKind::Opengl => "opengl",
            BackendKind::Vulkan => "vulkan",
            BackendKind::Null => "null",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d3d12" => Ok(BackendKind::D3d12),
            "metal" => Ok(BackendKind::Metal),
            "opengl" => Ok(BackendKind::Opengl),
            "vulkan" => Ok(BackendKind::Vulkan),
            "null" => Ok(BackendKind::Null),
            other => Err(format!(
                "unknown backend '{}' (expected d3d12, metal, null, opengl or vulkan)",
                other
            )),
        }
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportMode::Memory),
            "stream" => Ok(TransportMode::Stream),
            other => Err(format!("unknown transport '{}' (expected memory or stream)", other)),
        }
    }
}

/// Returns the config file path: `$GPUWIRE_CONFIG` if set, else `./gpuwire.toml`.
pub fn default_config_path() -> String {
    std::env::var("GPUWIRE_CONFIG").unwrap_or_else(|_| "gpuwire.toml".to_string())
}

fn default_capacity() -> usize {
    10_000_000
}

fn default_compression_threshold() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}
