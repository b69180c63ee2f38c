//! Configuration loading traits and types.
//!
//! TOML configuration for the AXON runtime, loaded through the
//! [`ConfigLoader`] trait.
//!
//! # TOML Example
//!
//! ```toml
//! control_frequency_hz = 1000.0
//! plugin_dirs = ["/opt/axon/plugins"]
//!
//! [rt]
//! cpu_core = 3
//! priority = 80
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consts::DEFAULT_CONTROL_FREQUENCY_HZ;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Real-time scheduling parameters for the cycle thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RtConfig {
    /// CPU core the cycle thread is pinned to.
    pub cpu_core: usize,
    /// SCHED_FIFO priority (1..=99).
    pub priority: i32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: 0,
            priority: 80,
        }
    }
}

/// Runtime configuration for an AXON server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Control cycle frequency [Hz].
    #[serde(default = "default_frequency")]
    pub control_frequency_hz: f64,

    /// Directories scanned for plugin images at startup.
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,

    /// Real-time scheduling parameters.
    #[serde(default)]
    pub rt: RtConfig,
}

fn default_frequency() -> f64 {
    DEFAULT_CONTROL_FREQUENCY_HZ
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_frequency_hz: DEFAULT_CONTROL_FREQUENCY_HZ,
            plugin_dirs: Vec::new(),
            rt: RtConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Cycle period derived from the control frequency [ns].
    pub fn cycle_time_ns(&self) -> i64 {
        (1_000_000_000.0 / self.control_frequency_hz) as i64
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if:
    /// - `control_frequency_hz` is not finite and positive
    /// - `rt.priority` is outside 1..=99
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.control_frequency_hz.is_finite() || self.control_frequency_hz <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "control_frequency_hz must be positive, got {}",
                self.control_frequency_hz
            )));
        }
        if !(1..=99).contains(&self.rt.priority) {
            return Err(ConfigError::ValidationError(format!(
                "rt.priority must be in 1..=99, got {}",
                self.rt.priority
            )));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
