//! Tool configuration parsing.

use serde::Deserialize;
use std::path::Path;

use crate::ndr::state::DEFAULT_MAX_DEPTH;
use crate::ndr::{Allocator, BudgetAllocator, CallOptions, LegacyOptions, Role, UnboundedAllocator};

/// Configuration loaded from a TOML file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Per-call engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Side of the call the tool plays.
    pub role: Role,
    /// Ignore caller-supplied destinations.
    pub must_alloc: bool,
    /// Bound on nested referents and aggregates.
    pub max_depth: usize,
    /// Byte budget for unmarshalled referents; unbounded when absent.
    pub allocation_limit: Option<usize>,
    /// Format tag to read as a full pointer.
    pub full_pointer_tag: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            must_alloc: false,
            max_depth: DEFAULT_MAX_DEPTH,
            allocation_limit: None,
            full_pointer_tag: None,
        }
    }
}

impl EngineConfig {
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            role: self.role,
            must_alloc: self.must_alloc,
            max_depth: self.max_depth,
        }
    }

    pub fn legacy_options(&self) -> LegacyOptions {
        LegacyOptions {
            full_pointer_tag: self.full_pointer_tag,
        }
    }

    /// Allocator honoring `allocation_limit`.
    pub fn allocator(&self) -> Box<dyn Allocator> {
        match self.allocation_limit {
            Some(limit) => Box::new(BudgetAllocator::new(limit)),
            None => Box::new(UnboundedAllocator::new()),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"ndr_marshal=trace"`.
    pub level: String,
    pub format: LogFormat,
    /// `"stdout"`, `"stderr"` or a file path.
    pub output: String,
    pub color: bool,
    pub timestamps: bool,
    /// Include the event target in each line.
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            output: "stderr".to_string(),
            color: true,
            timestamps: false,
            target: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(String, std::io::Error),
    /// TOML parse error.
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Failed to read config file '{}': {}", path, e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
