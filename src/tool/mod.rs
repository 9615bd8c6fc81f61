//! Support for the `ndr-marshal` command-line tool.
//!
//! - [`config`]: TOML configuration for the engine and logging
//! - [`logging`]: Tracing subscriber installation
//! - [`document`]: JSON value documents

pub mod config;
pub mod document;
pub mod logging;

pub use config::{Config, ConfigError, EngineConfig, LogFormat, LoggingConfig};
pub use document::Document;
pub use logging::{LoggingError, init as init_logging};

use crate::error::Result;

/// Read format-string bytes from a command-line argument.
///
/// `@path` reads the raw bytes of a file; anything else is hex text, with
/// whitespace, commas and `0x` prefixes ignored so byte listings can be
/// pasted as-is.
pub fn read_format(arg: &str) -> Result<Vec<u8>> {
    if let Some(path) = arg.strip_prefix('@') {
        return Ok(std::fs::read(path)?);
    }
    let digits: String = arg
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .map(|token| {
            if token.len() == 1 {
                format!("0{token}")
            } else {
                token.to_string()
            }
        })
        .collect();
    Ok(hex::decode(digits)?)
}
