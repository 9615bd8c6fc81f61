//! Unified error type for the ndr-marshal library.
//!
//! This module provides a single [`Error`] type that encompasses the engine's
//! errors and, with the `cli` feature, the errors of the tooling around it.

use thiserror::Error;

use crate::ndr::{FormatError, MarshalError};
#[cfg(feature = "cli")]
use crate::tool::ConfigError;

/// Unified error type for all ndr-marshal operations.
///
/// # Example
///
/// ```
/// use ndr_marshal::{LegacyOptions, Result, TypeLibrary};
///
/// fn parse(bytes: &[u8]) -> Result<usize> {
///     let (lib, _) = TypeLibrary::from_format_string(bytes, 0, &LegacyOptions::default())?;
///     Ok(lib.len())
/// }
///
/// assert!(parse(&[0x08]).is_ok());
/// assert!(parse(&[0xee]).unwrap_err().is_format());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Error from marshalling, unmarshalling or freeing.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Error from reading a type description.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error.
    #[cfg(feature = "cli")]
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Value document (JSON) error.
    #[cfg(feature = "cli")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hex-encoded format string error.
    #[cfg(feature = "cli")]
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this is a marshalling error.
    pub fn is_marshal(&self) -> bool {
        matches!(self, Self::Marshal(_))
    }

    /// Returns `true` for a malformed type description, whether it surfaced
    /// while parsing or in the middle of a call.
    pub fn is_format(&self) -> bool {
        match self {
            Self::Format(_) => true,
            Self::Marshal(e) => e.is_format(),
            _ => false,
        }
    }

    /// Returns `true` if this is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
