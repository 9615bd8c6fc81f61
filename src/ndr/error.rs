//! Error types for format parsing and marshalling.

use thiserror::Error;

/// A malformed or unsupported type description.
///
/// Format strings are a program the engine executes, so every variant is
/// fatal: once a tag is wrong no later byte offset can be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unknown format tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Format tag 0x{tag:02x} at offset {offset} is not valid here: {context}")]
    UnexpectedTag {
        tag: u8,
        offset: usize,
        context: &'static str,
    },

    #[error("Format string truncated at offset {offset}: need {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    #[error("Relative offset {relative} at {offset} points outside the format string")]
    BadOffset { offset: usize, relative: i16 },

    #[error("Invalid alignment byte {0}: expected 0, 1, 3 or 7")]
    BadAlignment(u8),

    #[error("Struct at offset {offset} declares {declared} bytes but its members need {computed}")]
    StructSize {
        offset: usize,
        declared: u16,
        computed: usize,
    },

    #[error("Pointer member at memory offset {memory_offset} has no pointer layout entry")]
    MissingPointerLayout { memory_offset: usize },

    #[error("Pointer layout entry for memory offset {memory_offset} matches no pointer member")]
    OrphanPointerLayout { memory_offset: usize },

    #[error("Array element size {declared} does not match element type size {actual}")]
    ElementSize { declared: u16, actual: usize },

    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Unknown type id {0}")]
    UnknownType(u32),
}

/// Errors that abort a marshal, unmarshal or free call.
///
/// None of these are retried inside the engine; they unwind to the call
/// boundary and the call's allocations are released.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Buffer exhausted: need {needed} bytes, have {available}")]
    BufferExhausted { needed: usize, available: usize },

    #[error("Size pass computed {computed} bytes but write pass produced {written}")]
    SizeMismatch { computed: usize, written: usize },

    #[error("Allocation of {requested} bytes failed (limit {limit})")]
    AllocationFailure { requested: usize, limit: usize },

    #[error("Full pointer reference id {0} was never registered")]
    InvalidTableReference(u32),

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Reference pointer must not be null")]
    NullReferencePointer,

    #[error("Pointer refers to address {0} which is not live in the heap")]
    DanglingPointer(u32),

    #[error("String of {len} elements exceeds declared capacity {capacity}")]
    StringTooLong { len: usize, capacity: usize },

    #[error("Array has {actual} elements but the type fixes {expected}")]
    ConformanceMismatch { expected: u32, actual: usize },

    #[error("Invalid conformance on the wire: offset {offset} + count {actual} exceeds maximum {max}")]
    InvalidConformance { max: u32, offset: u32, actual: u32 },

    #[error("Enum value {0} does not fit the 16-bit wire form")]
    EnumOutOfRange(i32),

    #[error("Nesting depth exceeds {0}")]
    DepthExceeded(usize),

    #[error("Pointer cycle through address {0} reached without a full pointer")]
    PointerCycle(u32),
}

impl MarshalError {
    pub(crate) fn mismatch(expected: impl Into<String>, got: &impl std::fmt::Debug) -> Self {
        let full = format!("{:?}", got);
        let mut got: String = full.chars().take(64).collect();
        if got.len() < full.len() {
            got.push_str("...");
        }
        Self::TypeMismatch {
            expected: expected.into(),
            got,
        }
    }

    /// Returns `true` for failures caused by a corrupt type description.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}
