//! Convenient re-exports for common usage patterns.
//!
//! # Example
//!
//! ```
//! use ndr_marshal::prelude::*;
//!
//! let mut lib = TypeLibrary::new();
//! let ty = lib.push(TypeDef::Scalar(ScalarKind::Hyper));
//! let wire = Ndr::new(&lib).marshal(ty, &Value::Hyper(-1), &Heap::new())?;
//! assert_eq!(wire, [0xFF; 8]);
//! # Ok::<(), MarshalError>(())
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// Engine
pub use crate::ndr::{
    Allocator, BudgetAllocator, CallOptions, FormatError, Heap, LegacyOptions, MarshalError, Ndr,
    Role, UnboundedAllocator, Value,
};

// Type descriptions
pub use crate::ndr::format::{
    ArrayType, CharWidth, Conformance, MemberKind, PointerFlags, PointerKind, PointerType,
    ScalarKind, StringType, StructType, TypeDef, TypeId, TypeLibrary,
};

// Tooling (requires "cli" feature)
#[cfg(feature = "cli")]
pub use crate::tool::{Config, Document};
