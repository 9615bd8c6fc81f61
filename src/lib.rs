//! NDR-style marshalling engine driven by type-description byte-code.
//!
//! This library converts typed in-memory values (scalars, pointers,
//! conformant arrays, strings and structs) into a flat little-endian wire
//! buffer and back. Pointer aliasing survives the trip through a full-pointer
//! reference-id table, and client/server ownership rules decide where each
//! unmarshalled referent lives.
//!
//! # Quick Start
//!
//! ```
//! use ndr_marshal::prelude::*;
//!
//! // reference pointer to a conformant string
//! let format = [0x11, 0x08, 0x22, 0x5c];
//! let (lib, ty) = TypeLibrary::from_format_string(&format, 0, &LegacyOptions::default())?;
//!
//! let mut heap = Heap::new();
//! let root = Value::Pointer(Some(heap.alloc(Value::c_string("hello"))));
//!
//! let ndr = Ndr::new(&lib);
//! let wire = ndr.marshal(ty, &root, &heap)?;
//! assert_eq!(wire.len(), 12 + 6);
//!
//! let mut decoded = Heap::new();
//! let (value, _) = ndr.unmarshal(ty, &wire, &mut decoded)?;
//! assert_eq!(ndr.memory_size(ty, &value, &decoded)?, 6);
//! # Ok::<(), ndr_marshal::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`ndr`] - The engine: wire buffer, type descriptions, marshallers
//! - [`prelude`] - Common imports
//! - `tool` - Configuration, logging and value documents for the CLI (requires `cli` feature)
//!
//! # Feature Flags
//!
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `serde` - Serialize and deserialize [`Value`]s
//! - `cli` - Enable the command-line interface binary
//! - `full` - Enable all features

mod logging;
pub mod ndr;
pub mod prelude;
#[cfg(feature = "cli")]
pub mod tool;

mod error;

// Re-export the unified error type
pub use error::{Error, Result};

// Re-export engine types at crate root for convenience
pub use ndr::{
    Addr, Allocator, BudgetAllocator, CallOptions, Destination, FormatError, FreeReport,
    FullPointerTable, Heap, LegacyOptions, MarshalError, Mode, Ndr, PointerFlags, PointerKind,
    PointerType, Role, ScalarKind, Slot, TypeDef, TypeId, TypeLibrary, UnboundedAllocator, Value,
    WireBuffer, WireReader, WireView,
};
