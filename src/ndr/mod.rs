//! NDR marshalling engine.
//!
//! # Module Organization
//!
//! - [`buffer`]: Wire buffer traversal for the size, write and read passes
//! - `error`: Format and marshalling errors
//! - [`format`]: Type descriptions and the legacy byte-code reader
//! - `interp`: Type-driven dispatch shared by every pass
//! - `scalar`, `pointer`, `array`, `structure`: Per-kind marshallers
//! - [`table`]: Full-pointer reference-id table
//! - [`value`]: Values, the referent heap and wire views
//! - [`alloc`]: Injected allocators and the per-call allocation list
//! - [`state`]: Per-call options and destination selection
//!
//! The [`Ndr`] facade ties the passes together.

pub mod alloc;
mod array;
pub mod buffer;
mod error;
pub mod format;
mod interp;
mod pointer;
mod scalar;
pub mod state;
mod structure;
pub mod table;
pub mod value;

pub use alloc::{Allocator, BudgetAllocator, UnboundedAllocator};
pub use buffer::{WireBuffer, WireReader};
pub use error::{FormatError, MarshalError};
pub use format::{
    LegacyOptions, PointerFlags, PointerKind, PointerType, ScalarKind, TypeDef, TypeId,
    TypeLibrary,
};
pub use interp::FreeReport;
pub use state::{CallOptions, Destination, Mode, Role};
pub use table::FullPointerTable;
pub use value::{Addr, Heap, Slot, Value, WireView};

use crate::logging::{debug, error};
use interp::{Decoder, Encoder, Freer, MemorySizer};
use state::MarshalState;

/// Marshalling engine bound to a type library.
///
/// Every method is one call: it creates its own per-call state (full-pointer
/// table, unique-id counter, allocation list) and drops it on return.
///
/// # Example
///
/// ```
/// use ndr_marshal::{Heap, LegacyOptions, Ndr, TypeLibrary, Value};
///
/// // unique pointer, simple, to a long
/// let format = [0x12, 0x08, 0x08, 0x5c];
/// let (lib, ty) = TypeLibrary::from_format_string(&format, 0, &LegacyOptions::default())?;
///
/// let mut heap = Heap::new();
/// let root = Value::Pointer(Some(heap.alloc(Value::Long(0xCAFE_BABEu32 as i32))));
///
/// let ndr = Ndr::new(&lib);
/// let wire = ndr.marshal(ty, &root, &heap)?;
/// assert_eq!(wire, [1, 0, 0, 0, 0xBE, 0xBA, 0xFE, 0xCA]);
///
/// let mut decoded = Heap::new();
/// let (value, consumed) = ndr.unmarshal(ty, &wire, &mut decoded)?;
/// assert_eq!(consumed, 8);
/// let addr = value.as_pointer().flatten().ok_or("null")?;
/// assert_eq!(decoded.get(addr), Some(&Value::Long(0xCAFE_BABEu32 as i32)));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Ndr<'a> {
    lib: &'a TypeLibrary,
    options: CallOptions,
}

impl<'a> Ndr<'a> {
    /// Create an engine with default options (client role).
    pub fn new(lib: &'a TypeLibrary) -> Self {
        Self::with_options(lib, CallOptions::default())
    }

    pub fn with_options(lib: &'a TypeLibrary, options: CallOptions) -> Self {
        Self { lib, options }
    }

    pub fn options(&self) -> CallOptions {
        self.options
    }

    pub fn library(&self) -> &'a TypeLibrary {
        self.lib
    }

    /// Size pass: exact number of wire bytes `root` marshals to.
    pub fn buffer_size(&self, ty: TypeId, root: &Value, heap: &Heap<'_>) -> Result<usize, MarshalError> {
        let state = MarshalState::new(Mode::Size, self.options);
        let mut encoder = Encoder::new(self.lib, heap, WireBuffer::sizing(), state);
        encoder.encode(ty, root)?;
        Ok(encoder.buf.position())
    }

    /// Size pass followed by a write pass into an exactly-sized buffer.
    pub fn marshal(&self, ty: TypeId, root: &Value, heap: &Heap<'_>) -> Result<Vec<u8>, MarshalError> {
        let computed = self.buffer_size(ty, root, heap)?;
        let mut out = vec![0u8; computed];
        let written = self.marshal_into(ty, root, heap, &mut out)?;
        if written != computed {
            error!(computed, written, "size and write passes disagree");
            return Err(MarshalError::SizeMismatch { computed, written });
        }
        debug!(ty = %ty, bytes = written, "marshalled");
        Ok(out)
    }

    /// Write pass into a caller-provided, pre-zeroed region.
    ///
    /// Returns the number of bytes written. Writing never crosses the end of
    /// `out`; running out of room is [`MarshalError::BufferExhausted`].
    pub fn marshal_into(
        &self,
        ty: TypeId,
        root: &Value,
        heap: &Heap<'_>,
        out: &mut [u8],
    ) -> Result<usize, MarshalError> {
        let state = MarshalState::new(Mode::Marshal, self.options);
        let mut encoder = Encoder::new(self.lib, heap, WireBuffer::writing(out), state);
        encoder.encode(ty, root)?;
        Ok(encoder.buf.position())
    }

    /// Read pass with a fresh, unbounded allocator.
    ///
    /// Returns the root value and the number of wire bytes consumed.
    pub fn unmarshal<'w>(
        &self,
        ty: TypeId,
        wire: &'w [u8],
        heap: &mut Heap<'w>,
    ) -> Result<(Value, usize), MarshalError> {
        let mut allocator = UnboundedAllocator::new();
        self.unmarshal_with(ty, wire, heap, None, &mut allocator)
    }

    /// Read pass with caller-supplied destinations and allocator.
    ///
    /// `existing` is the caller's current value for the root; live pointers
    /// in it are reused as destinations unless `must_alloc` is set. On error
    /// every slot created during the call is dropped and its bytes are
    /// returned to `allocator`, leaving `heap` as it was.
    pub fn unmarshal_with<'w>(
        &self,
        ty: TypeId,
        wire: &'w [u8],
        heap: &mut Heap<'w>,
        existing: Option<&Value>,
        allocator: &mut dyn Allocator,
    ) -> Result<(Value, usize), MarshalError> {
        let state = MarshalState::with_heap_mark(Mode::Unmarshal, self.options, heap.len());
        let mut decoder = Decoder::new(self.lib, WireReader::new(wire), heap, allocator, state);
        let result = decoder.decode(ty, existing);
        let consumed = decoder.reader.position();
        let Decoder { state, .. } = decoder;

        match result {
            Ok(value) => {
                debug!(ty = %ty, bytes = consumed, role = %self.options.role, "unmarshalled");
                Ok((value, consumed))
            }
            Err(e) => {
                error!(ty = %ty, offset = consumed, error = %e, "unmarshal failed, releasing allocations");
                state.allocations.release_all(heap, allocator);
                Err(e)
            }
        }
    }

    /// Free pass: release every referent reachable from `root`.
    pub fn free(
        &self,
        ty: TypeId,
        root: &Value,
        heap: &mut Heap<'_>,
        allocator: &mut dyn Allocator,
    ) -> Result<FreeReport, MarshalError> {
        let state = MarshalState::new(Mode::Free, self.options);
        let mut freer = Freer::new(self.lib, heap, allocator, state);
        freer.free(ty, root)?;
        debug!(ty = %ty, freed = freer.report.freed, bytes = freer.report.bytes, "freed");
        Ok(freer.report)
    }

    /// Host memory the value graph under `root` occupies, counting each full
    /// pointer referent once.
    pub fn memory_size(&self, ty: TypeId, root: &Value, heap: &Heap<'_>) -> Result<usize, MarshalError> {
        let state = MarshalState::new(Mode::Size, self.options);
        MemorySizer::new(self.lib, heap, state).size(ty, root)
    }
}
