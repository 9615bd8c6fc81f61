//! Type-driven dispatch for every pass.
//!
//! Each pass walks a [`TypeId`] and routes on the definition to the scalar,
//! pointer, array and struct marshallers, which extend the pass structs
//! defined here from their own modules.

use super::alloc::Allocator;
use super::buffer::{WireBuffer, WireReader};
use super::format::{ScalarKind, TypeDef, TypeId, TypeLibrary};
use super::state::{MarshalState, Mode};
use super::value::{Heap, Value};
use super::{FormatError, MarshalError};

/// Size and write passes.
pub(crate) struct Encoder<'a, 'w> {
    pub lib: &'a TypeLibrary,
    pub heap: &'a Heap<'w>,
    pub buf: WireBuffer<'a>,
    pub state: MarshalState,
}

impl<'a, 'w> Encoder<'a, 'w> {
    pub fn new(lib: &'a TypeLibrary, heap: &'a Heap<'w>, buf: WireBuffer<'a>, state: MarshalState) -> Self {
        debug_assert_eq!(state.mode == Mode::Size, buf.is_sizing());
        Self { lib, heap, buf, state }
    }

    pub fn encode(&mut self, id: TypeId, value: &Value) -> Result<(), MarshalError> {
        self.state.enter()?;
        let lib = self.lib;
        match lib.get(id)? {
            TypeDef::Scalar(kind) => self.encode_scalar(*kind, value)?,
            TypeDef::Pointer(ptr) => self.encode_pointer(ptr, value)?,
            TypeDef::Array(array) => self.encode_array(array, value)?,
            TypeDef::String(string) => self.encode_string(string, value)?,
            TypeDef::Struct(s) => self.encode_struct(s, value)?,
        }
        self.state.leave();
        Ok(())
    }
}

/// Read pass.
pub(crate) struct Decoder<'a, 'w> {
    pub lib: &'a TypeLibrary,
    pub reader: WireReader<'w>,
    pub heap: &'a mut Heap<'w>,
    pub allocator: &'a mut dyn Allocator,
    pub state: MarshalState,
}

impl<'a, 'w> Decoder<'a, 'w> {
    pub fn new(
        lib: &'a TypeLibrary,
        reader: WireReader<'w>,
        heap: &'a mut Heap<'w>,
        allocator: &'a mut dyn Allocator,
        state: MarshalState,
    ) -> Self {
        Self {
            lib,
            reader,
            heap,
            allocator,
            state,
        }
    }

    /// Decode a value of type `id`.
    ///
    /// `existing` is the caller's current value at the same position, used
    /// to find caller-supplied pointer destinations.
    pub fn decode(&mut self, id: TypeId, existing: Option<&Value>) -> Result<Value, MarshalError> {
        self.state.enter()?;
        let lib = self.lib;
        let value = match lib.get(id)? {
            TypeDef::Scalar(kind) => self.decode_scalar(*kind)?,
            TypeDef::Pointer(ptr) => self.decode_pointer(ptr, existing)?,
            TypeDef::Array(array) => self.decode_array(array)?,
            TypeDef::String(string) => self.decode_string(string)?,
            TypeDef::Struct(s) => self.decode_struct(s, existing)?,
        };
        self.state.leave();
        Ok(value)
    }
}

/// Outcome of a free pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeReport {
    /// Slots released.
    pub freed: usize,
    /// Bytes returned to the allocator.
    pub bytes: usize,
    /// Referents reached again after they were already released.
    pub already_absent: usize,
    /// Referents left alone because their pointer is marked don't-free.
    pub kept: usize,
}

/// Free pass.
pub(crate) struct Freer<'a, 'w> {
    pub lib: &'a TypeLibrary,
    pub heap: &'a mut Heap<'w>,
    pub allocator: &'a mut dyn Allocator,
    pub state: MarshalState,
    pub report: FreeReport,
}

impl<'a, 'w> Freer<'a, 'w> {
    pub fn new(
        lib: &'a TypeLibrary,
        heap: &'a mut Heap<'w>,
        allocator: &'a mut dyn Allocator,
        state: MarshalState,
    ) -> Self {
        Self {
            lib,
            heap,
            allocator,
            state,
            report: FreeReport::default(),
        }
    }

    /// Release every referent reachable from `value`.
    pub fn free(&mut self, id: TypeId, value: &Value) -> Result<(), MarshalError> {
        self.state.enter()?;
        let lib = self.lib;
        match lib.get(id)? {
            TypeDef::Scalar(_) | TypeDef::String(_) | TypeDef::Array(_) => {}
            TypeDef::Pointer(ptr) => self.free_pointer(ptr, value)?,
            TypeDef::Struct(s) => self.free_struct(s, value)?,
        }
        self.state.leave();
        Ok(())
    }
}

/// Host memory needed to hold a value graph.
pub(crate) struct MemorySizer<'a, 'w> {
    pub lib: &'a TypeLibrary,
    pub heap: &'a Heap<'w>,
    pub state: MarshalState,
}

impl<'a, 'w> MemorySizer<'a, 'w> {
    pub fn new(lib: &'a TypeLibrary, heap: &'a Heap<'w>, state: MarshalState) -> Self {
        Self { lib, heap, state }
    }

    /// Size of `value` plus everything it points to.
    ///
    /// A pointer contributes its referent but not its own slot, which is
    /// counted by whatever holds it.
    pub fn size(&mut self, id: TypeId, value: &Value) -> Result<usize, MarshalError> {
        self.state.enter()?;
        let lib = self.lib;
        let size = match lib.get(id)? {
            TypeDef::Pointer(ptr) => self.referent_size(ptr, value)?,
            TypeDef::Struct(s) => self.struct_size(s, value)?,
            TypeDef::Array(array) => match value {
                Value::Array(items) => {
                    element_wire_size(lib, array.element)?;
                    let mut total = 0;
                    for item in items {
                        total += self.size(array.element, item)?;
                    }
                    total
                }
                other => return Err(MarshalError::mismatch("array", other)),
            },
            TypeDef::Scalar(_) | TypeDef::String(_) => flat_size(lib, id, value)?,
        };
        self.state.leave();
        Ok(size)
    }
}

/// Host size of a value without following pointers.
pub(crate) fn flat_size(lib: &TypeLibrary, id: TypeId, value: &Value) -> Result<usize, MarshalError> {
    Ok(match (lib.get(id)?, value) {
        (TypeDef::Array(array), Value::Array(items)) => items.len() * array.element_size as usize,
        (TypeDef::String(_), Value::String(chars)) => chars.len(),
        (TypeDef::String(_), Value::WString(units)) => units.len() * 2,
        (TypeDef::Array(_) | TypeDef::String(_), other) => {
            return Err(MarshalError::mismatch(lib.get(id)?.kind_name(), other));
        }
        _ => lib.flat_memory_size(id)?,
    })
}

/// Wire size of one array element.
///
/// Elements are laid out back to back with nothing out of line, so only
/// scalars and flat structs qualify.
pub(crate) fn element_wire_size(lib: &TypeLibrary, id: TypeId) -> Result<usize, MarshalError> {
    Ok(match lib.get(id)? {
        TypeDef::Scalar(kind) => kind.wire_size(),
        TypeDef::Struct(s) if s.is_flat() => s.wire_size,
        other => {
            return Err(FormatError::Unsupported(format!(
                "array element {} is a {}, not a scalar or flat struct",
                id,
                other.kind_name()
            ))
            .into());
        }
    })
}

/// True when a server may leave a referent of this type in the wire buffer:
/// scalars whose host and wire forms match, strings, and arrays of such
/// scalars.
pub(crate) fn viewable(lib: &TypeLibrary, id: TypeId) -> Result<bool, MarshalError> {
    let plain = |kind: ScalarKind| !kind.needs_widening();
    Ok(match lib.get(id)? {
        TypeDef::Scalar(kind) => plain(*kind),
        TypeDef::String(_) => true,
        TypeDef::Array(array) => matches!(lib.get(array.element)?, TypeDef::Scalar(k) if plain(*k)),
        TypeDef::Pointer(_) | TypeDef::Struct(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndr::format::{
        ArrayType, CharWidth, Conformance, CorrelationDescriptor, MemberKind, PointerFlags,
        PointerKind, PointerType, StringType, StructType,
    };

    fn correlated() -> Conformance {
        Conformance::Correlated(CorrelationDescriptor {
            kind: 0x28,
            op: 0,
            offset: 0,
        })
    }

    #[test]
    fn test_viewable_types() {
        let mut lib = TypeLibrary::new();
        let long = lib.push(TypeDef::Scalar(ScalarKind::Long));
        let enum16 = lib.push(TypeDef::Scalar(ScalarKind::Enum16));
        let string = lib.push(TypeDef::String(StringType {
            width: CharWidth::Wide,
            capacity: None,
        }));
        let longs = lib.push(TypeDef::Array(ArrayType {
            alignment: 4,
            element_size: 4,
            conformance: correlated(),
            element: long,
        }));
        let enums = lib.push(TypeDef::Array(ArrayType {
            alignment: 2,
            element_size: 4,
            conformance: correlated(),
            element: enum16,
        }));

        assert!(viewable(&lib, long).unwrap());
        assert!(!viewable(&lib, enum16).unwrap());
        assert!(viewable(&lib, string).unwrap());
        assert!(viewable(&lib, longs).unwrap());
        assert!(!viewable(&lib, enums).unwrap());
    }

    #[test]
    fn test_flat_size() {
        let mut lib = TypeLibrary::new();
        let enum16 = lib.push(TypeDef::Scalar(ScalarKind::Enum16));
        let string = lib.push(TypeDef::String(StringType {
            width: CharWidth::Wide,
            capacity: None,
        }));
        assert_eq!(flat_size(&lib, enum16, &Value::Enum16(1)).unwrap(), 4);
        assert_eq!(flat_size(&lib, string, &Value::wide_string("ab")).unwrap(), 6);
    }

    #[test]
    fn test_array_elements_must_be_flat() {
        let mut lib = TypeLibrary::new();
        let long = lib.push(TypeDef::Scalar(ScalarKind::Long));
        let pointer = lib.push(TypeDef::Pointer(PointerType {
            kind: PointerKind::Unique,
            flags: PointerFlags::default(),
            target: long,
        }));
        let flat = StructType::layout(
            &lib,
            &[MemberKind::Scalar(ScalarKind::Short), MemberKind::Scalar(ScalarKind::Long)],
        )
        .unwrap();
        let flat = lib.push(TypeDef::Struct(flat));
        let with_pointer = StructType::layout(
            &lib,
            &[MemberKind::Scalar(ScalarKind::Long), MemberKind::Pointer(pointer)],
        )
        .unwrap();
        let with_pointer = lib.push(TypeDef::Struct(with_pointer));

        assert_eq!(element_wire_size(&lib, long).unwrap(), 4);
        assert_eq!(element_wire_size(&lib, flat).unwrap(), 8);
        assert!(element_wire_size(&lib, pointer).unwrap_err().is_format());
        assert!(element_wire_size(&lib, with_pointer).unwrap_err().is_format());
    }
}
