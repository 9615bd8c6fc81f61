//! Struct marshalling.
//!
//! A struct starts at its alignment; each member sits at `start +
//! wire_offset` and the struct is padded out to `start + wire_size`. For a
//! pointer struct the flat phase leaves each pointer's id in its slot and the
//! referents follow the struct in pointer-layout order.

use super::format::{MemberKind, PointerLayout, PointerType, StructType, TypeDef, TypeId, TypeLibrary};
use super::interp::{Decoder, Encoder, Freer, MemorySizer};
use super::pointer::PendingPointer;
use super::value::{Addr, Value};
use super::MarshalError;

fn fields<'v>(s: &StructType, value: &'v Value) -> Result<&'v [Value], MarshalError> {
    match value {
        Value::Struct(fields) if fields.len() == s.members.len() => Ok(fields),
        other => Err(MarshalError::mismatch(
            format!("struct with {} fields", s.members.len()),
            other,
        )),
    }
}

fn pointer_type(lib: &TypeLibrary, id: TypeId) -> Result<&PointerType, MarshalError> {
    match lib.get(id)? {
        TypeDef::Pointer(ptr) => Ok(ptr),
        other => Err(MarshalError::mismatch("pointer member", &other.kind_name())),
    }
}

/// The pointer member an entry of the pointer layout refers to.
fn layout_field<'v>(entry: &PointerLayout, fields: &'v [Value]) -> Result<&'v Value, MarshalError> {
    fields.get(entry.member).ok_or_else(|| {
        MarshalError::mismatch(format!("field {}", entry.member), &fields.len())
    })
}

impl Encoder<'_, '_> {
    pub(crate) fn encode_struct(&mut self, s: &StructType, value: &Value) -> Result<(), MarshalError> {
        let fields = fields(s, value)?;
        self.buf.align(s.alignment)?;
        let start = self.buf.position();

        let lib = self.lib;
        let mut deferred: Vec<Option<(&PointerType, Addr)>> = vec![None; fields.len()];
        for ((member, field), slot) in s.members.iter().zip(fields).zip(deferred.iter_mut()) {
            self.buf.pad_to(start + member.wire_offset)?;
            match member.kind {
                MemberKind::Scalar(kind) => self.encode_scalar(kind, field)?,
                MemberKind::Struct(id) => self.encode(id, field)?,
                MemberKind::Pointer(id) => {
                    let ptr = pointer_type(lib, id)?;
                    *slot = self
                        .encode_pointer_id(ptr, field, true)?
                        .map(|addr| (ptr, addr));
                }
            }
        }
        self.buf.pad_to(start + s.wire_size)?;

        for entry in &s.pointers {
            if let Some((ptr, addr)) = deferred.get_mut(entry.member).and_then(Option::take) {
                self.encode_referent(ptr, addr)?;
            }
        }
        Ok(())
    }
}

impl Decoder<'_, '_> {
    pub(crate) fn decode_struct(
        &mut self,
        s: &StructType,
        existing: Option<&Value>,
    ) -> Result<Value, MarshalError> {
        let prior = match existing {
            Some(Value::Struct(fields)) => fields.as_slice(),
            _ => &[],
        };
        self.reader.align(s.alignment)?;
        let start = self.reader.position();

        let lib = self.lib;
        let mut fields = Vec::with_capacity(s.members.len());
        let mut deferred: Vec<Option<PendingPointer>> = vec![None; s.members.len()];
        for (index, (member, slot)) in s.members.iter().zip(deferred.iter_mut()).enumerate() {
            self.reader.skip_to(start + member.wire_offset)?;
            let field = match member.kind {
                MemberKind::Scalar(kind) => self.decode_scalar(kind)?,
                MemberKind::Struct(id) => self.decode(id, None)?,
                MemberKind::Pointer(id) => {
                    let ptr = pointer_type(lib, id)?;
                    let (addr, pending) = self.decode_pointer_id(ptr, prior.get(index), true)?;
                    *slot = pending;
                    Value::Pointer(addr)
                }
            };
            fields.push(field);
        }
        self.reader.skip_to(start + s.wire_size)?;

        for entry in &s.pointers {
            if let Some(pending) = deferred.get_mut(entry.member).and_then(Option::take) {
                self.decode_referent(pending)?;
            }
        }
        Ok(Value::Struct(fields))
    }
}

impl Freer<'_, '_> {
    pub(crate) fn free_struct(&mut self, s: &StructType, value: &Value) -> Result<(), MarshalError> {
        let fields = fields(s, value)?;
        let lib = self.lib;
        for entry in &s.pointers {
            let ptr = pointer_type(lib, entry.pointer)?;
            self.free_pointer(ptr, layout_field(entry, fields)?)?;
        }
        Ok(())
    }
}

impl MemorySizer<'_, '_> {
    pub(crate) fn struct_size(&mut self, s: &StructType, value: &Value) -> Result<usize, MarshalError> {
        let fields = fields(s, value)?;
        let lib = self.lib;
        let mut total = s.memory_size;
        for entry in &s.pointers {
            let ptr = pointer_type(lib, entry.pointer)?;
            total += self.referent_size(ptr, layout_field(entry, fields)?)?;
        }
        Ok(total)
    }
}
