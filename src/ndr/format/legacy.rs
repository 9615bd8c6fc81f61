//! Reader for legacy type-description byte-code.
//!
//! Layouts follow the MIDL conventions: alignment bytes hold `alignment - 1`,
//! sizes are little-endian `u16`, and references to other descriptions are
//! `i16` offsets relative to the position of the offset field itself.

use std::collections::HashMap;

use super::tags::*;
use super::{
    ArrayType, CharWidth, Conformance, CorrelationDescriptor, LayoutCursor, Member, MemberKind,
    PointerFlags, PointerKind, PointerLayout, PointerType, ScalarKind, StringType, StructType,
    TypeDef, TypeId, TypeLibrary,
};
use crate::logging::info;
use crate::ndr::buffer::align_to;
use crate::ndr::FormatError;

/// Options for reading legacy byte-code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyOptions {
    /// Byte code that denotes a full pointer.
    ///
    /// Full pointers have no tag in the observed contract, so none is assumed.
    /// Set this only after confirming the value against the peer's format
    /// strings; it must not collide with the ref, unique or simple tags.
    pub full_pointer_tag: Option<u8>,
}

pub(super) fn parse(
    bytes: &[u8],
    root_offset: usize,
    options: &LegacyOptions,
) -> Result<(TypeLibrary, TypeId), FormatError> {
    let mut parser = Parser {
        bytes,
        lib: TypeLibrary::new(),
        memo: HashMap::new(),
        options,
    };
    let root = parser.parse_at(root_offset)?;
    info!(types = parser.lib.len(), root = %root, "parsed format string");
    Ok((parser.lib, root))
}

struct PendingEntry {
    memory_offset: usize,
    buffer_offset: usize,
    pointer: TypeId,
    member: Option<usize>,
}

struct Parser<'f, 'o> {
    bytes: &'f [u8],
    lib: TypeLibrary,
    memo: HashMap<usize, TypeId>,
    options: &'o LegacyOptions,
}

impl Parser<'_, '_> {
    fn byte(&self, at: usize) -> Result<u8, FormatError> {
        self.bytes
            .get(at)
            .copied()
            .ok_or(FormatError::Truncated { offset: at, needed: 1 })
    }

    fn u16_at(&self, at: usize) -> Result<u16, FormatError> {
        let lo = self.byte(at)?;
        let hi = self
            .byte(at + 1)
            .map_err(|_| FormatError::Truncated { offset: at, needed: 2 })?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn i16_at(&self, at: usize) -> Result<i16, FormatError> {
        Ok(self.u16_at(at)? as i16)
    }

    /// Follow a relative offset stored at `at`.
    fn relative(&self, at: usize) -> Result<usize, FormatError> {
        let relative = self.i16_at(at)?;
        let target = at as isize + relative as isize;
        if target < 0 || target as usize >= self.bytes.len() {
            return Err(FormatError::BadOffset { offset: at, relative });
        }
        Ok(target as usize)
    }

    fn alignment(&self, at: usize) -> Result<usize, FormatError> {
        match self.byte(at)? {
            b @ (0 | 1 | 3 | 7) => Ok(b as usize + 1),
            b => Err(FormatError::BadAlignment(b)),
        }
    }

    fn parse_at(&mut self, at: usize) -> Result<TypeId, FormatError> {
        if let Some(id) = self.memo.get(&at) {
            return Ok(*id);
        }
        let tag = self.byte(at)?;
        let id = self.lib.reserve();
        self.memo.insert(at, id);

        let def = if let Some(kind) = ScalarKind::from_tag(tag) {
            TypeDef::Scalar(kind)
        } else if let Some(kind) = self.pointer_kind(tag) {
            self.parse_pointer(at, kind)?
        } else {
            match tag {
                FC_CARRAY => self.parse_array(at)?,
                FC_C_CSTRING => TypeDef::String(StringType {
                    width: CharWidth::Narrow,
                    capacity: None,
                }),
                FC_C_WSTRING => TypeDef::String(StringType {
                    width: CharWidth::Wide,
                    capacity: None,
                }),
                FC_CSTRING => TypeDef::String(StringType {
                    width: CharWidth::Narrow,
                    capacity: Some(self.u16_at(at + 2)?),
                }),
                FC_WSTRING => TypeDef::String(StringType {
                    width: CharWidth::Wide,
                    capacity: Some(self.u16_at(at + 2)?),
                }),
                FC_STRUCT => self.parse_struct(at, false)?,
                FC_PSTRUCT => self.parse_struct(at, true)?,
                _ => return Err(FormatError::UnknownTag { tag, offset: at }),
            }
        };
        self.lib.define(id, def);
        Ok(id)
    }

    fn pointer_kind(&self, tag: u8) -> Option<PointerKind> {
        match tag {
            FC_RP => Some(PointerKind::Ref),
            FC_UP => Some(PointerKind::Unique),
            FC_OP => Some(PointerKind::Simple),
            t if self.options.full_pointer_tag == Some(t) => Some(PointerKind::Full),
            _ => None,
        }
    }

    fn parse_pointer(&mut self, at: usize, kind: PointerKind) -> Result<TypeDef, FormatError> {
        let flags = PointerFlags(self.byte(at + 1)?);
        let target = if flags.is_simple() {
            let inline = at + 2;
            let tag = self.byte(inline)?;
            let inline_ok = ScalarKind::from_tag(tag).is_some()
                || matches!(tag, FC_C_CSTRING | FC_C_WSTRING);
            if !inline_ok {
                return Err(FormatError::UnexpectedTag {
                    tag,
                    offset: inline,
                    context: "simple pointer target must be a scalar or conformant string",
                });
            }
            self.parse_at(inline)?
        } else {
            let target = self.relative(at + 2)?;
            self.parse_at(target)?
        };
        Ok(TypeDef::Pointer(PointerType { kind, flags, target }))
    }

    fn parse_array(&mut self, at: usize) -> Result<TypeDef, FormatError> {
        let alignment = self.alignment(at + 1)?;
        let element_size = self.u16_at(at + 2)?;
        let conformance = match self.byte(at + 4)? {
            FC_CONSTANT_CONFORMANCE => {
                let high = self.byte(at + 5)? as u32;
                Conformance::Constant((high << 16) | self.u16_at(at + 6)? as u32)
            }
            kind => Conformance::Correlated(CorrelationDescriptor {
                kind,
                op: self.byte(at + 5)?,
                offset: self.i16_at(at + 6)?,
            }),
        };

        let element_at = at + 8;
        let tag = self.byte(element_at)?;
        let element = if ScalarKind::from_tag(tag).is_some() {
            self.parse_at(element_at)?
        } else if tag == FC_EMBEDDED_COMPLEX {
            let target = self.relative(element_at + 2)?;
            let nested = self.parse_at(target)?;
            match self.lib.get(nested)? {
                TypeDef::Struct(s) if s.is_flat() => nested,
                _ => {
                    return Err(FormatError::Unsupported(
                        "array elements must be scalars or flat structs".to_string(),
                    ));
                }
            }
        } else {
            return Err(FormatError::UnexpectedTag {
                tag,
                offset: element_at,
                context: "array element",
            });
        };

        let actual = self.lib.flat_memory_size(element)?;
        if actual != element_size as usize {
            return Err(FormatError::ElementSize {
                declared: element_size,
                actual,
            });
        }

        Ok(TypeDef::Array(ArrayType {
            alignment,
            element_size,
            conformance,
            element,
        }))
    }

    fn parse_pointer_layout(&mut self, mut pos: usize) -> Result<(Vec<PendingEntry>, usize), FormatError> {
        let tag = self.byte(pos)?;
        if tag != FC_PP {
            return Err(FormatError::UnexpectedTag {
                tag,
                offset: pos,
                context: "pointer struct must start with a pointer layout",
            });
        }
        pos += 2;
        let mut entries = Vec::new();
        loop {
            match self.byte(pos)? {
                FC_NO_REPEAT => {
                    let memory_offset = self.u16_at(pos + 2)? as usize;
                    let buffer_offset = self.u16_at(pos + 4)? as usize;
                    let pointer = self.parse_at(pos + 6)?;
                    if !matches!(self.lib.get(pointer)?, TypeDef::Pointer(_)) {
                        return Err(FormatError::UnexpectedTag {
                            tag: self.byte(pos + 6)?,
                            offset: pos + 6,
                            context: "pointer layout entry",
                        });
                    }
                    entries.push(PendingEntry {
                        memory_offset,
                        buffer_offset,
                        pointer,
                        member: None,
                    });
                    pos += 10;
                }
                FC_END => return Ok((entries, pos + 1)),
                tag => {
                    return Err(FormatError::UnexpectedTag {
                        tag,
                        offset: pos,
                        context: "only no-repeat pointer layout entries are supported",
                    });
                }
            }
        }
    }

    fn parse_struct(&mut self, at: usize, pointer_bearing: bool) -> Result<TypeDef, FormatError> {
        let alignment = self.alignment(at + 1)?;
        let declared = self.u16_at(at + 2)?;
        let mut pos = at + 4;

        let mut entries = Vec::new();
        if pointer_bearing {
            let (parsed, next) = self.parse_pointer_layout(pos)?;
            entries = parsed;
            pos = next;
        }

        let mut cursor = LayoutCursor::default();
        let mut members: Vec<Member> = Vec::new();
        loop {
            let tag = self.byte(pos)?;
            match tag {
                FC_END => break,
                FC_PAD => pos += 1,
                FC_STRUCTPAD1..=FC_STRUCTPAD7 => {
                    cursor.pad((tag - FC_STRUCTPAD1 + 1) as usize);
                    pos += 1;
                }
                FC_ALIGNM2 | FC_ALIGNM4 | FC_ALIGNM8 => {
                    cursor.align(1usize << (tag - FC_ALIGNM2 + 1));
                    pos += 1;
                }
                FC_POINTER => {
                    let offset = align_to(cursor.memory, super::POINTER_SIZE);
                    let entry = entries
                        .iter_mut()
                        .find(|e| e.memory_offset == offset)
                        .ok_or(FormatError::MissingPointerLayout { memory_offset: offset })?;
                    entry.member = Some(members.len());
                    let pointer = entry.pointer;
                    members.push(cursor.place(&self.lib, MemberKind::Pointer(pointer))?);
                    pos += 1;
                }
                FC_EMBEDDED_COMPLEX => {
                    let target = self.relative(pos + 2)?;
                    let nested = self.parse_at(target)?;
                    members.push(cursor.place(&self.lib, MemberKind::Struct(nested))?);
                    pos += 4;
                }
                _ => {
                    let kind = ScalarKind::from_tag(tag).ok_or(FormatError::UnexpectedTag {
                        tag,
                        offset: pos,
                        context: "struct member layout",
                    })?;
                    // A long-sized slot at a pointer layout offset is the
                    // pointer itself on 32-bit layouts.
                    let slot = align_to(cursor.memory, kind.memory_size());
                    let pointer_entry = match kind {
                        ScalarKind::Long | ScalarKind::ULong => entries
                            .iter_mut()
                            .find(|e| e.memory_offset == slot && e.member.is_none()),
                        _ => None,
                    };
                    let member_kind = match pointer_entry {
                        Some(entry) => {
                            entry.member = Some(members.len());
                            MemberKind::Pointer(entry.pointer)
                        }
                        None => MemberKind::Scalar(kind),
                    };
                    members.push(cursor.place(&self.lib, member_kind)?);
                    pos += 1;
                }
            }
        }

        if cursor.max_align > alignment {
            return Err(FormatError::Unsupported(format!(
                "struct at offset {} aligns members to {} but declares alignment {}",
                at, cursor.max_align, alignment
            )));
        }
        let computed = align_to(cursor.memory, alignment);
        if computed > declared as usize {
            return Err(FormatError::StructSize {
                offset: at,
                declared,
                computed,
            });
        }
        let trailing = declared as usize - cursor.memory;

        let mut pointers = Vec::with_capacity(entries.len());
        for entry in entries {
            let member = entry.member.ok_or(FormatError::OrphanPointerLayout {
                memory_offset: entry.memory_offset,
            })?;
            pointers.push(PointerLayout {
                memory_offset: entry.memory_offset,
                buffer_offset: entry.buffer_offset,
                pointer: entry.pointer,
                member,
            });
        }

        Ok(TypeDef::Struct(StructType {
            alignment,
            memory_size: declared as usize,
            wire_size: align_to(cursor.wire + trailing, alignment),
            members,
            pointers,
        }))
    }
}
