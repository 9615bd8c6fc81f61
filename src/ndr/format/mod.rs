//! Parsed type descriptions.
//!
//! A [`TypeLibrary`] is an arena of [`TypeDef`]s addressed by [`TypeId`].
//! Definitions refer to each other by id, so self-referential types such as
//! linked-list nodes are representable. Libraries are built either from the
//! legacy byte-code (see [`TypeLibrary::from_format_string`]) or directly in
//! Rust with [`TypeLibrary::push`].

mod describe;
mod legacy;
pub mod tags;

pub use legacy::LegacyOptions;

use std::fmt;

use super::buffer::align_to;
use super::FormatError;

/// In-memory size of a pointer slot. Layouts follow a 32-bit host, so a
/// flat struct's memory image and wire image coincide.
pub const POINTER_SIZE: usize = 4;

/// Fixed-size primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Byte,
    Char,
    Small,
    USmall,
    WChar,
    Short,
    UShort,
    Long,
    ULong,
    Float,
    Hyper,
    Double,
    Enum16,
    Enum32,
    ErrorStatus,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 15] = [
        ScalarKind::Byte,
        ScalarKind::Char,
        ScalarKind::Small,
        ScalarKind::USmall,
        ScalarKind::WChar,
        ScalarKind::Short,
        ScalarKind::UShort,
        ScalarKind::Long,
        ScalarKind::ULong,
        ScalarKind::Float,
        ScalarKind::Hyper,
        ScalarKind::Double,
        ScalarKind::Enum16,
        ScalarKind::Enum32,
        ScalarKind::ErrorStatus,
    ];

    /// Decode a scalar format tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        use tags::*;
        Some(match tag {
            FC_BYTE => Self::Byte,
            FC_CHAR => Self::Char,
            FC_SMALL => Self::Small,
            FC_USMALL => Self::USmall,
            FC_WCHAR => Self::WChar,
            FC_SHORT => Self::Short,
            FC_USHORT => Self::UShort,
            FC_LONG => Self::Long,
            FC_ULONG => Self::ULong,
            FC_FLOAT => Self::Float,
            FC_HYPER => Self::Hyper,
            FC_DOUBLE => Self::Double,
            FC_ENUM16 => Self::Enum16,
            FC_ENUM32 => Self::Enum32,
            FC_ERROR_STATUS_T => Self::ErrorStatus,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        use tags::*;
        match self {
            Self::Byte => FC_BYTE,
            Self::Char => FC_CHAR,
            Self::Small => FC_SMALL,
            Self::USmall => FC_USMALL,
            Self::WChar => FC_WCHAR,
            Self::Short => FC_SHORT,
            Self::UShort => FC_USHORT,
            Self::Long => FC_LONG,
            Self::ULong => FC_ULONG,
            Self::Float => FC_FLOAT,
            Self::Hyper => FC_HYPER,
            Self::Double => FC_DOUBLE,
            Self::Enum16 => FC_ENUM16,
            Self::Enum32 => FC_ENUM32,
            Self::ErrorStatus => FC_ERROR_STATUS_T,
        }
    }

    /// Bytes on the wire. Also the natural wire alignment.
    pub fn wire_size(self) -> usize {
        match self {
            Self::Byte | Self::Char | Self::Small | Self::USmall => 1,
            Self::WChar | Self::Short | Self::UShort | Self::Enum16 => 2,
            Self::Long | Self::ULong | Self::Float | Self::Enum32 | Self::ErrorStatus => 4,
            Self::Hyper | Self::Double => 8,
        }
    }

    /// Bytes in host memory. Enum16 is held in a 32-bit host integer.
    pub fn memory_size(self) -> usize {
        match self {
            Self::Enum16 => 4,
            other => other.wire_size(),
        }
    }

    /// True when the host representation is wider than the wire form, so a
    /// decoded value cannot alias the wire bytes.
    pub fn needs_widening(self) -> bool {
        self.memory_size() != self.wire_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Small => "small",
            Self::USmall => "usmall",
            Self::WChar => "wchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Long => "long",
            Self::ULong => "ulong",
            Self::Float => "float",
            Self::Hyper => "hyper",
            Self::Double => "double",
            Self::Enum16 => "enum16",
            Self::Enum32 => "enum32",
            Self::ErrorStatus => "error_status_t",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pointer kinds and their wire treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// Never null, no id, referent inline.
    Ref,
    /// Nullable, id-tagged, referent inline and never deduplicated.
    Unique,
    /// Embedded/simple pointer: unique semantics, id kept in the enclosing
    /// struct's slot when embedded.
    Simple,
    /// Nullable, id-tagged, referent deduplicated through the full-pointer table.
    Full,
}

impl PointerKind {
    pub fn is_nullable(self) -> bool {
        !matches!(self, Self::Ref)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ref => "ref",
            Self::Unique => "unique",
            Self::Simple => "simple",
            Self::Full => "full",
        }
    }
}

/// Pointer attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PointerFlags(pub u8);

impl PointerFlags {
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Referent is described inline right after the flags byte.
    pub fn is_simple(self) -> bool {
        self.contains(tags::FC_SIMPLE_POINTER)
    }

    /// The free pass must leave the referent alone.
    pub fn dont_free(self) -> bool {
        self.contains(tags::FC_DONT_FREE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerType {
    pub kind: PointerKind,
    pub flags: PointerFlags,
    pub target: TypeId,
}

/// Raw correlation descriptor naming where a conformant count lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationDescriptor {
    pub kind: u8,
    pub op: u8,
    pub offset: i16,
}

/// Source of a conformant array's element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conformance {
    /// The count is fixed by the type; the value's length must match.
    Constant(u32),
    /// The count is correlated with another field; on the wire it is carried
    /// by the array itself, so the value's own length is used.
    Correlated(CorrelationDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayType {
    pub alignment: usize,
    pub element_size: u16,
    pub conformance: Conformance,
    pub element: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharWidth {
    Narrow,
    Wide,
}

impl CharWidth {
    pub fn size(self) -> usize {
        match self {
            Self::Narrow => 1,
            Self::Wide => 2,
        }
    }
}

/// Conformant (`capacity: None`) or fixed-capacity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringType {
    pub width: CharWidth,
    pub capacity: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Scalar(ScalarKind),
    /// Pointer slot; the id refers to a [`TypeDef::Pointer`].
    Pointer(TypeId),
    /// Embedded flat struct.
    Struct(TypeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub memory_offset: usize,
    pub wire_offset: usize,
    pub kind: MemberKind,
}

/// One entry of a struct's pointer layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerLayout {
    pub memory_offset: usize,
    pub buffer_offset: usize,
    pub pointer: TypeId,
    /// Index of the pointer's member (and of its field in the struct value).
    pub member: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub alignment: usize,
    pub memory_size: usize,
    pub wire_size: usize,
    pub members: Vec<Member>,
    /// Pointer layout in marshalling order. Empty for a simple struct.
    pub pointers: Vec<PointerLayout>,
}

impl StructType {
    /// Lay out a struct from its member kinds using natural alignment.
    ///
    /// Pointers are marshalled out of line in member order.
    pub fn layout(lib: &TypeLibrary, kinds: &[MemberKind]) -> Result<Self, FormatError> {
        let mut cursor = LayoutCursor::default();
        let mut members = Vec::with_capacity(kinds.len());
        for kind in kinds {
            members.push(cursor.place(lib, *kind)?);
        }
        let pointers = members
            .iter()
            .enumerate()
            .filter_map(|(index, m)| match m.kind {
                MemberKind::Pointer(pointer) => Some(PointerLayout {
                    memory_offset: m.memory_offset,
                    buffer_offset: m.wire_offset,
                    pointer,
                    member: index,
                }),
                _ => None,
            })
            .collect();
        let alignment = cursor.max_align;
        Ok(Self {
            alignment,
            memory_size: align_to(cursor.memory, alignment),
            wire_size: align_to(cursor.wire, alignment),
            members,
            pointers,
        })
    }

    /// True for a struct without embedded pointers.
    pub fn is_flat(&self) -> bool {
        self.pointers.is_empty()
    }
}

/// Running member offsets while a struct is laid out.
#[derive(Debug, Clone)]
pub(crate) struct LayoutCursor {
    pub memory: usize,
    pub wire: usize,
    pub max_align: usize,
}

impl Default for LayoutCursor {
    fn default() -> Self {
        Self {
            memory: 0,
            wire: 0,
            max_align: 1,
        }
    }
}

impl LayoutCursor {
    pub fn place(&mut self, lib: &TypeLibrary, kind: MemberKind) -> Result<Member, FormatError> {
        let (memory_size, memory_align, wire_size, wire_align) = match kind {
            MemberKind::Scalar(k) => (k.memory_size(), k.memory_size(), k.wire_size(), k.wire_size()),
            MemberKind::Pointer(_) => (POINTER_SIZE, POINTER_SIZE, POINTER_SIZE, POINTER_SIZE),
            MemberKind::Struct(id) => match lib.get(id)? {
                TypeDef::Struct(s) if s.is_flat() => {
                    (s.memory_size, s.alignment, s.wire_size, s.alignment)
                }
                TypeDef::Struct(_) => {
                    return Err(FormatError::Unsupported(
                        "pointer-bearing struct embedded by value".to_string(),
                    ));
                }
                _ => {
                    return Err(FormatError::Unsupported(format!(
                        "embedded member {} is not a struct",
                        id
                    )));
                }
            },
        };
        self.memory = align_to(self.memory, memory_align);
        self.wire = align_to(self.wire, wire_align);
        let member = Member {
            memory_offset: self.memory,
            wire_offset: self.wire,
            kind,
        };
        self.memory += memory_size;
        self.wire += wire_size;
        self.max_align = self.max_align.max(memory_align).max(wire_align);
        Ok(member)
    }

    pub fn pad(&mut self, len: usize) {
        self.memory += len;
        self.wire += len;
    }

    pub fn align(&mut self, align: usize) {
        self.memory = align_to(self.memory, align);
        self.wire = align_to(self.wire, align);
        self.max_align = self.max_align.max(align);
    }
}

/// A parsed type description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDef {
    Scalar(ScalarKind),
    Pointer(PointerType),
    Array(ArrayType),
    String(StringType),
    Struct(StructType),
}

impl TypeDef {
    /// Short kind name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(k) => k.name(),
            Self::Pointer(_) => "pointer",
            Self::Array(_) => "conformant array",
            Self::String(StringType { capacity: None, .. }) => "conformant string",
            Self::String(_) => "fixed string",
            Self::Struct(s) if s.is_flat() => "struct",
            Self::Struct(_) => "pointer struct",
        }
    }
}

/// Index of a [`TypeDef`] inside a [`TypeLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of type definitions shared, read-only, by every call.
///
/// # Example
///
/// ```
/// use ndr_marshal::{PointerFlags, PointerKind, PointerType, ScalarKind, TypeDef, TypeLibrary};
///
/// let mut lib = TypeLibrary::new();
/// let long = lib.push(TypeDef::Scalar(ScalarKind::Long));
/// let ptr = lib.push(TypeDef::Pointer(PointerType {
///     kind: PointerKind::Unique,
///     flags: PointerFlags::default(),
///     target: long,
/// }));
/// assert_eq!(lib.len(), 2);
/// assert!(matches!(lib.get(ptr), Ok(TypeDef::Pointer(_))));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeLibrary {
    types: Vec<Option<TypeDef>>,
}

impl TypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition and return its id.
    pub fn push(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(Some(def));
        id
    }

    /// Reserve an id whose definition is filled in later (cycles).
    pub(crate) fn reserve(&mut self) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(None);
        id
    }

    pub(crate) fn define(&mut self, id: TypeId, def: TypeDef) {
        if let Some(slot) = self.types.get_mut(id.index()) {
            *slot = Some(def);
        }
    }

    /// Look up a definition.
    pub fn get(&self, id: TypeId) -> Result<&TypeDef, FormatError> {
        self.types
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FormatError::UnknownType(id.0))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Parse legacy byte-code starting at `root_offset`.
    ///
    /// Returns the library holding every type reachable from the root, and
    /// the root's id.
    ///
    /// # Example
    ///
    /// ```
    /// use ndr_marshal::{LegacyOptions, TypeDef, TypeLibrary};
    ///
    /// // unique pointer, simple, to a long
    /// let format = [0x12, 0x08, 0x08, 0x5c];
    /// let (lib, root) = TypeLibrary::from_format_string(&format, 0, &LegacyOptions::default())?;
    /// assert!(matches!(lib.get(root)?, TypeDef::Pointer(_)));
    /// # Ok::<(), ndr_marshal::FormatError>(())
    /// ```
    pub fn from_format_string(
        bytes: &[u8],
        root_offset: usize,
        options: &LegacyOptions,
    ) -> Result<(Self, TypeId), FormatError> {
        legacy::parse(bytes, root_offset, options)
    }

    /// Flat memory size of a type: the declared size for structs, the slot
    /// size for pointers and zero for variable-length types.
    pub fn flat_memory_size(&self, id: TypeId) -> Result<usize, FormatError> {
        Ok(match self.get(id)? {
            TypeDef::Scalar(k) => k.memory_size(),
            TypeDef::Pointer(_) => POINTER_SIZE,
            TypeDef::Struct(s) => s.memory_size,
            TypeDef::Array(_) | TypeDef::String(_) => 0,
        })
    }
}
