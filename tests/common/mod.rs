//! Common test utilities and fixtures.
//!
//! Format strings in legacy byte-code and type libraries built directly
//! through the Rust API, shared across the integration tests.

#![allow(dead_code)]

use ndr_marshal::ndr::format::{MemberKind, StructType};
use ndr_marshal::{
    LegacyOptions, PointerFlags, PointerKind, PointerType, ScalarKind, TypeDef, TypeId,
    TypeLibrary,
};

/// Tag the tests configure for full pointers in legacy byte-code.
pub const FULL_POINTER_TAG: u8 = 0x14;

// =============================================================================
// Legacy Format Strings
// =============================================================================

/// Unique pointer, simple, to a long.
pub const UNIQUE_LONG: [u8; 4] = [0x12, 0x08, 0x08, 0x5c];

/// Full pointer, simple, to a long. Needs [`FULL_POINTER_TAG`].
pub const FULL_LONG: [u8; 4] = [FULL_POINTER_TAG, 0x08, 0x08, 0x5c];

/// Unique pointer, simple, to a 16-bit enum.
pub const UNIQUE_ENUM16: [u8; 4] = [0x12, 0x08, 0x0d, 0x5c];

/// Reference pointer to a conformant narrow string.
pub const REF_STRING: [u8; 4] = [0x11, 0x08, 0x22, 0x5c];

/// Fixed narrow string holding at most 10 characters.
pub const FIXED_STRING_10: [u8; 4] = [0x26, 0x5c, 0x0a, 0x00];

/// `struct node { long value; struct node *next; }` with a unique `next`.
pub const LINKED_NODE: [u8; 20] = [
    0x16, 0x03, 0x08, 0x00, //
    0x4b, 0x5c, //
    0x46, 0x5c, 0x04, 0x00, 0x04, 0x00, 0x12, 0x00, 0xf2, 0xff, //
    0x5b, //
    0x08, 0x36, 0x5b,
];

/// [`LINKED_NODE`] with a full `next`. Needs [`FULL_POINTER_TAG`].
pub const FULL_LINKED_NODE: [u8; 20] = [
    0x16, 0x03, 0x08, 0x00, //
    0x4b, 0x5c, //
    0x46, 0x5c, 0x04, 0x00, 0x04, 0x00, FULL_POINTER_TAG, 0x00, 0xf2, 0xff, //
    0x5b, //
    0x08, 0x36, 0x5b,
];

/// `struct node { long value; struct node *child; struct node *link; }`
/// with a unique `child` and a full `link`. Needs [`FULL_POINTER_TAG`].
pub const MIXED_NODE: [u8; 31] = [
    0x16, 0x03, 0x0c, 0x00, //
    0x4b, 0x5c, //
    0x46, 0x5c, 0x04, 0x00, 0x04, 0x00, 0x12, 0x00, 0xf2, 0xff, //
    0x46, 0x5c, 0x08, 0x00, 0x08, 0x00, FULL_POINTER_TAG, 0x00, 0xe8, 0xff, //
    0x5b, //
    0x08, 0x36, 0x36, 0x5b,
];

pub fn parse(format: &[u8]) -> Result<(TypeLibrary, TypeId), anyhow::Error> {
    Ok(TypeLibrary::from_format_string(
        format,
        0,
        &LegacyOptions::default(),
    )?)
}

pub fn parse_with_full(format: &[u8]) -> Result<(TypeLibrary, TypeId), anyhow::Error> {
    let options = LegacyOptions {
        full_pointer_tag: Some(FULL_POINTER_TAG),
    };
    Ok(TypeLibrary::from_format_string(format, 0, &options)?)
}

// =============================================================================
// Types Built Through the API
// =============================================================================

/// Handles to the types of a library holding one pointer kind to a long.
pub struct PointerPair {
    pub lib: TypeLibrary,
    pub long: TypeId,
    pub pointer: TypeId,
    /// `struct { T *a; T *b; }` with both members of the pointer type.
    pub pair: TypeId,
}

/// Build a pointer to a long and a struct holding two such pointers.
pub fn pointer_pair(kind: PointerKind, flags: u8) -> Result<PointerPair, anyhow::Error> {
    let mut lib = TypeLibrary::new();
    let long = lib.push(TypeDef::Scalar(ScalarKind::Long));
    let pointer = lib.push(TypeDef::Pointer(PointerType {
        kind,
        flags: PointerFlags(flags),
        target: long,
    }));
    let layout = StructType::layout(
        &lib,
        &[MemberKind::Pointer(pointer), MemberKind::Pointer(pointer)],
    )?;
    let pair = lib.push(TypeDef::Struct(layout));
    Ok(PointerPair {
        lib,
        long,
        pointer,
        pair,
    })
}

/// `struct { long value; long *ref_ptr; }` with an embedded reference pointer.
pub fn struct_with_ref() -> Result<(TypeLibrary, TypeId), anyhow::Error> {
    let mut lib = TypeLibrary::new();
    let long = lib.push(TypeDef::Scalar(ScalarKind::Long));
    let ref_ptr = lib.push(TypeDef::Pointer(PointerType {
        kind: PointerKind::Ref,
        flags: PointerFlags::default(),
        target: long,
    }));
    let layout = StructType::layout(
        &lib,
        &[MemberKind::Scalar(ScalarKind::Long), MemberKind::Pointer(ref_ptr)],
    )?;
    let id = lib.push(TypeDef::Struct(layout));
    Ok((lib, id))
}
