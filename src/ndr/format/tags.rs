//! Legacy format-string byte codes.

pub const FC_BYTE: u8 = 0x01;
pub const FC_CHAR: u8 = 0x02;
pub const FC_SMALL: u8 = 0x03;
pub const FC_USMALL: u8 = 0x04;
pub const FC_WCHAR: u8 = 0x05;
pub const FC_SHORT: u8 = 0x06;
pub const FC_USHORT: u8 = 0x07;
pub const FC_LONG: u8 = 0x08;
pub const FC_ULONG: u8 = 0x09;
pub const FC_FLOAT: u8 = 0x0A;
pub const FC_HYPER: u8 = 0x0B;
pub const FC_DOUBLE: u8 = 0x0C;
pub const FC_ENUM16: u8 = 0x0D;
pub const FC_ENUM32: u8 = 0x0E;
pub const FC_ERROR_STATUS_T: u8 = 0x10;

pub const FC_RP: u8 = 0x11;
pub const FC_UP: u8 = 0x12;
pub const FC_OP: u8 = 0x13;

pub const FC_STRUCT: u8 = 0x15;
pub const FC_PSTRUCT: u8 = 0x16;
pub const FC_CARRAY: u8 = 0x1B;

pub const FC_C_CSTRING: u8 = 0x22;
pub const FC_C_WSTRING: u8 = 0x25;
pub const FC_CSTRING: u8 = 0x26;
pub const FC_WSTRING: u8 = 0x29;

pub const FC_POINTER: u8 = 0x36;
pub const FC_ALIGNM2: u8 = 0x37;
pub const FC_ALIGNM4: u8 = 0x38;
pub const FC_ALIGNM8: u8 = 0x39;
pub const FC_STRUCTPAD1: u8 = 0x3D;
pub const FC_STRUCTPAD7: u8 = 0x43;

pub const FC_CONSTANT_CONFORMANCE: u8 = 0x40;
pub const FC_NO_REPEAT: u8 = 0x46;
pub const FC_PP: u8 = 0x4B;
pub const FC_EMBEDDED_COMPLEX: u8 = 0x4C;
pub const FC_END: u8 = 0x5B;
pub const FC_PAD: u8 = 0x5C;

/// Pointer attribute flags (second byte of a pointer description).
pub const FC_ALLOCATE_ALL_NODES: u8 = 0x01;
pub const FC_DONT_FREE: u8 = 0x02;
pub const FC_ALLOCED_ON_STACK: u8 = 0x04;
pub const FC_SIMPLE_POINTER: u8 = 0x08;
pub const FC_POINTER_DEREF: u8 = 0x10;
