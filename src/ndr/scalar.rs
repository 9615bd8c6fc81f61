//! Scalar marshalling: natural alignment, little-endian bytes.

use super::format::ScalarKind;
use super::interp::{Decoder, Encoder};
use super::value::{Value, WireView};
use super::MarshalError;

/// Largest wire value an enum16 may carry.
pub const ENUM16_MAX: i32 = 0x7FFF;

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], MarshalError> {
    bytes.try_into().map_err(|_| MarshalError::BufferExhausted {
        needed: N,
        available: bytes.len(),
    })
}

/// Decode one scalar from exactly `kind.wire_size()` little-endian bytes.
pub(crate) fn scalar_from_le(kind: ScalarKind, bytes: &[u8]) -> Result<Value, MarshalError> {
    Ok(match kind {
        ScalarKind::Byte => Value::Byte(u8::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Char => Value::Char(u8::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Small => Value::Small(i8::from_le_bytes(fixed(bytes)?)),
        ScalarKind::USmall => Value::USmall(u8::from_le_bytes(fixed(bytes)?)),
        ScalarKind::WChar => Value::WChar(u16::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Short => Value::Short(i16::from_le_bytes(fixed(bytes)?)),
        ScalarKind::UShort => Value::UShort(u16::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Long => Value::Long(i32::from_le_bytes(fixed(bytes)?)),
        ScalarKind::ULong => Value::ULong(u32::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Float => Value::Float(f32::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Hyper => Value::Hyper(i64::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Double => Value::Double(f64::from_le_bytes(fixed(bytes)?)),
        ScalarKind::Enum16 => Value::Enum16(u16::from_le_bytes(fixed(bytes)?) as i32),
        ScalarKind::Enum32 => Value::Enum32(i32::from_le_bytes(fixed(bytes)?)),
        ScalarKind::ErrorStatus => Value::ErrorStatus(u32::from_le_bytes(fixed(bytes)?)),
    })
}

/// Little-endian UTF-16 code units. A trailing odd byte is ignored.
pub(crate) fn wide_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .filter_map(|pair| <[u8; 2]>::try_from(pair).ok())
        .map(u16::from_le_bytes)
        .collect()
}

/// Wire bytes of a scalar value, checked against its kind.
///
/// Returns a buffer and the number of bytes used from its front.
pub(crate) fn scalar_to_le(kind: ScalarKind, value: &Value) -> Result<([u8; 8], usize), MarshalError> {
    fn pack<const N: usize>(bytes: [u8; N]) -> ([u8; 8], usize) {
        let mut out = [0u8; 8];
        for (dst, src) in out.iter_mut().zip(bytes) {
            *dst = src;
        }
        (out, N)
    }

    Ok(match (kind, value) {
        (ScalarKind::Byte, Value::Byte(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Char, Value::Char(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Small, Value::Small(v)) => pack(v.to_le_bytes()),
        (ScalarKind::USmall, Value::USmall(v)) => pack(v.to_le_bytes()),
        (ScalarKind::WChar, Value::WChar(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Short, Value::Short(v)) => pack(v.to_le_bytes()),
        (ScalarKind::UShort, Value::UShort(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Long, Value::Long(v)) => pack(v.to_le_bytes()),
        (ScalarKind::ULong, Value::ULong(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Float, Value::Float(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Hyper, Value::Hyper(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Double, Value::Double(v)) => pack(v.to_le_bytes()),
        (ScalarKind::Enum16, Value::Enum16(v)) => {
            if !(0..=ENUM16_MAX).contains(v) {
                return Err(MarshalError::EnumOutOfRange(*v));
            }
            pack((*v as u16).to_le_bytes())
        }
        (ScalarKind::Enum32, Value::Enum32(v)) => pack(v.to_le_bytes()),
        (ScalarKind::ErrorStatus, Value::ErrorStatus(v)) => pack(v.to_le_bytes()),
        (kind, other) => return Err(MarshalError::mismatch(kind.name(), other)),
    })
}

impl Encoder<'_, '_> {
    pub(crate) fn encode_scalar(&mut self, kind: ScalarKind, value: &Value) -> Result<(), MarshalError> {
        let (bytes, len) = scalar_to_le(kind, value)?;
        self.buf.align(kind.wire_size())?;
        self.buf.write_bytes(bytes.get(..len).unwrap_or_default())
    }
}

impl<'w> Decoder<'_, 'w> {
    pub(crate) fn decode_scalar(&mut self, kind: ScalarKind) -> Result<Value, MarshalError> {
        self.view_scalar(kind)?.to_value()
    }

    /// Borrow a scalar's bytes in place.
    pub(crate) fn view_scalar(&mut self, kind: ScalarKind) -> Result<WireView<'w>, MarshalError> {
        self.reader.align(kind.wire_size())?;
        let bytes = self.reader.read_bytes(kind.wire_size())?;
        Ok(WireView::Scalar(kind, bytes))
    }
}
