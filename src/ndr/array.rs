//! Conformant arrays and strings.
//!
//! Conformant array: max count, then the elements back to back.
//! Conformant string: max count, offset, actual count, then the characters.
//! Fixed string: offset, actual count, then the characters; the capacity is
//! part of the type and never travels.

use super::format::{ArrayType, CharWidth, Conformance, StringType, TypeDef};
use super::interp::{element_wire_size, Decoder, Encoder};
use super::value::{Value, WireView};
use super::MarshalError;

/// Fail before allocating when a wire count cannot possibly fit.
fn check_room(count: u32, element: usize, remaining: usize) -> Result<usize, MarshalError> {
    let needed = (count as usize).saturating_mul(element);
    if needed > remaining {
        return Err(MarshalError::BufferExhausted {
            needed,
            available: remaining,
        });
    }
    Ok(needed)
}

fn check_conformance(conformance: &Conformance, actual: usize) -> Result<(), MarshalError> {
    match conformance {
        Conformance::Constant(expected) if *expected as usize != actual => {
            Err(MarshalError::ConformanceMismatch {
                expected: *expected,
                actual,
            })
        }
        _ => Ok(()),
    }
}

fn string_len(string: &StringType, value: &Value) -> Result<usize, MarshalError> {
    match (string.width, value) {
        (CharWidth::Narrow, Value::String(chars)) => Ok(chars.len()),
        (CharWidth::Wide, Value::WString(units)) => Ok(units.len()),
        (CharWidth::Narrow, other) => Err(MarshalError::mismatch("string", other)),
        (CharWidth::Wide, other) => Err(MarshalError::mismatch("wide string", other)),
    }
}

impl Encoder<'_, '_> {
    pub(crate) fn encode_array(&mut self, array: &ArrayType, value: &Value) -> Result<(), MarshalError> {
        let Value::Array(items) = value else {
            return Err(MarshalError::mismatch("array", value));
        };
        check_conformance(&array.conformance, items.len())?;
        element_wire_size(self.lib, array.element)?;
        self.buf.write_u32(items.len() as u32)?;
        self.buf.align(array.alignment)?;
        for item in items {
            self.encode(array.element, item)?;
        }
        Ok(())
    }

    pub(crate) fn encode_string(&mut self, string: &StringType, value: &Value) -> Result<(), MarshalError> {
        let len = string_len(string, value)?;
        match string.capacity {
            None => self.buf.write_u32(len as u32)?,
            Some(capacity) if len > capacity as usize => {
                return Err(MarshalError::StringTooLong {
                    len,
                    capacity: capacity as usize,
                });
            }
            Some(_) => {}
        }
        self.buf.write_u32(0)?;
        self.buf.write_u32(len as u32)?;
        match value {
            Value::String(chars) => self.buf.write_bytes(chars),
            Value::WString(units) => {
                for unit in units {
                    self.buf.write_bytes(&unit.to_le_bytes())?;
                }
                Ok(())
            }
            other => Err(MarshalError::mismatch("string", other)),
        }
    }
}

impl<'w> Decoder<'_, 'w> {
    /// Read an array's count, validated against the type and the bytes left.
    fn array_header(&mut self, array: &ArrayType) -> Result<u32, MarshalError> {
        let count = self.reader.read_u32()?;
        check_conformance(&array.conformance, count as usize)?;
        self.reader.align(array.alignment)?;
        check_room(
            count,
            element_wire_size(self.lib, array.element)?,
            self.reader.remaining(),
        )?;
        Ok(count)
    }

    pub(crate) fn decode_array(&mut self, array: &ArrayType) -> Result<Value, MarshalError> {
        let count = self.array_header(array)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(self.decode(array.element, None)?);
        }
        Ok(Value::Array(items))
    }

    pub(crate) fn view_array(&mut self, array: &ArrayType) -> Result<WireView<'w>, MarshalError> {
        let lib = self.lib;
        let kind = match lib.get(array.element)? {
            TypeDef::Scalar(kind) => *kind,
            other => return Err(MarshalError::mismatch("scalar array", &other.kind_name())),
        };
        let count = self.array_header(array)?;
        let bytes = self.reader.read_bytes(count as usize * kind.wire_size())?;
        Ok(WireView::Array(kind, bytes))
    }

    /// Read a string header and borrow its characters.
    pub(crate) fn view_string(&mut self, string: &StringType) -> Result<WireView<'w>, MarshalError> {
        let max = match string.capacity {
            None => Some(self.reader.read_u32()?),
            Some(_) => None,
        };
        let offset = self.reader.read_u32()?;
        let actual = self.reader.read_u32()?;
        match (max, string.capacity) {
            (Some(max), _) if offset as u64 + actual as u64 > max as u64 => {
                return Err(MarshalError::InvalidConformance { max, offset, actual });
            }
            (_, Some(capacity)) if offset as u64 + actual as u64 > capacity as u64 => {
                return Err(MarshalError::StringTooLong {
                    len: actual as usize,
                    capacity: capacity as usize,
                });
            }
            _ => {}
        }
        let len = check_room(actual, string.width.size(), self.reader.remaining())?;
        let bytes = self.reader.read_bytes(len)?;
        Ok(WireView::String(string.width, bytes))
    }

    pub(crate) fn decode_string(&mut self, string: &StringType) -> Result<Value, MarshalError> {
        self.view_string(string)?.to_value()
    }
}
