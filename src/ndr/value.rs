//! In-memory values, the heap arena that holds pointer referents, and wire
//! views for server-side zero-copy destinations.

use std::borrow::Cow;

use super::format::{CharWidth, ScalarKind};
use super::scalar::{scalar_from_le, wide_units};
use super::MarshalError;

/// Address of a referent inside a [`Heap`].
///
/// Pointer identity is the address: two pointers alias exactly when they
/// carry the same `Addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct Addr(u32);

impl Addr {
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A typed in-memory value.
///
/// Pointer referents live in a [`Heap`]; a pointer value carries only the
/// referent's address.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Value {
    Byte(u8),
    Char(u8),
    Small(i8),
    USmall(u8),
    WChar(u16),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    Float(f32),
    Hyper(i64),
    Double(f64),
    /// 16-bit enum held in a 32-bit host integer.
    Enum16(i32),
    Enum32(i32),
    ErrorStatus(u32),
    Pointer(Option<Addr>),
    Array(Vec<Value>),
    /// Narrow characters, including whatever terminator the caller supplied.
    String(Vec<u8>),
    /// Wide characters, including whatever terminator the caller supplied.
    WString(Vec<u16>),
    /// Field values in declaration order, one per struct member.
    Struct(Vec<Value>),
}

impl Value {
    /// A narrow string with a trailing NUL terminator.
    pub fn c_string(s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Self::String(bytes)
    }

    /// A wide (UTF-16) string with a trailing NUL terminator.
    pub fn wide_string(s: &str) -> Self {
        let mut units: Vec<u16> = s.encode_utf16().collect();
        units.push(0);
        Self::WString(units)
    }

    /// The address carried by a pointer value.
    pub fn as_pointer(&self) -> Option<Option<Addr>> {
        match self {
            Self::Pointer(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// A flat referent left in place in the wire buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireView<'w> {
    Scalar(ScalarKind, &'w [u8]),
    Array(ScalarKind, &'w [u8]),
    String(CharWidth, &'w [u8]),
}

impl WireView<'_> {
    /// Bytes of the wire buffer this view borrows.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Scalar(_, b) | Self::Array(_, b) | Self::String(_, b) => b,
        }
    }

    /// Decode the viewed bytes into an owned value.
    pub fn to_value(&self) -> Result<Value, MarshalError> {
        match self {
            Self::Scalar(kind, bytes) => scalar_from_le(*kind, bytes),
            Self::Array(kind, bytes) => bytes
                .chunks_exact(kind.wire_size())
                .map(|chunk| scalar_from_le(*kind, chunk))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::String(CharWidth::Narrow, bytes) => Ok(Value::String(bytes.to_vec())),
            Self::String(CharWidth::Wide, bytes) => Ok(Value::WString(wide_units(bytes))),
        }
    }
}

/// One heap cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<'w> {
    Owned(Value),
    /// Server-side destination aliasing the wire buffer.
    Wire(WireView<'w>),
    /// Registered destination whose referent is still being decoded.
    Reserved,
    Freed,
}

/// Arena holding pointer referents.
///
/// The `'w` lifetime is the lifetime of any wire buffer that server-side
/// unmarshalling pointed into; a heap built only from owned values can use
/// any lifetime.
///
/// # Example
///
/// ```
/// use ndr_marshal::{Heap, Value};
///
/// let mut heap = Heap::new();
/// let addr = heap.alloc(Value::Long(7));
/// let root = Value::Pointer(Some(addr));
/// assert_eq!(heap.get(addr), Some(&Value::Long(7)));
/// # let _ = root;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap<'w> {
    slots: Vec<Slot<'w>>,
}

impl<'w> Heap<'w> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Build a heap whose `Addr(i)` holds `values[i]`.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            slots: values.into_iter().map(Slot::Owned).collect(),
        }
    }

    /// Inverse of [`Heap::snapshot`]: `None` entries become freed slots.
    pub fn from_snapshot(slots: Vec<Option<Value>>) -> Self {
        Self {
            slots: slots
                .into_iter()
                .map(|slot| slot.map_or(Slot::Freed, Slot::Owned))
                .collect(),
        }
    }

    /// Store a value and return its address.
    pub fn alloc(&mut self, value: Value) -> Addr {
        self.push(Slot::Owned(value))
    }

    pub(crate) fn push(&mut self, slot: Slot<'w>) -> Addr {
        let addr = Addr(self.slots.len() as u32);
        self.slots.push(slot);
        addr
    }

    pub(crate) fn reserve(&mut self) -> Addr {
        self.push(Slot::Reserved)
    }

    pub(crate) fn fill(&mut self, addr: Addr, slot: Slot<'w>) {
        if let Some(cell) = self.slots.get_mut(addr.0 as usize) {
            *cell = slot;
        }
    }

    /// Overwrite the value at `addr`. Returns false if `addr` is out of range.
    pub fn set(&mut self, addr: Addr, value: Value) -> bool {
        match self.slots.get_mut(addr.0 as usize) {
            Some(cell) => {
                *cell = Slot::Owned(value);
                true
            }
            None => false,
        }
    }

    pub fn slot(&self, addr: Addr) -> Option<&Slot<'w>> {
        self.slots.get(addr.0 as usize)
    }

    /// The owned value at `addr`, if any.
    pub fn get(&self, addr: Addr) -> Option<&Value> {
        match self.slot(addr) {
            Some(Slot::Owned(value)) => Some(value),
            _ => None,
        }
    }

    /// True when `addr` holds an owned value or a wire view.
    pub fn is_live(&self, addr: Addr) -> bool {
        matches!(self.slot(addr), Some(Slot::Owned(_) | Slot::Wire(_)))
    }

    /// True when `addr` points into the wire buffer.
    pub fn is_wire_view(&self, addr: Addr) -> bool {
        matches!(self.slot(addr), Some(Slot::Wire(_)))
    }

    /// The value at `addr`, decoding wire views on demand.
    pub fn load(&self, addr: Addr) -> Result<Cow<'_, Value>, MarshalError> {
        match self.slot(addr) {
            Some(Slot::Owned(value)) => Ok(Cow::Borrowed(value)),
            Some(Slot::Wire(view)) => view.to_value().map(Cow::Owned),
            _ => Err(MarshalError::DanglingPointer(addr.0)),
        }
    }

    /// Remove the slot's contents, leaving it freed.
    pub(crate) fn take(&mut self, addr: Addr) -> Option<Slot<'w>> {
        self.slots
            .get_mut(addr.0 as usize)
            .map(|cell| std::mem::replace(cell, Slot::Freed))
    }

    /// Drop every slot at or above `mark`.
    pub(crate) fn truncate(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    /// Number of slots, live or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots holding a value or a wire view.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Owned(_) | Slot::Wire(_)))
            .count()
    }

    /// Owned copies of every slot, `None` for freed or reserved slots.
    pub fn snapshot(&self) -> Result<Vec<Option<Value>>, MarshalError> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Owned(value) => Ok(Some(value.clone())),
                Slot::Wire(view) => view.to_value().map(Some),
                Slot::Reserved | Slot::Freed => Ok(None),
            })
            .collect()
    }

    /// Detach from the wire buffer by decoding every wire view.
    pub fn into_owned(self) -> Result<Heap<'static>, MarshalError> {
        let slots = self
            .slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Owned(value) => Ok(Slot::Owned(value)),
                Slot::Wire(view) => view.to_value().map(Slot::Owned),
                Slot::Reserved => Ok(Slot::Reserved),
                Slot::Freed => Ok(Slot::Freed),
            })
            .collect::<Result<Vec<_>, MarshalError>>()?;
        Ok(Heap { slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_view_decodes_on_load() {
        let wire = [0xBE, 0xBA, 0xFE, 0xCA];
        let mut heap = Heap::new();
        let addr = heap.push(Slot::Wire(WireView::Scalar(ScalarKind::ULong, &wire)));
        assert!(heap.is_wire_view(addr));
        assert_eq!(heap.load(addr).unwrap().into_owned(), Value::ULong(0xCAFE_BABE));
        assert_eq!(heap.get(addr), None);
    }

    #[test]
    fn test_take_leaves_freed_slot() {
        let mut heap = Heap::new();
        let addr = heap.alloc(Value::Short(3));
        assert!(matches!(heap.take(addr), Some(Slot::Owned(Value::Short(3)))));
        assert!(!heap.is_live(addr));
        assert_eq!(
            heap.load(addr).unwrap_err(),
            MarshalError::DanglingPointer(addr.index())
        );
    }

    #[test]
    fn test_into_owned_detaches_views() {
        let wire = *b"hi\0";
        let mut heap = Heap::new();
        heap.push(Slot::Wire(WireView::String(CharWidth::Narrow, &wire)));
        let owned: Heap<'static> = heap.into_owned().unwrap();
        assert_eq!(owned.get(Addr(0)), Some(&Value::String(b"hi\0".to_vec())));
    }
}
