//! Full-pointer reference-id table.
//!
//! Encoding maps heap addresses to reference ids; decoding maps ids back to
//! reconstructed addresses. Both sides share the same entries so a table can
//! be driven from either direction. Ids start at 1; 0 is the null id.

use std::collections::HashMap;

use super::value::Addr;
use super::MarshalError;

/// Wire id of a null full pointer.
pub const NULL_REF_ID: u32 = 0;

/// Result of [`FullPointerTable::query_pointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerQuery {
    pub ref_id: u32,
    /// The entry was already marked, so the referent is already on the wire.
    pub found: bool,
}

/// Result of [`FullPointerTable::query_ref_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefIdQuery {
    /// Destination registered for the id, if any.
    pub addr: Option<Addr>,
    /// The entry was already marked, so its referent has been decoded.
    pub found: bool,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    addr: Option<Addr>,
    marked: bool,
}

/// Per-call table of full pointers.
///
/// # Example
///
/// ```
/// use ndr_marshal::{Addr, FullPointerTable};
///
/// let mut table = FullPointerTable::new();
/// let p = Addr::from_index(3);
/// let first = table.query_pointer(Some(p), true);
/// let again = table.query_pointer(Some(p), false);
/// assert_eq!((first.ref_id, first.found), (1, false));
/// assert_eq!((again.ref_id, again.found), (1, true));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FullPointerTable {
    entries: HashMap<u32, Entry>,
    by_addr: HashMap<Addr, u32>,
    next_ref_id: u32,
    highest_seen: u32,
}

impl FullPointerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Query-or-insert an address on the encode side.
    ///
    /// A new address gets the next id. When `mark` is set the entry is marked
    /// as marshalled; `found` reports whether it was marked before this call.
    /// A null pointer yields id 0 and `found = true`, so nothing follows it.
    pub fn query_pointer(&mut self, ptr: Option<Addr>, mark: bool) -> PointerQuery {
        let Some(addr) = ptr else {
            return PointerQuery {
                ref_id: NULL_REF_ID,
                found: true,
            };
        };
        let ref_id = match self.by_addr.get(&addr) {
            Some(id) => *id,
            None => {
                let id = self.allocate_id();
                self.by_addr.insert(addr, id);
                self.entries.insert(
                    id,
                    Entry {
                        addr: Some(addr),
                        marked: false,
                    },
                );
                id
            }
        };
        let entry = self.entries.entry(ref_id).or_default();
        let found = entry.marked;
        if mark {
            entry.marked = true;
        }
        PointerQuery { ref_id, found }
    }

    /// Look up or admit an id on the decode side.
    ///
    /// A known id returns its registered address. An unknown id must be
    /// larger than every id seen so far in this call; it is admitted without
    /// an address, to be supplied by [`FullPointerTable::register`]. An
    /// unknown id at or below that watermark is a reference to an entry that
    /// never existed or was already freed.
    pub fn query_ref_id(&mut self, ref_id: u32, mark: bool) -> Result<RefIdQuery, MarshalError> {
        if ref_id == NULL_REF_ID {
            return Ok(RefIdQuery {
                addr: None,
                found: true,
            });
        }
        if !self.entries.contains_key(&ref_id) {
            if ref_id <= self.highest_seen {
                return Err(MarshalError::InvalidTableReference(ref_id));
            }
            self.highest_seen = ref_id;
            self.next_ref_id = self.next_ref_id.max(ref_id);
        }
        let entry = self.entries.entry(ref_id).or_default();
        let found = entry.marked;
        if mark {
            entry.marked = true;
        }
        Ok(RefIdQuery {
            addr: entry.addr,
            found,
        })
    }

    /// Attach a destination to an id. Succeeds once per id.
    pub fn register(&mut self, ref_id: u32, addr: Addr) -> bool {
        if ref_id == NULL_REF_ID || self.by_addr.contains_key(&addr) {
            return false;
        }
        if !self.entries.contains_key(&ref_id) {
            if ref_id <= self.highest_seen {
                return false;
            }
            self.highest_seen = ref_id;
            self.next_ref_id = self.next_ref_id.max(ref_id);
        }
        let entry = self.entries.entry(ref_id).or_default();
        if entry.addr.is_some() {
            return false;
        }
        entry.addr = Some(addr);
        self.by_addr.insert(addr, ref_id);
        true
    }

    /// Drop the entry for `addr`. Returns false when it was already absent.
    pub fn free_pointer(&mut self, addr: Addr) -> bool {
        match self.by_addr.remove(&addr) {
            Some(ref_id) => self.entries.remove(&ref_id).is_some(),
            None => false,
        }
    }

    /// Drop the entry for `ref_id`. Returns false when it was already absent.
    pub fn free_ref_id(&mut self, ref_id: u32) -> bool {
        match self.entries.remove(&ref_id) {
            Some(entry) => {
                if let Some(addr) = entry.addr {
                    self.by_addr.remove(&addr);
                }
                true
            }
            None => false,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_ref_id += 1;
        self.highest_seen = self.highest_seen.max(self.next_ref_id);
        self.next_ref_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u32) -> Addr {
        Addr::from_index(n)
    }

    #[test]
    fn test_query_pointer_assigns_ids_in_order() {
        let mut table = FullPointerTable::new();
        assert_eq!(
            table.query_pointer(Some(addr(10)), true),
            PointerQuery { ref_id: 1, found: false }
        );
        assert_eq!(
            table.query_pointer(Some(addr(10)), false),
            PointerQuery { ref_id: 1, found: true }
        );
        assert_eq!(
            table.query_pointer(Some(addr(20)), true),
            PointerQuery { ref_id: 2, found: false }
        );
        assert_eq!(
            table.query_pointer(None, true),
            PointerQuery { ref_id: 0, found: true }
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_query_without_mark_stays_unmarked() {
        let mut table = FullPointerTable::new();
        let first = table.query_pointer(Some(addr(1)), false);
        let second = table.query_pointer(Some(addr(1)), true);
        assert_eq!(first, PointerQuery { ref_id: 1, found: false });
        assert_eq!(second, PointerQuery { ref_id: 1, found: false });
    }

    #[test]
    fn test_decode_side_register_and_reuse() {
        let mut table = FullPointerTable::new();
        let q = table.query_ref_id(1, true).unwrap();
        assert_eq!(q, RefIdQuery { addr: None, found: false });
        assert!(table.register(1, addr(5)));
        assert!(!table.register(1, addr(6)));

        let again = table.query_ref_id(1, true).unwrap();
        assert_eq!(again, RefIdQuery { addr: Some(addr(5)), found: true });
    }

    #[test]
    fn test_backward_unknown_id_is_rejected() {
        let mut table = FullPointerTable::new();
        table.query_ref_id(3, true).unwrap();
        table.register(3, addr(0));
        assert_eq!(
            table.query_ref_id(2, true),
            Err(MarshalError::InvalidTableReference(2))
        );
    }

    #[test]
    fn test_free_succeeds_once() {
        let mut table = FullPointerTable::new();
        table.query_pointer(Some(addr(7)), true);
        assert!(table.free_pointer(addr(7)));
        assert!(!table.free_pointer(addr(7)));

        table.query_ref_id(9, true).unwrap();
        table.register(9, addr(8));
        assert!(table.free_ref_id(9));
        assert!(!table.free_ref_id(9));
        assert!(table.is_empty());
    }

    #[test]
    fn test_freed_id_cannot_be_referenced_again() {
        let mut table = FullPointerTable::new();
        table.query_ref_id(1, true).unwrap();
        table.register(1, addr(0));
        table.free_ref_id(1);
        assert_eq!(
            table.query_ref_id(1, false),
            Err(MarshalError::InvalidTableReference(1))
        );
    }
}
