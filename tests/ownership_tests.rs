//! Ownership, allocation and cleanup behavior of unmarshal and free.
//!
//! Covers where unmarshalled referents land for each role, rollback when an
//! allocation fails partway through, and how the free pass treats aliases
//! and don't-free pointers.

mod common;

use common::{
    parse, parse_with_full, pointer_pair, FULL_LINKED_NODE, FULL_LONG, LINKED_NODE, REF_STRING,
    UNIQUE_ENUM16, UNIQUE_LONG,
};
use ndr_marshal::{
    BudgetAllocator, CallOptions, Heap, MarshalError, Ndr, PointerFlags, PointerKind, PointerType,
    Slot, TypeDef, UnboundedAllocator, Value,
};

const DONT_FREE: u8 = 0x02;

fn pointee(value: &Value) -> Result<ndr_marshal::Addr, anyhow::Error> {
    value
        .as_pointer()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("expected a non-null pointer"))
}

// =============================================================================
// Destinations
// =============================================================================

#[test]
fn test_client_copies_referents() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_LONG)?;
    let wire = [1, 0, 0, 0, 42, 0, 0, 0];

    let mut heap = Heap::new();
    let (value, _) = Ndr::new(&lib).unmarshal(ty, &wire, &mut heap)?;
    let addr = pointee(&value)?;
    assert!(!heap.is_wire_view(addr));
    assert_eq!(heap.get(addr), Some(&Value::Long(42)));
    Ok(())
}

#[test]
fn test_server_points_into_wire_buffer() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_LONG)?;
    let wire = [1, 0, 0, 0, 42, 0, 0, 0];

    let mut heap = Heap::new();
    let ndr = Ndr::with_options(&lib, CallOptions::server());
    let (value, _) = ndr.unmarshal(ty, &wire, &mut heap)?;
    let addr = pointee(&value)?;
    assert!(heap.is_wire_view(addr));
    assert_eq!(heap.load(addr)?.into_owned(), Value::Long(42));

    let Some(Slot::Wire(view)) = heap.slot(addr) else {
        anyhow::bail!("expected a wire view");
    };
    assert_eq!(view.bytes(), &wire[4..8]);
    Ok(())
}

#[test]
fn test_server_strings_stay_in_wire_buffer() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&REF_STRING)?;
    let mut source = Heap::new();
    let root = Value::Pointer(Some(source.alloc(Value::c_string("view me"))));
    let ndr = Ndr::with_options(&lib, CallOptions::server());
    let wire = ndr.marshal(ty, &root, &source)?;

    let mut heap = Heap::new();
    let (value, _) = ndr.unmarshal(ty, &wire, &mut heap)?;
    let addr = pointee(&value)?;
    assert!(heap.is_wire_view(addr));

    let owned = heap.into_owned()?;
    assert_eq!(owned.get(addr), Some(&Value::c_string("view me")));
    Ok(())
}

/// A 16-bit enum widens to a 32-bit host value, so it is never aliased.
#[test]
fn test_server_widened_enum_is_allocated() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_ENUM16)?;
    let wire = [1, 0, 0, 0, 3, 0];

    let mut heap = Heap::new();
    let ndr = Ndr::with_options(&lib, CallOptions::server());
    let (value, consumed) = ndr.unmarshal(ty, &wire, &mut heap)?;
    assert_eq!(consumed, 6);
    let addr = pointee(&value)?;
    assert!(!heap.is_wire_view(addr));
    assert_eq!(heap.get(addr), Some(&Value::Enum16(3)));
    Ok(())
}

#[test]
fn test_enum16_out_of_range() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_ENUM16)?;
    let mut heap = Heap::new();
    let root = Value::Pointer(Some(heap.alloc(Value::Enum16(0x8000))));
    let err = Ndr::new(&lib)
        .marshal(ty, &root, &heap)
        .expect_err("enum16 above 0x7FFF");
    assert_eq!(err, MarshalError::EnumOutOfRange(0x8000));
    Ok(())
}

/// A live caller pointer is reused unless the call must allocate.
#[test]
fn test_caller_buffer_and_must_alloc() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_LONG)?;
    let wire = [1, 0, 0, 0, 9, 0, 0, 0];

    let mut heap = Heap::new();
    let caller = heap.alloc(Value::Long(0));
    let existing = Value::Pointer(Some(caller));

    let mut allocator = UnboundedAllocator::new();
    let ndr = Ndr::new(&lib);
    let (value, _) = ndr.unmarshal_with(ty, &wire, &mut heap, Some(&existing), &mut allocator)?;
    assert_eq!(value, existing);
    assert_eq!(heap.get(caller), Some(&Value::Long(9)));
    assert_eq!(heap.len(), 1);
    assert_eq!(allocator.in_use(), 0);

    let options = CallOptions {
        must_alloc: true,
        ..CallOptions::default()
    };
    let ndr = Ndr::with_options(&lib, options);
    let (value, _) = ndr.unmarshal_with(ty, &wire, &mut heap, Some(&existing), &mut allocator)?;
    let fresh = pointee(&value)?;
    assert_ne!(fresh, caller);
    assert_eq!(heap.get(fresh), Some(&Value::Long(9)));
    assert_eq!(heap.len(), 2);
    assert_eq!(allocator.in_use(), 4);
    Ok(())
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_allocation_failure_rolls_back() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Unique, 0)?;
    let wire = [1, 0, 0, 0, 2, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0];

    let mut heap = Heap::new();
    heap.alloc(Value::Long(-1));
    let mut allocator = BudgetAllocator::new(4);

    let err = Ndr::new(&types.lib)
        .unmarshal_with(types.pair, &wire, &mut heap, None, &mut allocator)
        .expect_err("second referent exceeds the budget");
    assert_eq!(
        err,
        MarshalError::AllocationFailure {
            requested: 4,
            limit: 4
        }
    );
    assert_eq!(heap.len(), 1);
    assert_eq!(heap.get(ndr_marshal::Addr::from_index(0)), Some(&Value::Long(-1)));
    assert_eq!(allocator.in_use(), 0);
    Ok(())
}

#[test]
fn test_truncated_wire_rolls_back() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Unique, 0)?;
    let wire = [1, 0, 0, 0, 2, 0, 0, 0, 10, 0, 0, 0, 20, 0];

    let mut heap = Heap::new();
    let mut allocator = UnboundedAllocator::new();
    let err = Ndr::new(&types.lib)
        .unmarshal_with(types.pair, &wire, &mut heap, None, &mut allocator)
        .expect_err("wire ends inside the second referent");
    assert!(matches!(err, MarshalError::BufferExhausted { .. }));
    assert!(heap.is_empty());
    assert_eq!(allocator.in_use(), 0);
    assert_eq!(allocator.peak(), 4);
    Ok(())
}

/// A full pointer id at or below one already seen, but never registered,
/// is a corrupt reference.
#[test]
fn test_backward_unknown_ref_id() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Full, 0)?;
    let wire = [2, 0, 0, 0, 1, 0, 0, 0, 5, 0, 0, 0, 6, 0, 0, 0];

    let mut heap = Heap::new();
    let err = Ndr::new(&types.lib)
        .unmarshal(types.pair, &wire, &mut heap)
        .expect_err("id 1 was never registered");
    assert_eq!(err, MarshalError::InvalidTableReference(1));
    assert!(heap.is_empty());
    Ok(())
}

/// A cycle made only of unique pointers is caught at the repeated address.
#[test]
fn test_unique_pointer_cycle_is_rejected() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&LINKED_NODE)?;
    let mut heap = Heap::new();
    let node = heap.alloc(Value::Long(0));
    let looped = Value::Struct(vec![Value::Long(1), Value::Pointer(Some(node))]);
    heap.set(node, looped.clone());

    let ndr = Ndr::new(&lib);
    let err = ndr
        .buffer_size(ty, &looped, &heap)
        .expect_err("cycle through unique pointers never ends");
    assert_eq!(err, MarshalError::PointerCycle(node.index()));
    let err = ndr
        .marshal(ty, &looped, &heap)
        .expect_err("cycle through unique pointers never ends");
    assert_eq!(err, MarshalError::PointerCycle(node.index()));
    let err = ndr
        .memory_size(ty, &looped, &heap)
        .expect_err("cycle through unique pointers never ends");
    assert_eq!(err, MarshalError::PointerCycle(node.index()));

    let chain_end = heap.alloc(Value::Struct(vec![Value::Long(2), Value::Pointer(None)]));
    let chain = Value::Struct(vec![Value::Long(1), Value::Pointer(Some(chain_end))]);
    assert_eq!(ndr.buffer_size(ty, &chain, &heap)?, 16);
    Ok(())
}

/// Build a list of `len` nodes holding `0..len`, returning the head.
fn linked_list(heap: &mut Heap<'_>, len: i32) -> Value {
    let mut next = None;
    for value in (1..len).rev() {
        let node = heap.alloc(Value::Struct(vec![Value::Long(value), Value::Pointer(next)]));
        next = Some(node);
    }
    Value::Struct(vec![Value::Long(0), Value::Pointer(next)])
}

/// Long lists fit the default depth; a tight limit stops both directions.
#[test]
fn test_long_list_and_depth_limit() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&LINKED_NODE)?;
    let mut heap = Heap::new();
    let head = linked_list(&mut heap, 100);

    let ndr = Ndr::new(&lib);
    assert_eq!(ndr.buffer_size(ty, &head, &heap)?, 800);
    let wire = ndr.marshal(ty, &head, &heap)?;
    assert_eq!(wire.len(), 800);
    assert_eq!(wire[792..], [99, 0, 0, 0, 0, 0, 0, 0]);

    let mut decoded = Heap::new();
    let (value, consumed) = ndr.unmarshal(ty, &wire, &mut decoded)?;
    assert_eq!(consumed, 800);
    assert_eq!(decoded.live_count(), 99);
    assert_eq!(ndr.marshal(ty, &value, &decoded)?, wire);

    let options = CallOptions {
        max_depth: 16,
        ..CallOptions::default()
    };
    let shallow = Ndr::with_options(&lib, options);
    let err = shallow
        .marshal(ty, &head, &heap)
        .expect_err("list is deeper than the limit");
    assert_eq!(err, MarshalError::DepthExceeded(16));

    let mut decoded = Heap::new();
    let err = shallow
        .unmarshal(ty, &wire, &mut decoded)
        .expect_err("wire is nested deeper than the limit");
    assert_eq!(err, MarshalError::DepthExceeded(16));
    assert!(decoded.is_empty());
    Ok(())
}

/// A node that links to itself through a full pointer is sent once and
/// decodes to a slot pointing at itself, for either role.
#[test]
fn test_full_pointer_self_cycle_roundtrip() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse_with_full(&FULL_LINKED_NODE)?;
    let mut heap = Heap::new();
    let node = heap.alloc(Value::Long(0));
    heap.set(node, Value::Struct(vec![Value::Long(1), Value::Pointer(Some(node))]));
    let root = Value::Struct(vec![Value::Long(1), Value::Pointer(Some(node))]);

    for options in [CallOptions::default(), CallOptions::server()] {
        let ndr = Ndr::with_options(&lib, options);
        assert_eq!(ndr.buffer_size(ty, &root, &heap)?, 16);
        let wire = ndr.marshal(ty, &root, &heap)?;
        assert_eq!(
            wire,
            [
                1, 0, 0, 0, 1, 0, 0, 0, // root: value, new id
                1, 0, 0, 0, 1, 0, 0, 0, // referent: value, same id
            ]
        );

        let mut decoded = Heap::new();
        let (value, consumed) = ndr.unmarshal(ty, &wire, &mut decoded)?;
        assert_eq!(consumed, 16);
        let Value::Struct(fields) = value else {
            anyhow::bail!("expected a struct");
        };
        let addr = pointee(&fields[1])?;
        assert_eq!(
            decoded.load(addr)?.into_owned(),
            Value::Struct(vec![Value::Long(1), Value::Pointer(Some(addr))])
        );
        assert_eq!(decoded.live_count(), 1);
    }
    Ok(())
}

/// Reaching a node through a unique pointer and then again through its own
/// full pointer is finite and not a cycle.
#[test]
fn test_unique_pointer_into_full_cycle() -> Result<(), anyhow::Error> {
    let (mut lib, node_ty) = parse_with_full(&FULL_LINKED_NODE)?;
    let ty = lib.push(TypeDef::Pointer(PointerType {
        kind: PointerKind::Unique,
        flags: PointerFlags::default(),
        target: node_ty,
    }));
    let mut heap = Heap::new();
    let node = heap.alloc(Value::Long(0));
    heap.set(node, Value::Struct(vec![Value::Long(1), Value::Pointer(Some(node))]));
    let root = Value::Pointer(Some(node));

    let ndr = Ndr::new(&lib);
    let wire = ndr.marshal(ty, &root, &heap)?;
    assert_eq!(
        wire,
        [
            1, 0, 0, 0, // unique id
            1, 0, 0, 0, 1, 0, 0, 0, // copy reached by the unique pointer
            1, 0, 0, 0, 1, 0, 0, 0, // full referent, then its alias
        ]
    );
    assert_eq!(ndr.memory_size(ty, &root, &heap)?, 16);
    Ok(())
}

/// A caller slot shared by two distinct full pointer ids takes the first
/// referent; the second gets a fresh slot.
#[test]
fn test_shared_caller_slot_for_distinct_full_ids() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Full, 0)?;
    let wire = [1, 0, 0, 0, 2, 0, 0, 0, 5, 0, 0, 0, 6, 0, 0, 0];

    let mut heap = Heap::new();
    let caller = heap.alloc(Value::Long(0));
    let existing = Value::Struct(vec![Value::Pointer(Some(caller)), Value::Pointer(Some(caller))]);

    let mut allocator = UnboundedAllocator::new();
    let (value, consumed) = Ndr::new(&types.lib).unmarshal_with(
        types.pair,
        &wire,
        &mut heap,
        Some(&existing),
        &mut allocator,
    )?;
    assert_eq!(consumed, 16);
    let Value::Struct(fields) = value else {
        anyhow::bail!("expected a struct");
    };
    assert_eq!(pointee(&fields[0])?, caller);
    assert_eq!(heap.get(caller), Some(&Value::Long(5)));
    let fresh = pointee(&fields[1])?;
    assert_ne!(fresh, caller);
    assert_eq!(heap.get(fresh), Some(&Value::Long(6)));
    assert_eq!(heap.live_count(), 2);
    assert_eq!(allocator.in_use(), 4);
    Ok(())
}

// =============================================================================
// Free Pass
// =============================================================================

#[test]
fn test_free_returns_allocated_bytes() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Unique, 0)?;
    let wire = [1, 0, 0, 0, 2, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0];

    let mut heap = Heap::new();
    let mut allocator = UnboundedAllocator::new();
    let ndr = Ndr::new(&types.lib);
    let (value, _) = ndr.unmarshal_with(types.pair, &wire, &mut heap, None, &mut allocator)?;
    assert_eq!(allocator.in_use(), 8);

    let report = ndr.free(types.pair, &value, &mut heap, &mut allocator)?;
    assert_eq!(report.freed, 2);
    assert_eq!(report.bytes, 8);
    assert_eq!(allocator.in_use(), 0);
    assert_eq!(heap.live_count(), 0);
    Ok(())
}

#[test]
fn test_free_releases_aliases_once() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Full, 0)?;
    let mut heap = Heap::new();
    let shared = heap.alloc(Value::Long(7));
    let root = Value::Struct(vec![Value::Pointer(Some(shared)), Value::Pointer(Some(shared))]);

    let mut allocator = UnboundedAllocator::new();
    let report = Ndr::new(&types.lib).free(types.pair, &root, &mut heap, &mut allocator)?;
    assert_eq!(report.freed, 1);
    assert_eq!(report.already_absent, 1);
    assert!(!heap.is_live(shared));
    Ok(())
}

#[test]
fn test_free_twice_reports_absent() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse_with_full(&FULL_LONG)?;
    let mut heap = Heap::new();
    let root = Value::Pointer(Some(heap.alloc(Value::Long(7))));

    let mut allocator = UnboundedAllocator::new();
    let ndr = Ndr::new(&lib);
    assert_eq!(ndr.free(ty, &root, &mut heap, &mut allocator)?.freed, 1);
    let again = ndr.free(ty, &root, &mut heap, &mut allocator)?;
    assert_eq!(again.freed, 0);
    assert_eq!(again.already_absent, 1);
    Ok(())
}

/// Cycles end at the first slot that is already gone, whether they close
/// through unique or full pointers.
#[test]
fn test_free_stops_at_cycles() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&LINKED_NODE)?;
    let mut heap = Heap::new();
    let node = heap.alloc(Value::Long(0));
    let looped = Value::Struct(vec![Value::Long(1), Value::Pointer(Some(node))]);
    heap.set(node, looped.clone());

    let mut allocator = UnboundedAllocator::new();
    let report = Ndr::new(&lib).free(ty, &looped, &mut heap, &mut allocator)?;
    assert_eq!(report.freed, 1);
    assert_eq!(report.already_absent, 1);
    assert!(!heap.is_live(node));

    let (lib, ty) = parse_with_full(&FULL_LINKED_NODE)?;
    let wire = [1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0];
    let mut heap = Heap::new();
    let ndr = Ndr::new(&lib);
    let (value, _) = ndr.unmarshal_with(ty, &wire, &mut heap, None, &mut allocator)?;
    assert_eq!(allocator.in_use(), 8);

    let report = ndr.free(ty, &value, &mut heap, &mut allocator)?;
    assert_eq!(report.freed, 1);
    assert_eq!(report.bytes, 8);
    assert_eq!(report.already_absent, 1);
    assert_eq!(allocator.in_use(), 0);
    assert_eq!(heap.live_count(), 0);
    Ok(())
}

#[test]
fn test_dont_free_pointer_is_kept() -> Result<(), anyhow::Error> {
    let types = pointer_pair(PointerKind::Unique, DONT_FREE)?;
    let mut heap = Heap::new();
    let a = heap.alloc(Value::Long(1));
    let b = heap.alloc(Value::Long(2));
    let root = Value::Struct(vec![Value::Pointer(Some(a)), Value::Pointer(Some(b))]);

    let mut allocator = UnboundedAllocator::new();
    let report = Ndr::new(&types.lib).free(types.pair, &root, &mut heap, &mut allocator)?;
    assert_eq!(report.kept, 2);
    assert_eq!(report.freed, 0);
    assert!(heap.is_live(a));
    assert!(heap.is_live(b));
    Ok(())
}

#[test]
fn test_free_wire_views_charges_nothing() -> Result<(), anyhow::Error> {
    let (lib, ty) = parse(&UNIQUE_LONG)?;
    let wire = [1, 0, 0, 0, 42, 0, 0, 0];

    let mut heap = Heap::new();
    let mut allocator = UnboundedAllocator::new();
    let ndr = Ndr::with_options(&lib, CallOptions::server());
    let (value, _) = ndr.unmarshal_with(ty, &wire, &mut heap, None, &mut allocator)?;
    assert_eq!(allocator.peak(), 0);

    let report = ndr.free(ty, &value, &mut heap, &mut allocator)?;
    assert_eq!(report.freed, 1);
    assert_eq!(report.bytes, 0);
    assert_eq!(heap.live_count(), 0);
    Ok(())
}
