//! Pointer marshalling.
//!
//! Every pointer goes through two steps: the id step writes or reads the
//! 4-byte wire id (nothing for a top-level ref pointer) and the referent step
//! marshals what it points to. A top-level pointer runs both back to back;
//! a pointer embedded in a struct runs the id step in the struct's flat
//! phase and the referent step afterwards, in pointer-layout order.

use super::format::{PointerKind, PointerType, TypeDef, TypeId};
use super::interp::{flat_size, viewable, Decoder, Encoder, Freer, MemorySizer};
use super::state::{Destination, Role};
use super::table::NULL_REF_ID;
use super::value::{Addr, Slot, Value, WireView};
use super::MarshalError;
use crate::logging::{trace, warn};

/// Referent whose id has been read and whose destination is chosen, but
/// whose bytes have not been decoded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingPointer {
    pub target: TypeId,
    pub destination: Destination,
}

fn pointer_addr(value: &Value) -> Result<Option<Addr>, MarshalError> {
    value
        .as_pointer()
        .ok_or_else(|| MarshalError::mismatch("pointer", value))
}

impl Encoder<'_, '_> {
    pub(crate) fn encode_pointer(&mut self, ptr: &PointerType, value: &Value) -> Result<(), MarshalError> {
        if let Some(addr) = self.encode_pointer_id(ptr, value, false)? {
            self.encode_referent(ptr, addr)?;
        }
        Ok(())
    }

    /// Write the pointer's id. Returns the referent still to be marshalled.
    pub(crate) fn encode_pointer_id(
        &mut self,
        ptr: &PointerType,
        value: &Value,
        embedded: bool,
    ) -> Result<Option<Addr>, MarshalError> {
        let addr = pointer_addr(value)?;
        match ptr.kind {
            PointerKind::Ref => {
                let addr = addr.ok_or(MarshalError::NullReferencePointer)?;
                if embedded {
                    self.buf.write_u32(NULL_REF_ID)?;
                }
                Ok(Some(addr))
            }
            PointerKind::Unique | PointerKind::Simple => match addr {
                None => {
                    self.buf.write_u32(NULL_REF_ID)?;
                    Ok(None)
                }
                Some(addr) => {
                    let id = self.state.next_unique_id();
                    trace!(id, addr = %addr, "unique pointer");
                    self.buf.write_u32(id)?;
                    Ok(Some(addr))
                }
            },
            PointerKind::Full => {
                let query = self.state.table.query_pointer(addr, true);
                trace!(id = query.ref_id, found = query.found, "full pointer");
                self.buf.write_u32(query.ref_id)?;
                Ok(if query.found { None } else { addr })
            }
        }
    }

    pub(crate) fn encode_referent(&mut self, ptr: &PointerType, addr: Addr) -> Result<(), MarshalError> {
        self.state.enter_referent(addr, ptr.kind == PointerKind::Full)?;
        let heap = self.heap;
        let value = heap.load(addr)?;
        self.encode(ptr.target, &value)?;
        self.state.leave_referent();
        Ok(())
    }
}

impl<'w> Decoder<'_, 'w> {
    pub(crate) fn decode_pointer(
        &mut self,
        ptr: &PointerType,
        existing: Option<&Value>,
    ) -> Result<Value, MarshalError> {
        let (addr, pending) = self.decode_pointer_id(ptr, existing, false)?;
        if let Some(pending) = pending {
            self.decode_referent(pending)?;
        }
        Ok(Value::Pointer(addr))
    }

    /// Read the pointer's id and pick a destination for a new referent.
    pub(crate) fn decode_pointer_id(
        &mut self,
        ptr: &PointerType,
        existing: Option<&Value>,
        embedded: bool,
    ) -> Result<(Option<Addr>, Option<PendingPointer>), MarshalError> {
        match ptr.kind {
            PointerKind::Ref => {
                if embedded {
                    self.reader.read_u32()?;
                }
            }
            PointerKind::Unique | PointerKind::Simple => {
                if self.reader.read_u32()? == NULL_REF_ID {
                    return Ok((None, None));
                }
            }
            PointerKind::Full => {
                let id = self.reader.read_u32()?;
                let query = self.state.table.query_ref_id(id, true)?;
                if id == NULL_REF_ID {
                    return Ok((None, None));
                }
                if let Some(addr) = query.addr {
                    trace!(id, addr = %addr, "full pointer alias");
                    return Ok((Some(addr), None));
                }
                let mut destination = self.destination(ptr.target, existing)?;
                if !self.state.table.register(id, destination.addr()) {
                    // the caller's slot already holds the referent of another id
                    warn!(id, addr = %destination.addr(), "caller destination taken, allocating instead");
                    destination = self.destination(ptr.target, None)?;
                    if !self.state.table.register(id, destination.addr()) {
                        return Err(MarshalError::InvalidTableReference(id));
                    }
                }
                return Ok((
                    Some(destination.addr()),
                    Some(PendingPointer {
                        target: ptr.target,
                        destination,
                    }),
                ));
            }
        }
        let destination = self.destination(ptr.target, existing)?;
        Ok((
            Some(destination.addr()),
            Some(PendingPointer {
                target: ptr.target,
                destination,
            }),
        ))
    }

    /// Choose where a new referent lands and claim its slot.
    fn destination(&mut self, target: TypeId, existing: Option<&Value>) -> Result<Destination, MarshalError> {
        let options = self.state.options;
        let caller = existing
            .and_then(Value::as_pointer)
            .flatten()
            .filter(|addr| self.heap.is_live(*addr));
        if let Some(addr) = caller {
            if !options.must_alloc {
                return Ok(Destination::UseCallerBuffer(addr));
            }
        }
        let addr = self.heap.reserve();
        self.state.allocations.record(addr);
        if options.role == Role::Server && viewable(self.lib, target)? {
            Ok(Destination::PointIntoWireBuffer(addr))
        } else {
            Ok(Destination::AllocateFresh(addr))
        }
    }

    pub(crate) fn decode_referent(&mut self, pending: PendingPointer) -> Result<(), MarshalError> {
        let target = pending.target;
        match pending.destination {
            Destination::UseCallerBuffer(addr) => {
                let prior = self.heap.get(addr).cloned();
                let value = self.decode(target, prior.as_ref())?;
                self.heap.fill(addr, Slot::Owned(value));
            }
            Destination::PointIntoWireBuffer(addr) => {
                let view = self.view(target)?;
                trace!(addr = %addr, len = view.bytes().len(), "referent left in wire buffer");
                self.heap.fill(addr, Slot::Wire(view));
            }
            Destination::AllocateFresh(addr) => {
                let value = self.decode(target, None)?;
                let size = flat_size(self.lib, target, &value)?;
                self.allocator.allocate(size)?;
                self.state.allocations.charge(addr, size);
                self.heap.fill(addr, Slot::Owned(value));
            }
        }
        Ok(())
    }

    fn view(&mut self, target: TypeId) -> Result<WireView<'w>, MarshalError> {
        let lib = self.lib;
        match lib.get(target)? {
            TypeDef::Scalar(kind) => self.view_scalar(*kind),
            TypeDef::String(string) => self.view_string(string),
            TypeDef::Array(array) => self.view_array(array),
            other => Err(MarshalError::mismatch("flat referent", &other.kind_name())),
        }
    }
}

impl Freer<'_, '_> {
    pub(crate) fn free_pointer(&mut self, ptr: &PointerType, value: &Value) -> Result<(), MarshalError> {
        let Some(addr) = pointer_addr(value)? else {
            return Ok(());
        };
        if ptr.kind == PointerKind::Full && self.state.table.query_pointer(Some(addr), true).found {
            self.report.already_absent += 1;
            return Ok(());
        }
        if ptr.flags.dont_free() {
            self.report.kept += 1;
            return Ok(());
        }
        // The slot is emptied before its referent is walked, so a cycle of
        // non-full pointers comes back to an absent slot and stops.
        match self.heap.take(addr) {
            Some(Slot::Owned(referent)) => {
                self.free(ptr.target, &referent)?;
                let size = flat_size(self.lib, ptr.target, &referent)?;
                self.allocator.free(size);
                self.report.freed += 1;
                self.report.bytes += size;
            }
            Some(Slot::Wire(_)) => self.report.freed += 1,
            Some(Slot::Reserved | Slot::Freed) | None => self.report.already_absent += 1,
        }
        Ok(())
    }
}

impl MemorySizer<'_, '_> {
    pub(crate) fn referent_size(&mut self, ptr: &PointerType, value: &Value) -> Result<usize, MarshalError> {
        let Some(addr) = pointer_addr(value)? else {
            return Ok(0);
        };
        if ptr.kind == PointerKind::Full && self.state.table.query_pointer(Some(addr), true).found {
            return Ok(0);
        }
        self.state.enter_referent(addr, ptr.kind == PointerKind::Full)?;
        let heap = self.heap;
        let referent = heap.load(addr)?;
        let size = self.size(ptr.target, &referent)?;
        self.state.leave_referent();
        Ok(size)
    }
}
