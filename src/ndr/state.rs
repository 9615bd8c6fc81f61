//! Per-call marshalling context.

use super::alloc::AllocationList;
use super::table::FullPointerTable;
use super::value::Addr;
use super::MarshalError;

/// Default bound on nested referents and aggregates.
///
/// Decoding relies on it to stop deeply nested wire data; pointer cycles in
/// a value graph are caught separately, by address.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Which pass a call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Size,
    Marshal,
    Unmarshal,
    Free,
}

/// Which side of the call the engine runs on.
///
/// Only a server may leave referents in the wire buffer; a client always
/// owns what it decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum Role {
    #[default]
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Options fixed for the duration of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub role: Role,
    /// Ignore caller-supplied destinations and allocate (or, on a server,
    /// point into the wire buffer) instead.
    pub must_alloc: bool,
    pub max_depth: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            role: Role::Client,
            must_alloc: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CallOptions {
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Self::default()
        }
    }
}

/// Where an unmarshalled referent ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Overwrite the live slot the caller already supplied.
    UseCallerBuffer(Addr),
    /// Server only: the slot borrows the referent's bytes in the wire buffer.
    PointIntoWireBuffer(Addr),
    /// A fresh slot charged to the allocator and recorded for rollback.
    AllocateFresh(Addr),
}

impl Destination {
    pub fn addr(self) -> Addr {
        match self {
            Self::UseCallerBuffer(a) | Self::PointIntoWireBuffer(a) | Self::AllocateFresh(a) => a,
        }
    }
}

/// State created at call entry and dropped at exit.
#[derive(Debug)]
pub(crate) struct MarshalState {
    pub mode: Mode,
    pub options: CallOptions,
    pub table: FullPointerTable,
    pub allocations: AllocationList,
    next_unique_id: u32,
    depth: usize,
    /// Referents on the current path, each with whether a full pointer led to it.
    path: Vec<(Addr, bool)>,
}

impl MarshalState {
    pub fn new(mode: Mode, options: CallOptions) -> Self {
        Self::with_heap_mark(mode, options, 0)
    }

    /// State whose allocation list rolls back to `mark` heap slots.
    pub fn with_heap_mark(mode: Mode, options: CallOptions, mark: usize) -> Self {
        Self {
            mode,
            options,
            table: FullPointerTable::new(),
            allocations: AllocationList::starting_at(mark),
            next_unique_id: 0,
            depth: 0,
            path: Vec::new(),
        }
    }

    /// Next wire id for a non-null unique pointer, starting at 1.
    pub fn next_unique_id(&mut self) -> u32 {
        self.next_unique_id += 1;
        self.next_unique_id
    }

    pub fn enter(&mut self) -> Result<(), MarshalError> {
        if self.depth >= self.options.max_depth {
            return Err(MarshalError::DepthExceeded(self.options.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Push a referent onto the current path.
    ///
    /// A full pointer reaches each address at most once per call, so only
    /// non-full pointers can loop. Reaching an address again through a
    /// non-full pointer, with no full pointer between the two visits, would
    /// repeat forever and is [`MarshalError::PointerCycle`].
    pub fn enter_referent(&mut self, addr: Addr, via_full: bool) -> Result<(), MarshalError> {
        if !via_full {
            for &(seen, full) in self.path.iter().rev() {
                if seen == addr {
                    return Err(MarshalError::PointerCycle(addr.index()));
                }
                if full {
                    break;
                }
            }
        }
        self.path.push((addr, via_full));
        Ok(())
    }

    pub fn leave_referent(&mut self) {
        self.path.pop();
    }
}
