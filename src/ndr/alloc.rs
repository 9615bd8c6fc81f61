//! Injected allocators and the per-call allocation list.
//!
//! Referent storage itself lives in the [`Heap`] arena. An [`Allocator`]
//! decides whether a fresh referent of a given host size may be created and
//! accounts for it, standing in for the allocate/free callback pair an RPC
//! runtime hands to the engine for each call.

use super::value::{Addr, Heap};
use super::MarshalError;

/// Allocate/free callbacks supplied per call.
///
/// Implementations need not be thread-safe: one allocator serves one call at
/// a time.
pub trait Allocator {
    /// Reserve `size` bytes of host memory for a new referent.
    fn allocate(&mut self, size: usize) -> Result<(), MarshalError>;

    /// Return `size` bytes previously reserved with [`Allocator::allocate`].
    fn free(&mut self, size: usize);
}

/// Allocator without a limit that tracks usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnboundedAllocator {
    in_use: usize,
    peak: usize,
}

impl UnboundedAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn peak(&self) -> usize {
        self.peak
    }
}

impl Allocator for UnboundedAllocator {
    fn allocate(&mut self, size: usize) -> Result<(), MarshalError> {
        self.in_use += size;
        self.peak = self.peak.max(self.in_use);
        Ok(())
    }

    fn free(&mut self, size: usize) {
        self.in_use = self.in_use.saturating_sub(size);
    }
}

/// Allocator that refuses to exceed a fixed byte budget.
///
/// # Example
///
/// ```
/// use ndr_marshal::{Allocator, BudgetAllocator, MarshalError};
///
/// let mut alloc = BudgetAllocator::new(8);
/// alloc.allocate(6)?;
/// assert!(matches!(alloc.allocate(4), Err(MarshalError::AllocationFailure { .. })));
/// alloc.free(6);
/// assert_eq!(alloc.in_use(), 0);
/// # Ok::<(), MarshalError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetAllocator {
    limit: usize,
    in_use: usize,
}

impl BudgetAllocator {
    pub fn new(limit: usize) -> Self {
        Self { limit, in_use: 0 }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Allocator for BudgetAllocator {
    fn allocate(&mut self, size: usize) -> Result<(), MarshalError> {
        let wanted = self.in_use.saturating_add(size);
        if wanted > self.limit {
            return Err(MarshalError::AllocationFailure {
                requested: size,
                limit: self.limit,
            });
        }
        self.in_use = wanted;
        Ok(())
    }

    fn free(&mut self, size: usize) {
        self.in_use = self.in_use.saturating_sub(size);
    }
}

/// Every heap slot created on the callee's behalf during one call.
///
/// All of them sit at or above `mark`, so a failed call is undone by
/// truncating the heap back to `mark` and returning the charged bytes.
#[derive(Debug, Clone)]
pub(crate) struct AllocationList {
    mark: usize,
    blocks: Vec<(Addr, usize)>,
}

impl AllocationList {
    pub fn starting_at(mark: usize) -> Self {
        Self {
            mark,
            blocks: Vec::new(),
        }
    }

    pub fn record(&mut self, addr: Addr) {
        self.blocks.push((addr, 0));
    }

    /// Attach the charged size to a recorded block.
    pub fn charge(&mut self, addr: Addr, size: usize) {
        if let Some(block) = self.blocks.iter_mut().rev().find(|(a, _)| *a == addr) {
            block.1 += size;
        }
    }

    pub fn charged(&self) -> usize {
        self.blocks.iter().map(|(_, size)| size).sum()
    }

    /// Bulk free: drop every slot and give every charged byte back.
    pub fn release_all(self, heap: &mut Heap<'_>, allocator: &mut dyn Allocator) {
        allocator.free(self.charged());
        heap.truncate(self.mark);
    }
}
