//! Memory managers for the host and discrete memory spaces.
//!
//! Allocations are word-aligned byte blocks. Each manager keeps running
//! statistics and the discrete manager enforces a byte budget, so a request
//! that would exceed the device's memory fails with
//! [`BackendError::Allocation`] instead of silently spilling.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use sluice_tracing::performance::{record_allocation, record_transfer};

use crate::device::MemorySpace;
use crate::error::{BackendError, Result};

/// Default budget of the discrete memory space, in bytes.
pub const DEFAULT_DISCRETE_MEMORY_LIMIT: usize = 1 << 30;

const WORD: usize = std::mem::size_of::<u64>();
const UNLIMITED: usize = usize::MAX;

/// Running counters shared by a manager and every allocation it handed out.
#[derive(Debug)]
struct Accounting {
    space: MemorySpace,
    limit: AtomicUsize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicU64,
    transfers: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl Accounting {
    fn new(space: MemorySpace, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            space,
            limit: AtomicUsize::new(limit),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
        })
    }

    fn reserve(&self, bytes: usize) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        let reserved = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|total| *total <= limit)
            });
        match reserved {
            Ok(previous) => {
                self.peak.fetch_max(previous + bytes, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn allocate(self: &Arc<Self>, bytes: usize) -> Result<Allocation> {
        let start = Instant::now();
        let failed = BackendError::Allocation {
            requested: bytes,
            space: self.space,
        };

        if !self.reserve(bytes) {
            tracing::warn!(
                space = %self.space,
                requested = bytes,
                in_use = self.in_use.load(Ordering::Relaxed),
                limit = self.limit.load(Ordering::Relaxed),
                "allocation exceeds memory budget"
            );
            return Err(failed);
        }

        let words = bytes.div_ceil(WORD);
        let mut storage: Vec<u64> = Vec::new();
        if storage.try_reserve_exact(words).is_err() {
            self.release(bytes);
            tracing::warn!(space = %self.space, requested = bytes, "allocator refused request");
            return Err(failed);
        }
        storage.resize(words, 0);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        record_allocation(self.space, bytes, start.elapsed().as_micros() as u64);

        Ok(Allocation {
            words: storage,
            len_bytes: bytes,
            accounting: Arc::clone(self),
        })
    }

    fn transfer(&self, src: &Allocation, dst: &mut Allocation) -> Result<()> {
        let bytes = src.len_bytes;
        if dst.len_bytes < bytes {
            return Err(BackendError::Transfer {
                from: src.space(),
                to: dst.space(),
                bytes,
            });
        }

        let start = Instant::now();
        dst.as_bytes_mut()[..bytes].copy_from_slice(src.as_bytes());
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes as u64, Ordering::Relaxed);
        record_transfer(src.space(), dst.space(), bytes, start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn stats(&self) -> MemoryStats {
        let limit = self.limit.load(Ordering::Relaxed);
        MemoryStats {
            space: self.space,
            bytes_in_use: self.in_use.load(Ordering::Relaxed),
            peak_bytes: self.peak.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            limit: (limit != UNLIMITED).then_some(limit),
        }
    }
}

/// A block of bytes owned by one memory space.
///
/// Backed by `u64` words so that any element type up to 8-byte alignment
/// can be viewed in place. Dropping the allocation returns its bytes to the
/// owning manager's budget.
#[derive(Debug)]
pub struct Allocation {
    words: Vec<u64>,
    len_bytes: usize,
    accounting: Arc<Accounting>,
}

impl Allocation {
    pub fn space(&self) -> MemorySpace {
        self.accounting.space
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len_bytes]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len_bytes]
    }

    /// Start of the block, aligned to 8 bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    /// Copy the leading bytes of `other` into `self`; returns the count.
    pub fn copy_prefix_from(&mut self, other: &Allocation) -> usize {
        let bytes = self.len_bytes.min(other.len_bytes);
        self.as_bytes_mut()[..bytes].copy_from_slice(&other.as_bytes()[..bytes]);
        bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.accounting.release(self.len_bytes);
    }
}

/// Snapshot of a manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub space: MemorySpace,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
    pub allocations: u64,
    pub transfers: u64,
    pub bytes_transferred: u64,
    pub limit: Option<usize>,
}

/// Allocate, transfer into and free blocks of one memory space.
pub trait MemoryManager: Send + Sync {
    fn space(&self) -> MemorySpace;

    /// Zero-initialised block of `bytes` bytes.
    fn allocate(&self, bytes: usize) -> Result<Allocation>;

    /// Copy all of `src` into the front of `dst`, which must belong to this
    /// manager's space.
    fn transfer(&self, src: &Allocation, dst: &mut Allocation) -> Result<()>;

    fn free(&self, allocation: Allocation) {
        tracing::trace!(space = %allocation.space(), bytes = allocation.len_bytes(), "free");
        drop(allocation);
    }

    fn stats(&self) -> MemoryStats;
}

/// Host (system) memory, unbounded.
#[derive(Debug)]
pub struct HostMemory {
    accounting: Arc<Accounting>,
}

impl HostMemory {
    pub fn new() -> Self {
        Self {
            accounting: Accounting::new(MemorySpace::Host, UNLIMITED),
        }
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager for HostMemory {
    fn space(&self) -> MemorySpace {
        MemorySpace::Host
    }

    fn allocate(&self, bytes: usize) -> Result<Allocation> {
        self.accounting.allocate(bytes)
    }

    fn transfer(&self, src: &Allocation, dst: &mut Allocation) -> Result<()> {
        self.accounting.transfer(src, dst)
    }

    fn stats(&self) -> MemoryStats {
        self.accounting.stats()
    }
}

/// Memory of the discrete device, limited to a byte budget.
#[derive(Debug)]
pub struct DiscreteMemory {
    accounting: Arc<Accounting>,
}

impl DiscreteMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_DISCRETE_MEMORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            accounting: Accounting::new(MemorySpace::Discrete, limit),
        }
    }

    pub fn limit(&self) -> usize {
        self.accounting.limit.load(Ordering::Acquire)
    }

    /// Change the budget. Existing allocations are kept even if they now
    /// exceed it; only new requests are refused.
    pub fn set_limit(&self, limit: usize) {
        tracing::debug!(limit, "discrete memory budget updated");
        self.accounting.limit.store(limit, Ordering::Release);
    }

    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.accounting.in_use.load(Ordering::Acquire))
    }
}

impl Default for DiscreteMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager for DiscreteMemory {
    fn space(&self) -> MemorySpace {
        MemorySpace::Discrete
    }

    fn allocate(&self, bytes: usize) -> Result<Allocation> {
        self.accounting.allocate(bytes)
    }

    fn transfer(&self, src: &Allocation, dst: &mut Allocation) -> Result<()> {
        self.accounting.transfer(src, dst)
    }

    fn stats(&self) -> MemoryStats {
        self.accounting.stats()
    }
}

static HOST_MEMORY: LazyLock<HostMemory> = LazyLock::new(HostMemory::new);
static DISCRETE_MEMORY: LazyLock<DiscreteMemory> = LazyLock::new(DiscreteMemory::new);

/// Process-wide host memory manager.
pub fn host_memory() -> &'static HostMemory {
    &HOST_MEMORY
}

/// Process-wide discrete memory manager.
pub fn discrete_memory() -> &'static DiscreteMemory {
    &DISCRETE_MEMORY
}

/// Process-wide manager responsible for `space`.
pub fn manager(space: MemorySpace) -> &'static dyn MemoryManager {
    match space {
        MemorySpace::Host => host_memory(),
        MemorySpace::Discrete => discrete_memory(),
    }
}
