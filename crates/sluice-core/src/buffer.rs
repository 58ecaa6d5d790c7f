//! Reference-counted byte buffers with per-memory-space copies.
//!
//! A [`Buffer`] keeps at most one allocation per [`MemorySpace`]. Exactly one
//! space is authoritative after any write; other copies are either valid
//! mirrors of it or stale. Asking for the buffer on a space
//! ([`Buffer::ensure_on`]) allocates and transfers only when that space is
//! missing or stale.
//!
//! Portals access the bytes through leases: any number of read leases, or a
//! single write lease. Control operations that reallocate (resize, release)
//! wait until no lease is outstanding, so leased memory never moves.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use sluice_backends::{manager, Allocation, MemorySpace};

use crate::error::{Error, Result};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer, shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of [`Buffer::ensure_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub space: MemorySpace,
    pub len_bytes: usize,
}

struct Slot {
    allocation: Allocation,
    valid: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct SpaceStats {
    allocations: u64,
    transfers: u64,
}

fn no_slots() -> [Option<Slot>; MemorySpace::COUNT] {
    std::array::from_fn(|_| None)
}

struct BufferState {
    len_bytes: usize,
    slots: [Option<Slot>; MemorySpace::COUNT],
    authoritative: Option<MemorySpace>,
    stats: [SpaceStats; MemorySpace::COUNT],
    readers: usize,
    writer: bool,
}

impl BufferState {
    fn is_valid_on(&self, space: MemorySpace) -> bool {
        self.slots[space.index()].as_ref().is_some_and(|slot| slot.valid)
    }

    /// Slot for `space` with an allocation of the current length, valid or not.
    fn sized_slot(&mut self, space: MemorySpace) -> Result<Slot> {
        match self.slots[space.index()].take() {
            Some(slot) if slot.allocation.len_bytes() == self.len_bytes => Ok(slot),
            _ => {
                let allocation = manager(space).allocate(self.len_bytes)?;
                self.stats[space.index()].allocations += 1;
                Ok(Slot {
                    allocation,
                    valid: false,
                })
            }
        }
    }

    fn ensure(&mut self, space: MemorySpace) -> Result<()> {
        if self.is_valid_on(space) {
            return Ok(());
        }

        let mut slot = self.sized_slot(space)?;
        match self.authoritative {
            None => {
                tracing::trace!(space = %space, "first use; zero-initialised");
                self.authoritative = Some(space);
            }
            Some(source_space) => {
                let transferred = match self.slots[source_space.index()].as_ref() {
                    Some(source) => manager(space)
                        .transfer(&source.allocation, &mut slot.allocation)
                        .map_err(Error::from),
                    None => Err(Error::unsupported(format!(
                        "authoritative copy on {source_space} is missing"
                    ))),
                };
                if let Err(err) = transferred {
                    self.slots[space.index()] = Some(slot);
                    return Err(err);
                }
                self.stats[space.index()].transfers += 1;
            }
        }

        slot.valid = true;
        self.slots[space.index()] = Some(slot);
        Ok(())
    }

    /// Allocate on `space` if needed, without copying old contents.
    fn prepare_discarding(&mut self, space: MemorySpace) -> Result<()> {
        let mut slot = self.sized_slot(space)?;
        slot.valid = true;
        self.slots[space.index()] = Some(slot);
        Ok(())
    }

    fn set_authoritative(&mut self, space: MemorySpace) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                slot.valid = index == space.index();
            }
        }
        self.authoritative = Some(space);
    }

    fn allocation_mut(&mut self, space: MemorySpace) -> Result<&mut Allocation> {
        self.slots[space.index()]
            .as_mut()
            .map(|slot| &mut slot.allocation)
            .ok_or_else(|| Error::unsupported(format!("no allocation on {space}")))
    }
}

struct BufferInner {
    id: BufferId,
    state: Mutex<BufferState>,
    changed: Condvar,
}

/// Shared byte storage; cloning shares the same memory.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("len_bytes", &state.len_bytes)
            .field("authoritative", &state.authoritative)
            .finish()
    }
}

impl Buffer {
    /// A buffer of `len_bytes` bytes. Nothing is allocated until first use,
    /// which sees zeroes.
    pub fn new(len_bytes: usize) -> Self {
        let id = BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(BufferInner {
                id,
                state: Mutex::new(BufferState {
                    len_bytes,
                    slots: no_slots(),
                    authoritative: None,
                    stats: [SpaceStats::default(); MemorySpace::COUNT],
                    readers: 0,
                    writer: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// A host-authoritative buffer holding a copy of `bytes`.
    pub fn from_host_bytes(bytes: &[u8]) -> Result<Self> {
        let buffer = Self::new(bytes.len());
        let (lease, ptr) = buffer.acquire_write(MemorySpace::Host, false)?;
        // SAFETY: the write lease grants exclusive access to `bytes.len()` bytes at `ptr`.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        drop(lease);
        Ok(buffer)
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn len_bytes(&self) -> usize {
        self.inner.state.lock().len_bytes
    }

    /// Whether `self` and `other` share storage.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn authoritative_space(&self) -> Option<MemorySpace> {
        self.inner.state.lock().authoritative
    }

    pub fn is_valid_on(&self, space: MemorySpace) -> bool {
        self.inner.state.lock().is_valid_on(space)
    }

    pub fn has_allocation_on(&self, space: MemorySpace) -> bool {
        self.inner.state.lock().slots[space.index()].is_some()
    }

    /// Allocations this buffer made on `space` over its lifetime.
    pub fn allocation_count(&self, space: MemorySpace) -> u64 {
        self.inner.state.lock().stats[space.index()].allocations
    }

    /// Transfers into `space` this buffer performed over its lifetime.
    pub fn transfer_count(&self, space: MemorySpace) -> u64 {
        self.inner.state.lock().stats[space.index()].transfers
    }

    fn lock_when(&self, ready: impl Fn(&BufferState) -> bool) -> MutexGuard<'_, BufferState> {
        let mut state = self.inner.state.lock();
        while !ready(&state) {
            self.inner.changed.wait(&mut state);
        }
        state
    }

    /// Make the contents valid on `space`, allocating and transferring only
    /// when the copy there is missing or stale.
    #[tracing::instrument(skip_all, fields(buffer = %self.inner.id, space = %space))]
    pub fn ensure_on(&self, space: MemorySpace) -> Result<TargetInfo> {
        let mut state = self.lock_when(|s| !s.writer);
        state.ensure(space)?;
        Ok(TargetInfo {
            space,
            len_bytes: state.len_bytes,
        })
    }

    /// Declare `space` the only up-to-date copy. Waits for outstanding
    /// leases.
    pub fn mark_written(&self, space: MemorySpace) -> Result<()> {
        let mut state = self.lock_when(|s| !s.writer && s.readers == 0);
        state.ensure(space)?;
        state.set_authoritative(space);
        Ok(())
    }

    /// Change the byte length. Non-authoritative copies are dropped; the
    /// authoritative copy is reallocated, keeping its leading bytes when
    /// `preserve` is set. Growing without `preserve` (or past the old end)
    /// yields zeroes.
    #[tracing::instrument(skip(self), fields(buffer = %self.inner.id))]
    pub fn resize(&self, new_len_bytes: usize, preserve: bool) -> Result<()> {
        let mut state = self.lock_when(|s| !s.writer && s.readers == 0);
        if state.len_bytes == new_len_bytes {
            return Ok(());
        }

        match state.authoritative {
            Some(space) => {
                let mut fresh = manager(space).allocate(new_len_bytes)?;
                if preserve {
                    if let Some(old) = state.slots[space.index()].as_ref() {
                        fresh.copy_prefix_from(&old.allocation);
                    }
                }
                state.stats[space.index()].allocations += 1;
                state.slots = no_slots();
                state.slots[space.index()] = Some(Slot {
                    allocation: fresh,
                    valid: true,
                });
            }
            None => state.slots = no_slots(),
        }

        tracing::debug!(from = state.len_bytes, to = new_len_bytes, preserve, "buffer resized");
        state.len_bytes = new_len_bytes;
        Ok(())
    }

    /// Free the copy on `space`. The authoritative copy cannot be released.
    pub fn release_resources_on(&self, space: MemorySpace) -> Result<()> {
        let mut state = self.lock_when(|s| !s.writer && s.readers == 0);
        if state.authoritative == Some(space) {
            return Err(Error::unsupported(format!(
                "cannot release the authoritative copy on {space}"
            )));
        }
        if let Some(slot) = state.slots[space.index()].take() {
            manager(space).free(slot.allocation);
        }
        Ok(())
    }

    /// Copy of the contents, read on the host.
    pub fn to_host_bytes(&self) -> Result<Vec<u8>> {
        let (lease, ptr) = self.acquire_read(MemorySpace::Host)?;
        // SAFETY: the read lease keeps `lease.len_bytes` bytes at `ptr` valid and unaliased by writers.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, lease.len_bytes) }.to_vec();
        Ok(bytes)
    }

    /// Shared access to the copy on `space`, made valid first.
    pub(crate) fn acquire_read(&self, space: MemorySpace) -> Result<(ReadLease, *const u8)> {
        let mut state = self.lock_when(|s| !s.writer);
        state.ensure(space)?;
        let len_bytes = state.len_bytes;
        let ptr = state.allocation_mut(space)?.as_ptr();
        state.readers += 1;
        Ok((
            ReadLease {
                buffer: self.clone(),
                len_bytes,
            },
            ptr,
        ))
    }

    /// Exclusive access to the copy on `space`, which becomes authoritative.
    /// Without `preserve` a stale copy is not refreshed first.
    pub(crate) fn acquire_write(&self, space: MemorySpace, preserve: bool) -> Result<(WriteLease, *mut u8)> {
        let mut state = self.lock_when(|s| !s.writer && s.readers == 0);
        if preserve {
            state.ensure(space)?;
        } else {
            state.prepare_discarding(space)?;
        }
        state.set_authoritative(space);
        let len_bytes = state.len_bytes;
        let ptr = state.allocation_mut(space)?.as_mut_ptr();
        state.writer = true;
        Ok((
            WriteLease {
                buffer: self.clone(),
                len_bytes,
            },
            ptr,
        ))
    }

    fn release_read(&self) {
        let mut state = self.inner.state.lock();
        state.readers = state.readers.saturating_sub(1);
        drop(state);
        self.inner.changed.notify_all();
    }

    fn release_write(&self) {
        let mut state = self.inner.state.lock();
        state.writer = false;
        drop(state);
        self.inner.changed.notify_all();
    }
}

/// Shared access token; dropping it lets writers proceed.
pub(crate) struct ReadLease {
    buffer: Buffer,
    pub(crate) len_bytes: usize,
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.buffer.release_read();
    }
}

/// Exclusive access token.
pub(crate) struct WriteLease {
    buffer: Buffer,
    pub(crate) len_bytes: usize,
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        self.buffer.release_write();
    }
}
