//! # Block Pools
//!
//! Generation-checked arenas for the shared ABI blocks.
//!
//! Blocks are carved out of chunks that are never moved nor freed while the
//! pool lives, so a block can be referenced across threads (and, through its
//! handle, across processes) without pointer arithmetic. Each slot carries a
//! generation that is bumped when the block is freed: handles are
//! `(index, generation)` pairs and a stale handle simply fails to resolve.
//!
//! The first chunk holds a page worth of blocks and every following chunk
//! doubles in size. If a large chunk cannot be allocated the pool falls back
//! to the minimum size before reporting exhaustion.

use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::Handle;

/// Bytes covered by the first chunk
const MIN_CHUNK_BYTES: usize = 4096;

/// A block that can live in a [`BlockPool`]
pub trait PoolBlock: Default + Send + Sync + 'static {
    /// Return the block to its freshly constructed state
    fn reset(&self);
}

#[derive(Default)]
struct Slot<T> {
    generation: AtomicU32,
    live: AtomicBool,
    block: T,
}

struct Chunk<T> {
    first: u32,
    slots: Box<[Slot<T>]>,
}

struct PoolState<T> {
    chunks: Vec<Chunk<T>>,
    free: Vec<u32>,
    next_chunk: usize,
    capacity: u32,
    live: usize,
}

impl<T> PoolState<T> {
    fn slot(&self, index: u32) -> Option<&Slot<T>> {
        let pos = self.chunks.partition_point(|c| c.first <= index);
        let chunk = self.chunks.get(pos.checked_sub(1)?)?;
        chunk.slots.get((index - chunk.first) as usize)
    }
}

/// Arena of shared blocks
pub struct BlockPool<T: PoolBlock> {
    state: spin::Mutex<PoolState<T>>,
    min_chunk: usize,
}

impl<T: PoolBlock> BlockPool<T> {
    /// Create an empty pool
    pub fn new() -> Arc<Self> {
        let min_chunk = (MIN_CHUNK_BYTES / core::mem::size_of::<Slot<T>>()).max(1);
        Arc::new(Self {
            state: spin::Mutex::new(PoolState {
                chunks: Vec::new(),
                free: Vec::new(),
                next_chunk: min_chunk,
                capacity: 0,
                live: 0,
            }),
            min_chunk,
        })
    }

    fn try_chunk(len: usize) -> Option<Box<[Slot<T>]>> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(len).ok()?;
        slots.extend((0..len).map(|_| Slot {
            generation: AtomicU32::new(1),
            ..Slot::default()
        }));
        Some(slots.into_boxed_slice())
    }

    fn grow(&self, state: &mut PoolState<T>) -> Result<()> {
        let room = (u32::MAX - state.capacity) as usize;
        if room == 0 {
            return Err(Error::OutOfResources);
        }

        let wanted = state.next_chunk.min(room);
        let slots = match Self::try_chunk(wanted) {
            Some(slots) => slots,
            None => {
                state.next_chunk = self.min_chunk;
                Self::try_chunk(self.min_chunk.min(room)).ok_or(Error::OutOfResources)?
            },
        };

        let first = state.capacity;
        let len = slots.len() as u32;
        state.chunks.push(Chunk { first, slots });
        state.free.extend((first..first + len).rev());
        state.capacity += len;
        state.next_chunk = (len as usize).saturating_mul(2);
        Ok(())
    }

    /// Allocate a reset block
    pub fn alloc(self: &Arc<Self>) -> Result<BlockRef<T>> {
        let mut state = self.state.lock();
        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let index = state.free.pop().ok_or(Error::OutOfResources)?;
        let slot = state.slot(index).ok_or(Error::OutOfResources)?;

        slot.live.store(true, Ordering::Release);
        let handle = Handle::<T>::from_parts(index, slot.generation.load(Ordering::Acquire)).raw();
        let slot = NonNull::from(slot);
        state.live += 1;

        Ok(BlockRef {
            pool: Arc::clone(self),
            slot,
            handle,
        })
    }

    /// Resolve a live block by handle
    pub fn lookup(self: &Arc<Self>, raw: u64) -> Option<BlockRef<T>> {
        let handle = Handle::<T>::from_raw(raw);
        let state = self.state.lock();
        let slot = state.slot(handle.index())?;
        let current = slot.live.load(Ordering::Acquire)
            && slot.generation.load(Ordering::Acquire) == handle.generation();

        current.then(|| BlockRef {
            pool: Arc::clone(self),
            slot: NonNull::from(slot),
            handle: raw,
        })
    }

    /// Return a block to the pool, invalidating its handle
    ///
    /// Returns false if the handle was already stale.
    pub fn free(&self, raw: u64) -> bool {
        let handle = Handle::<T>::from_raw(raw);
        let mut state = self.state.lock();
        let Some(slot) = state.slot(handle.index()) else {
            return false;
        };
        if !slot.live.load(Ordering::Acquire)
            || slot.generation.load(Ordering::Acquire) != handle.generation()
        {
            return false;
        }

        slot.block.reset();
        slot.live.store(false, Ordering::Release);
        let next = match handle.generation().wrapping_add(1) {
            0 => 1,
            g => g,
        };
        slot.generation.store(next, Ordering::Release);

        state.free.push(handle.index());
        state.live -= 1;
        true
    }

    /// Blocks currently allocated
    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    /// Blocks the pool can hand out without growing
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity as usize
    }
}

impl<T: PoolBlock> Drop for BlockPool<T> {
    fn drop(&mut self) {
        let live = self.state.get_mut().live;
        if live != 0 {
            log::warn!(
                "{} {} block(s) still allocated at pool teardown",
                live,
                core::any::type_name::<T>()
            );
        }
    }
}

impl<T: PoolBlock> fmt::Debug for BlockPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockPool")
            .field("live", &state.live)
            .field("capacity", &state.capacity)
            .finish()
    }
}

// =============================================================================
// BLOCK REFERENCE
// =============================================================================

/// A reference to a pooled block, keeping its pool alive
pub struct BlockRef<T: PoolBlock> {
    pool: Arc<BlockPool<T>>,
    slot: NonNull<Slot<T>>,
    handle: u64,
}

// SAFETY: the referenced slot is only accessed through `&T`, and `T` is Sync.
unsafe impl<T: PoolBlock> Send for BlockRef<T> {}
// SAFETY: see above.
unsafe impl<T: PoolBlock> Sync for BlockRef<T> {}

impl<T: PoolBlock> BlockRef<T> {
    /// Raw handle of the block
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Pool the block belongs to
    pub fn pool(&self) -> &Arc<BlockPool<T>> {
        &self.pool
    }

    /// Whether the handle still names this slot
    pub fn is_current(&self) -> bool {
        // SAFETY: see Deref
        let slot = unsafe { self.slot.as_ref() };
        slot.live.load(Ordering::Acquire)
            && slot.generation.load(Ordering::Acquire) == Handle::<T>::from_raw(self.handle).generation()
    }

    /// Free the block back to its pool
    pub fn free(&self) -> bool {
        self.pool.free(self.handle)
    }
}

impl<T: PoolBlock> Deref for BlockRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: chunks are neither moved nor freed before the pool drops,
        // and `self.pool` keeps the pool alive.
        unsafe { &self.slot.as_ref().block }
    }
}

impl<T: PoolBlock> Clone for BlockRef<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            slot: self.slot,
            handle: self.handle,
        }
    }
}

impl<T: PoolBlock> fmt::Debug for BlockRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = Handle::<T>::from_raw(self.handle);
        write!(f, "BlockRef({}:{})", handle.index(), handle.generation())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::SharedSignal;

    #[test]
    fn test_alloc_lookup_free() {
        let pool = BlockPool::<SharedSignal>::new();
        let block = pool.alloc().unwrap();
        assert_eq!(pool.live(), 1);
        assert_eq!(pool.capacity(), 4096 / core::mem::size_of::<Slot<SharedSignal>>());

        let again = pool.lookup(block.handle()).unwrap();
        assert_eq!(again.handle(), block.handle());

        assert!(pool.free(block.handle()));
        assert!(!pool.free(block.handle()));
        assert!(pool.lookup(block.handle()).is_none());
        assert!(!block.is_current());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let pool = BlockPool::<SharedSignal>::new();
        let first = pool.alloc().unwrap();
        let first_handle = Handle::<SharedSignal>::from_raw(first.handle());
        first.value.store(7, Ordering::Relaxed);
        first.free();

        let second = pool.alloc().unwrap();
        let second_handle = Handle::<SharedSignal>::from_raw(second.handle());
        assert_eq!(second_handle.index(), first_handle.index());
        assert_eq!(second_handle.generation(), first_handle.generation() + 1);
        assert_eq!(second.value(), 0);
        assert!(pool.lookup(first.handle()).is_none());
    }

    #[test]
    fn test_growth_doubles_chunks() {
        let pool = BlockPool::<SharedSignal>::new();
        let min = pool.state.lock().next_chunk;
        let blocks: Vec<_> = (0..min + 1).map(|_| pool.alloc().unwrap()).collect();
        assert_eq!(pool.capacity(), min * 3);

        let last = blocks.last().unwrap();
        assert!(pool.lookup(last.handle()).is_some());
        for block in &blocks {
            block.free();
        }
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_null_handle_never_resolves() {
        let pool = BlockPool::<SharedSignal>::new();
        let _block = pool.alloc().unwrap();
        assert!(pool.lookup(0).is_none());
    }
}
