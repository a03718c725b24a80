//! # Expandable Block Array
//!
//! A two-level, pool-allocated array: a *spine* of block pointers indexes
//! fixed-size *blocks* of elements. Readers index the array without taking
//! any lock; a single writer at a time grows it under a mutex.
//!
//! ```text
//!            spine (AtomicPtr per slot, grown in BLOCKS_GROWTH steps)
//!            +-------+-------+-------+-------+----//----+
//!            | blk 0 | blk 1 | blk 2 | null  |          |
//!            +---+---+---+---+---+---+-------+----//----+
//!                |       |       |
//!                v       v       v
//!            [ elements_per_block items each, pool-allocated, zeroed ]
//! ```
//!
//! ## Growth Protocol
//!
//! 1. Double-checked fast path: no lock when capacity already suffices.
//! 2. Under the growth mutex, a too-small spine is replaced: a larger spine
//!    is allocated, existing block pointers are copied across, the new
//!    spine is published, and the old one is *scheduled for collection*,
//!    never freed in place, because a reader may have loaded it already.
//! 3. Missing blocks are allocated and stored into spine slots; a slot goes
//!    null → non-null at most once in the array's lifetime.
//! 4. A full fence precedes the publication of the new block count, so a
//!    reader that observes the count also observes the populated slots.
//!
//! On allocation failure mid-growth the count of successfully initialized
//! blocks is published and the call reports `false`; the array stays
//! consistent at the reduced capacity.
//!
//! ## Reader Guarantees
//!
//! `reference(i)` is wait-free: two acquire loads and pointer arithmetic.
//! Block pointers are reused across spine replacements, so a reference
//! obtained before a growth remains valid after it (until the pool is
//! recycled or the array is dropped). Indexing past the observed capacity
//! is undefined, which is why `reference` is `unsafe` while `get`/`set`
//! assert bounds.

use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, Result};
use parking_lot::Mutex;

use crate::memory::Pool;

/// Element types storable in a [`BlockArray`].
///
/// # Safety
/// Implementors must be plain data: the all-zero bit pattern is a valid
/// value (blocks come back zeroed from the pool), and values may be read
/// and written through shared raw pointers from any thread.
pub unsafe trait BlockItem: Copy + 'static {}

macro_rules! plain_block_items {
    ($($ty:ty),+ $(,)?) => {
        $( unsafe impl BlockItem for $ty {} )+
    };
}

plain_block_items!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64, usize, isize);

// Key-array slots: null is the vacant state.
unsafe impl BlockItem for *mut u8 {}

/// Spine bookkeeping only touched under the growth mutex.
struct SpineState {
    spine_capacity: usize,
}

/// Growable, concurrently-readable array of fixed-size blocks. See the
/// module docs for the growth protocol.
pub struct BlockArray<T: BlockItem> {
    pool: Arc<Pool>,
    generation: u64,
    elements_per_block: usize,
    blocks_growth: usize,
    spine: AtomicPtr<AtomicPtr<T>>,
    block_count: AtomicUsize,
    grow_lock: Mutex<SpineState>,
}

unsafe impl<T: BlockItem> Send for BlockArray<T> {}
unsafe impl<T: BlockItem> Sync for BlockArray<T> {}

impl<T: BlockItem> BlockArray<T> {
    /// Creates an empty array drawing from `pool`. `elements_per_block`
    /// fixes the block granularity; the spine grows in `blocks_growth`
    /// slot steps.
    pub fn new(pool: Arc<Pool>, elements_per_block: usize, blocks_growth: usize) -> Self {
        assert!(elements_per_block > 0, "elements_per_block must be positive");
        assert!(blocks_growth > 0, "blocks_growth must be positive");
        let generation = pool.generation();
        Self {
            pool,
            generation,
            elements_per_block,
            blocks_growth,
            spine: AtomicPtr::new(ptr::null_mut()),
            block_count: AtomicUsize::new(0),
            grow_lock: Mutex::new(SpineState { spine_capacity: 0 }),
        }
    }

    /// Currently populated element capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.block_count.load(Ordering::Acquire) * self.elements_per_block
    }

    #[inline]
    pub fn elements_per_block(&self) -> usize {
        self.elements_per_block
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Grows populated capacity to at least `new_capacity` elements.
    ///
    /// `timeout` bounds the wait for the growth lock: `None` waits forever,
    /// `Some(Duration::ZERO)` makes a single attempt. Returns `Ok(false)`
    /// when the lock could not be taken in time or the pool could not
    /// supply the memory; partial progress is published either way.
    pub fn try_ensure_capacity(
        &self,
        new_capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        if self.capacity() >= new_capacity {
            return Ok(true);
        }

        let mut state = match timeout {
            None => self.grow_lock.lock(),
            Some(wait) => match self.grow_lock.try_lock_for(wait) {
                Some(guard) => guard,
                None => return Ok(false),
            },
        };

        if self.capacity() >= new_capacity {
            return Ok(true);
        }

        // Round the request up to the configured granularities; the result
        // may exceed what this request strictly needs.
        let requested_blocks = 1 + new_capacity / self.elements_per_block;
        let new_spine_capacity = (1 + new_capacity / (self.elements_per_block * self.blocks_growth))
            * self.blocks_growth;

        if state.spine_capacity < new_spine_capacity {
            if !self.grow_spine(&mut state, new_spine_capacity) {
                return Ok(false);
            }
        }

        let spine = self.spine.load(Ordering::Relaxed);
        for ix in self.block_count.load(Ordering::Relaxed)..requested_blocks {
            let bytes = self.elements_per_block * std::mem::size_of::<T>();
            match self.pool.try_alloc(bytes.max(1)) {
                Some(block) => unsafe {
                    (*spine.add(ix)).store(block.as_ptr() as *mut T, Ordering::Release);
                },
                None => {
                    fence(Ordering::SeqCst);
                    self.block_count.store(ix, Ordering::Release);
                    return Ok(false);
                }
            }
        }

        fence(Ordering::SeqCst);
        self.block_count.store(requested_blocks, Ordering::Release);
        Ok(true)
    }

    /// Blocking convenience over [`Self::try_ensure_capacity`]; converts a
    /// failed grow into an error.
    pub fn ensure_capacity(&self, new_capacity: usize) -> Result<()> {
        if !self.try_ensure_capacity(new_capacity, None)? {
            bail!("failed to ensure capacity for {new_capacity} elements");
        }
        Ok(())
    }

    /// Replaces the spine with one of `new_spine_capacity` slots, retiring
    /// the old spine through the pool's garbage list.
    fn grow_spine(&self, state: &mut SpineState, new_spine_capacity: usize) -> bool {
        let bytes = new_spine_capacity * std::mem::size_of::<AtomicPtr<T>>();
        let new_spine = match self.pool.try_alloc(bytes) {
            Some(p) => p.as_ptr() as *mut AtomicPtr<T>,
            None => return false,
        };

        let old_spine = self.spine.load(Ordering::Relaxed);
        for ix in 0..state.spine_capacity {
            unsafe {
                let block = (*old_spine.add(ix)).load(Ordering::Relaxed);
                (*new_spine.add(ix)).store(block, Ordering::Relaxed);
            }
        }

        self.spine.store(new_spine, Ordering::Release);

        // Readers may still hold the old spine pointer; release it only
        // after a quiescent point.
        if let Some(old) = ptr::NonNull::new(old_spine) {
            unsafe { self.pool.schedule_for_collection(old.cast()) };
        }

        fence(Ordering::SeqCst);
        state.spine_capacity = new_spine_capacity;
        true
    }

    /// Pointer to element `index`, stable until the pool is recycled or
    /// the array is dropped.
    ///
    /// # Safety
    /// `index` must be below a capacity the caller has observed via
    /// [`Self::capacity`] or a successful [`Self::try_ensure_capacity`].
    #[inline]
    pub unsafe fn reference(&self, index: usize) -> *mut T {
        let spine = self.spine.load(Ordering::Acquire);
        let slot = &*spine.add(index / self.elements_per_block);
        let block = slot.load(Ordering::Acquire);
        block.add(index % self.elements_per_block)
    }

    /// Reads element `index`. Panics when `index` is out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.capacity(), "index {index} out of bounds");
        unsafe { *self.reference(index) }
    }

    /// Writes element `index`. Panics when `index` is out of bounds.
    #[inline]
    pub fn set(&self, index: usize, value: T) {
        assert!(index < self.capacity(), "index {index} out of bounds");
        unsafe { *self.reference(index) = value };
    }
}

impl<T: BlockItem> Drop for BlockArray<T> {
    fn drop(&mut self) {
        // After a pool recycle the bulk release already reclaimed the
        // blocks and the spine; freeing the stale pointers would corrupt
        // the new generation's memory.
        if self.pool.generation() != self.generation {
            return;
        }

        let spine = self.spine.load(Ordering::Acquire);
        if spine.is_null() {
            return;
        }

        let spine_capacity = self.grow_lock.get_mut().spine_capacity;
        for ix in 0..spine_capacity {
            unsafe {
                let block = (*spine.add(ix)).load(Ordering::Relaxed);
                if let Some(block) = ptr::NonNull::new(block) {
                    self.pool.free(block.cast());
                }
            }
        }
        unsafe {
            self.pool.free(ptr::NonNull::new_unchecked(spine).cast());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_of_u32() -> BlockArray<u32> {
        BlockArray::new(Arc::new(Pool::new()), 65536, 64)
    }

    #[test]
    fn test_zero_capacity_request_is_noop() {
        let array = array_of_u32();
        assert!(array.try_ensure_capacity(0, Some(Duration::ZERO)).unwrap());
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn test_growth_granularity() {
        let array = array_of_u32();
        assert!(array.try_ensure_capacity(1, None).unwrap());
        assert_eq!(array.capacity(), 65536);

        assert!(array.try_ensure_capacity(65537, None).unwrap());
        assert_eq!(array.capacity(), 131072);
    }

    #[test]
    fn test_first_and_last_elements_writable() {
        let array = array_of_u32();
        array.ensure_capacity(65537).unwrap();
        let last = array.capacity() - 1;
        array.set(0, 0xDEAD_BEEF);
        array.set(last, 0xFEED_FACE);
        assert_eq!(array.get(0), 0xDEAD_BEEF);
        assert_eq!(array.get(last), 0xFEED_FACE);
    }

    #[test]
    fn test_blocks_are_zeroed() {
        let array = array_of_u32();
        array.ensure_capacity(100).unwrap();
        for ix in 0..100 {
            assert_eq!(array.get(ix), 0);
        }
    }

    #[test]
    fn test_reference_stable_across_spine_growth() {
        let pool = Arc::new(Pool::new());
        let array: BlockArray<u64> = BlockArray::new(Arc::clone(&pool), 16, 2);
        array.ensure_capacity(1).unwrap();
        let before = unsafe { array.reference(0) };
        array.set(0, 42);

        // Push the spine past its initial 2-slot granularity.
        array.ensure_capacity(16 * 64).unwrap();
        let after = unsafe { array.reference(0) };
        assert_eq!(before, after, "block pointers must survive spine replacement");
        assert_eq!(array.get(0), 42);
    }

    #[test]
    fn test_partial_growth_on_exhaustion() {
        // Budget fits the spine and some blocks, but not 64 MiB of them.
        let pool = Arc::new(Pool::with_budget(crate::config::MIN_BUDGET_FLOOR));
        let array: BlockArray<u64> = BlockArray::new(pool, 65536, 64);
        let grown = array.try_ensure_capacity(128 * 65536, None).unwrap();
        assert!(!grown);
        let capacity = array.capacity();
        assert!(capacity < 128 * 65536);
        assert_eq!(capacity % 65536, 0, "partial capacity covers whole blocks");
        if capacity > 0 {
            array.set(capacity - 1, 7);
            assert_eq!(array.get(capacity - 1), 7);
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_get_panics() {
        let array = array_of_u32();
        array.get(0);
    }
}
