//! # Chunk Allocator
//!
//! This module implements the scalable block allocator underneath [`Pool`].
//! It hands out zeroed, 16-byte-aligned regions carved from anonymous memory
//! mappings, recycles freed regions through per-size-class free lists, and
//! can return every mapping to the OS in one `recycle` call.
//!
//! ## Design
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        ChunkAllocator                        |
//! |                                                              |
//! |  chunks: [ mmap 4MiB ][ mmap 4MiB ][ mmap 4MiB ] ...         |
//! |                        ^ bump cursor carves class-sized      |
//! |                          regions from the newest chunk       |
//! |                                                              |
//! |  free_lists[18]: one Vec of recycled regions per power-of-   |
//! |                  two class, 16 B .. 2 MiB                    |
//! |                                                              |
//! |  oversize: requests above 2 MiB get a dedicated mapping,     |
//! |            unmapped again on deallocate                      |
//! +--------------------------------------------------------------+
//! ```
//!
//! Every allocation is prefixed by a 16-byte [`AllocHeader`] recording its
//! size class, so `deallocate` can route the region back to the right free
//! list without a size argument. The header keeps user pointers 16-byte
//! aligned.
//!
//! ## Zero-Fill Guarantee
//!
//! Callers rely on allocations being zeroed (spine arrays are published with
//! null block slots, hash-map tables start empty). Fresh mappings are zeroed
//! by the OS; free-list reuse re-zeroes the payload before returning it.
//!
//! ## Budget Enforcement
//!
//! An optional byte budget caps the total reserved from the OS. The counter
//! is maintained with a compare-exchange loop so concurrent allocators
//! cannot overshoot; an allocation that would exceed the budget fails with
//! [`InsufficientMemory`]. Freed class regions stay reserved (they return to
//! a free list, not to the OS); only `recycle` and oversize frees release
//! reservation.
//!
//! [`Pool`]: super::Pool

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::config::{
    ALLOC_HEADER_SIZE, ALLOC_MAGIC, DEFAULT_CHUNK_SIZE, MAX_CLASS_SHIFT, MIN_CLASS_SHIFT,
    SIZE_CLASS_COUNT,
};

/// Allocation request that could not be satisfied within the pool's budget
/// (or by the OS).
#[derive(Debug, Clone, Copy)]
pub struct InsufficientMemory {
    pub requested: usize,
    pub budget: usize,
    pub reserved: usize,
}

impl std::fmt::Display for InsufficientMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.budget == 0 {
            write!(f, "insufficient memory: failed to reserve {} bytes", self.requested)
        } else {
            write!(
                f,
                "insufficient memory: requested {} bytes with {} of {} budget bytes reserved",
                self.requested, self.reserved, self.budget
            )
        }
    }
}

impl std::error::Error for InsufficientMemory {}

/// Header class index marking a dedicated oversize mapping.
const OVERSIZE_CLASS: u32 = u32::MAX;

#[repr(C)]
struct AllocHeader {
    class: u32,
    magic: u32,
    reserved: u64,
}

const _: () = assert!(std::mem::size_of::<AllocHeader>() == ALLOC_HEADER_SIZE);

/// Bump state over the newest chunk. Exhausted remainders are abandoned;
/// they stay reserved until `recycle`.
struct BumpRegion {
    cursor: *mut u8,
    end: *mut u8,
}

impl BumpRegion {
    const fn empty() -> Self {
        Self { cursor: ptr::null_mut(), end: ptr::null_mut() }
    }

    fn remaining(&self) -> usize {
        self.end as usize - self.cursor as usize
    }
}

pub(crate) struct ChunkAllocator {
    /// Byte budget; 0 means unbounded.
    max_bytes: usize,
    /// Bytes currently reserved from the OS across chunks and oversize maps.
    reserved: AtomicUsize,
    bump: Mutex<BumpRegion>,
    chunks: Mutex<Vec<MmapMut>>,
    free_lists: [Mutex<Vec<*mut u8>>; SIZE_CLASS_COUNT],
    /// Dedicated mappings keyed by user-pointer address.
    oversize: Mutex<hashbrown::HashMap<usize, MmapMut>>,
}

unsafe impl Send for ChunkAllocator {}
unsafe impl Sync for ChunkAllocator {}

impl ChunkAllocator {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            reserved: AtomicUsize::new(0),
            bump: Mutex::new(BumpRegion::empty()),
            chunks: Mutex::new(Vec::new()),
            free_lists: std::array::from_fn(|_| Mutex::new(Vec::new())),
            oversize: Mutex::new(hashbrown::HashMap::new()),
        }
    }

    pub(crate) fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub(crate) fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Returns a zeroed region of at least `bytes` bytes, aligned to
    /// `MAX_ALLOC_ALIGN`.
    pub(crate) fn allocate(&self, bytes: usize) -> Result<NonNull<u8>, InsufficientMemory> {
        let total = bytes.saturating_add(ALLOC_HEADER_SIZE);

        if total > (1 << MAX_CLASS_SHIFT) {
            return self.allocate_oversize(total);
        }

        let class = size_class_for(total);
        let class_size = class_size(class);

        if let Some(base) = self.free_lists[class].lock().pop() {
            unsafe {
                ptr::write_bytes(base.add(ALLOC_HEADER_SIZE), 0, class_size - ALLOC_HEADER_SIZE);
                return Ok(self.finish(base, class as u32));
            }
        }

        let mut bump = self.bump.lock();
        if bump.remaining() < class_size {
            let chunk_len = DEFAULT_CHUNK_SIZE;
            self.reserve(chunk_len)?;
            let chunk = match MmapMut::map_anon(chunk_len) {
                Ok(chunk) => chunk,
                Err(_) => {
                    self.release(chunk_len);
                    return Err(self.exhausted(bytes));
                }
            };
            bump.cursor = chunk.as_ptr() as *mut u8;
            bump.end = unsafe { bump.cursor.add(chunk_len) };
            self.chunks.lock().push(chunk);
        }

        let base = bump.cursor;
        bump.cursor = unsafe { base.add(class_size) };
        drop(bump);

        // Fresh chunk memory is already zeroed by the OS.
        Ok(unsafe { self.finish(base, class as u32) })
    }

    fn allocate_oversize(&self, total: usize) -> Result<NonNull<u8>, InsufficientMemory> {
        self.reserve(total)?;
        let map = match MmapMut::map_anon(total) {
            Ok(map) => map,
            Err(_) => {
                self.release(total);
                return Err(self.exhausted(total));
            }
        };
        let base = map.as_ptr() as *mut u8;
        let user = unsafe { self.finish(base, OVERSIZE_CLASS) };
        self.oversize.lock().insert(user.as_ptr() as usize, map);
        Ok(user)
    }

    /// Writes the header and produces the user pointer.
    ///
    /// # Safety
    /// `base` must address at least `ALLOC_HEADER_SIZE` writable bytes.
    unsafe fn finish(&self, base: *mut u8, class: u32) -> NonNull<u8> {
        let header = base as *mut AllocHeader;
        (*header).class = class;
        (*header).magic = ALLOC_MAGIC;
        (*header).reserved = 0;
        NonNull::new_unchecked(base.add(ALLOC_HEADER_SIZE))
    }

    /// Returns a region to its free list, or unmaps it if oversize.
    ///
    /// # Safety
    /// `user` must have been returned by `allocate` on this allocator and
    /// not freed since.
    pub(crate) unsafe fn deallocate(&self, user: NonNull<u8>) {
        let base = user.as_ptr().sub(ALLOC_HEADER_SIZE);
        let header = &*(base as *const AllocHeader);
        debug_assert_eq!(header.magic, ALLOC_MAGIC, "freed pointer lacks allocation header");

        if header.class == OVERSIZE_CLASS {
            if let Some(map) = self.oversize.lock().remove(&(user.as_ptr() as usize)) {
                self.release(map.len());
            }
            return;
        }

        let class = header.class as usize;
        debug_assert!(class < SIZE_CLASS_COUNT);
        self.free_lists[class].lock().push(base);
    }

    /// Returns every mapping to the OS. All pointers previously handed out
    /// become invalid; the allocator itself remains usable.
    pub(crate) fn recycle(&self) {
        let mut bump = self.bump.lock();
        let mut chunks = self.chunks.lock();
        let mut oversize = self.oversize.lock();
        for list in &self.free_lists {
            list.lock().clear();
        }
        *bump = BumpRegion::empty();
        chunks.clear();
        oversize.clear();
        self.reserved.store(0, Ordering::Release);
    }

    fn reserve(&self, bytes: usize) -> Result<(), InsufficientMemory> {
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            let new = current.saturating_add(bytes);
            if self.max_bytes != 0 && new > self.max_bytes {
                return Err(InsufficientMemory {
                    requested: bytes,
                    budget: self.max_bytes,
                    reserved: current,
                });
            }
            match self.reserved.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    fn release(&self, bytes: usize) {
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            let new = current.saturating_sub(bytes);
            match self.reserved.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    fn exhausted(&self, requested: usize) -> InsufficientMemory {
        InsufficientMemory {
            requested,
            budget: self.max_bytes,
            reserved: self.reserved.load(Ordering::Acquire),
        }
    }
}

#[inline]
fn size_class_for(total: usize) -> usize {
    let shift = total.next_power_of_two().trailing_zeros() as usize;
    shift.max(MIN_CLASS_SHIFT) - MIN_CLASS_SHIFT
}

#[inline]
fn class_size(class: usize) -> usize {
    1 << (class + MIN_CLASS_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_mapping() {
        assert_eq!(size_class_for(1), 0);
        assert_eq!(size_class_for(16), 0);
        assert_eq!(size_class_for(17), 1);
        assert_eq!(size_class_for(4096), 8);
        assert_eq!(class_size(size_class_for(1 << MAX_CLASS_SHIFT)), 1 << MAX_CLASS_SHIFT);
    }

    #[test]
    fn test_allocate_is_zeroed_and_aligned() {
        let alloc = ChunkAllocator::new(0);
        let p = alloc.allocate(1024).unwrap();
        assert_eq!(p.as_ptr() as usize % crate::config::MAX_ALLOC_ALIGN, 0);
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_list_reuse_is_rezeroed() {
        let alloc = ChunkAllocator::new(0);
        let p = alloc.allocate(64).unwrap();
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0xAB, 64);
            alloc.deallocate(p);
        }
        let q = alloc.allocate(64).unwrap();
        assert_eq!(q.as_ptr(), p.as_ptr(), "same class should reuse the freed region");
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_budget_exhaustion() {
        let alloc = ChunkAllocator::new(DEFAULT_CHUNK_SIZE);
        assert!(alloc.allocate(1024).is_ok());
        let err = alloc.allocate(8 * 1024 * 1024).unwrap_err();
        assert_eq!(err.budget, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_oversize_roundtrip_releases_budget() {
        let alloc = ChunkAllocator::new(64 * 1024 * 1024);
        let big = 8 * 1024 * 1024;
        let p = alloc.allocate(big).unwrap();
        assert!(alloc.reserved_bytes() >= big);
        unsafe { alloc.deallocate(p) };
        assert!(alloc.reserved_bytes() < big);
    }

    #[test]
    fn test_recycle_resets_reservation() {
        let alloc = ChunkAllocator::new(0);
        let _ = alloc.allocate(100).unwrap();
        assert!(alloc.reserved_bytes() > 0);
        alloc.recycle();
        assert_eq!(alloc.reserved_bytes(), 0);
        assert!(alloc.allocate(100).is_ok(), "allocator must remain usable after recycle");
    }
}
