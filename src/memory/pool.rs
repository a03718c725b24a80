//! # Memory Pool
//!
//! The pool is the single arena every container in this crate draws from.
//! It wraps the chunk allocator with the two facilities the concurrent
//! containers need:
//!
//! - **Deferred reclamation.** Memory that may still be observed by
//!   concurrent readers (a replaced block-array spine, a swapped-out key
//!   buffer) is not freed; it is pushed onto a garbage list and released
//!   later by [`Pool::collect`], after the caller has established
//!   quiescence. The garbage list's own nodes are allocated from the pool,
//!   so `recycle` sweeps the list away together with everything else.
//!
//! - **Bulk release.** [`Pool::recycle`] returns every backing mapping to
//!   the OS in one step. A column's entire working set disappears without
//!   walking it.
//!
//! ## Generations
//!
//! `recycle` invalidates every pointer the pool ever handed out. Containers
//! record the pool generation when they are built and compare it in their
//! `Drop` impls: when the pool has been recycled underneath them, the bulk
//! release already reclaimed their memory and the per-pointer frees are
//! skipped.
//!
//! ## Thread Safety
//!
//! `alloc`, `free`, and `schedule_for_collection` are safe to call
//! concurrently. `collect`, `recycle`, and dropping the pool are not safe
//! against concurrent users of the affected memory; callers must quiesce
//! first. This is the same discipline the growth paths of the block array
//! rely on.

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use allocator_api2::alloc::{AllocError, Allocator};
use eyre::Result;
use sysinfo::System;

use super::chunk::ChunkAllocator;
pub use super::chunk::InsufficientMemory;
use crate::config::{DEFAULT_BUDGET_PERCENT, MAX_ALLOC_ALIGN, MIN_BUDGET_FLOOR};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();

#[repr(C)]
struct GarbageNode {
    next: *mut GarbageNode,
    payload: *mut u8,
}

/// Multi-producer list of retired pointers awaiting collection. Push is a
/// CAS on the head; the single consumer detaches the whole list at once.
struct GarbageList {
    head: AtomicPtr<GarbageNode>,
}

impl GarbageList {
    const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    fn push(&self, allocator: &ChunkAllocator, payload: NonNull<u8>) {
        let node = match allocator.allocate(std::mem::size_of::<GarbageNode>()) {
            Ok(p) => p.as_ptr() as *mut GarbageNode,
            // Node allocation only fails once the budget is exhausted. The
            // payload must not be freed early (readers may hold it), so it
            // stays reserved until the next recycle.
            Err(_) => return,
        };
        unsafe {
            (*node).payload = payload.as_ptr();
        }
        loop {
            let head = self.head.load(Ordering::Relaxed);
            unsafe {
                (*node).next = head;
            }
            match self.head.compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    /// Detaches the list and returns its nodes oldest-first.
    fn take_fifo(&self) -> Vec<NonNull<GarbageNode>> {
        let mut node = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut entries = Vec::new();
        while let Some(n) = NonNull::new(node) {
            entries.push(n);
            node = unsafe { n.as_ref().next };
        }
        entries.reverse();
        entries
    }

    fn forget(&self) {
        self.head.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Off-heap arena with deferred reclamation. See the module docs.
pub struct Pool {
    allocator: ChunkAllocator,
    garbage: GarbageList,
    generation: AtomicU64,
}

impl Pool {
    /// Creates an unbounded pool.
    pub fn new() -> Self {
        Self::with_budget(0)
    }

    /// Creates a pool capped at `max_bytes` reserved from the OS;
    /// 0 means unbounded.
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            allocator: ChunkAllocator::new(max_bytes),
            garbage: GarbageList::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Creates a pool budgeted at a fraction of system RAM
    /// (`DEFAULT_BUDGET_PERCENT`), never below `MIN_BUDGET_FLOOR`.
    pub fn auto_budget() -> Self {
        let total_memory = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.total_memory() as usize
        });

        let budget = (total_memory * DEFAULT_BUDGET_PERCENT) / 100;
        Self::with_budget(budget.max(MIN_BUDGET_FLOOR))
    }

    /// Byte budget; 0 means unbounded.
    pub fn budget(&self) -> usize {
        self.allocator.max_bytes()
    }

    /// Bytes currently reserved from the OS.
    pub fn reserved_bytes(&self) -> usize {
        self.allocator.reserved_bytes()
    }

    /// Bumped by every `recycle`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Allocates a zeroed region of at least `bytes` bytes, aligned to
    /// `MAX_ALLOC_ALIGN`. Fails with [`InsufficientMemory`] when the budget
    /// or the OS refuses.
    pub fn alloc(&self, bytes: usize) -> Result<NonNull<u8>> {
        self.allocator.allocate(bytes).map_err(Into::into)
    }

    /// `alloc` without the report machinery, for callers that translate
    /// exhaustion into a `false` return.
    pub fn try_alloc(&self, bytes: usize) -> Option<NonNull<u8>> {
        self.allocator.allocate(bytes).ok()
    }

    /// Returns a region to the pool.
    ///
    /// # Safety
    /// `ptr` must come from `alloc`/`try_alloc` on this pool in the current
    /// generation and must not be freed twice or used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        self.allocator.deallocate(ptr);
    }

    /// Enqueues a region for deferred release without freeing it. Safe to
    /// call concurrently with readers of that region.
    ///
    /// # Safety
    /// `ptr` must come from `alloc`/`try_alloc` on this pool in the current
    /// generation, and ownership transfers to the garbage list.
    pub unsafe fn schedule_for_collection(&self, ptr: NonNull<u8>) {
        self.garbage.push(&self.allocator, ptr);
    }

    /// Drains the garbage list, freeing each entry in FIFO order.
    ///
    /// # Safety
    /// No thread may still observe memory that was scheduled for
    /// collection; the caller must have established quiescence.
    pub unsafe fn collect(&self) {
        for node in self.garbage.take_fifo() {
            let payload = node.as_ref().payload;
            self.allocator.deallocate(NonNull::new_unchecked(payload));
            self.allocator.deallocate(node.cast());
        }
    }

    /// Clears the garbage list and returns all outstanding memory to the
    /// OS. Every pointer previously handed out becomes invalid; the pool
    /// remains usable.
    ///
    /// # Safety
    /// No thread may use any memory obtained from this pool, and all
    /// containers built on it must be idle (their `Drop` impls detect the
    /// recycle through the generation counter).
    pub unsafe fn recycle(&self) {
        self.garbage.forget();
        self.allocator.recycle();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("budget", &self.budget())
            .field("reserved", &self.reserved_bytes())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Adapter that lets `hashbrown` tables draw their storage from a [`Pool`].
///
/// Deallocation is generation-guarded: after a pool `recycle`, the table's
/// memory is already gone and the frees become no-ops.
#[derive(Clone)]
pub struct PoolAllocator {
    pool: Arc<Pool>,
    generation: u64,
}

impl PoolAllocator {
    pub fn new(pool: &Arc<Pool>) -> Self {
        Self { pool: Arc::clone(pool), generation: pool.generation() }
    }
}

unsafe impl Allocator for PoolAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            let dangling = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        if layout.align() > MAX_ALLOC_ALIGN {
            return Err(AllocError);
        }
        match self.pool.try_alloc(layout.size()) {
            Some(p) => Ok(NonNull::slice_from_raw_parts(p, layout.size())),
            None => Err(AllocError),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if self.pool.generation() == self.generation {
            self.pool.free(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed() {
        let pool = Pool::new();
        let p = pool.alloc(4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_budget_surfaces_insufficient_memory() {
        let pool = Pool::with_budget(MIN_BUDGET_FLOOR);
        let err = pool.alloc(64 * 1024 * 1024).unwrap_err();
        assert!(err.downcast_ref::<InsufficientMemory>().is_some());
    }

    #[test]
    fn test_collect_drains_fifo() {
        let pool = Pool::new();
        let a = pool.alloc(32).unwrap();
        let b = pool.alloc(32).unwrap();
        unsafe {
            pool.schedule_for_collection(a);
            pool.schedule_for_collection(b);
            pool.collect();
        }
        // Freed regions return to the 64-byte class list in FIFO free
        // order, so the most recently freed comes back first.
        let reused = pool.alloc(32).unwrap();
        assert_eq!(reused.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_recycle_bumps_generation_and_resets() {
        let pool = Pool::new();
        let _ = pool.alloc(128).unwrap();
        let gen = pool.generation();
        unsafe { pool.recycle() };
        assert_eq!(pool.generation(), gen + 1);
        assert_eq!(pool.reserved_bytes(), 0);
        assert!(pool.alloc(128).is_ok());
    }

    #[test]
    fn test_recycle_idempotent_on_empty_pool() {
        let pool = Pool::new();
        unsafe {
            pool.recycle();
            pool.recycle();
        }
        assert_eq!(pool.reserved_bytes(), 0);
    }

    #[test]
    fn test_pool_allocator_roundtrip() {
        let pool = Arc::new(Pool::new());
        let alloc = PoolAllocator::new(&pool);
        let layout = Layout::from_size_align(256, 8).unwrap();
        let p = alloc.allocate(layout).unwrap();
        unsafe { alloc.deallocate(p.cast(), layout) };
    }
}
