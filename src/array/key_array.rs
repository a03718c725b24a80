//! # Key Array
//!
//! A growable parallel array of length-prefixed byte keys. Each slot holds
//! either null or a pointer to a pool-allocated buffer whose first byte is
//! the content length `L` (1..=254) followed by `L` content bytes.
//!
//! ## Install Protocol
//!
//! `try_set_at` copies the candidate into a fresh pool buffer and installs
//! it with a single compare-exchange against the slot's pre-read value:
//!
//! - CAS lost (another writer replaced the slot first): the candidate
//!   buffer is freed and the call reports `false`.
//! - CAS won: the previous buffer, if any, is scheduled for deferred
//!   collection, since a concurrent reader may still hold it.
//!
//! Readers (`get_at`) load the slot with no synchronization and may observe
//! null or any fully installed buffer. Returned pointers stay valid until
//! the pool collects the retired buffer or is recycled.
//!
//! ## Serialization
//!
//! A companion bit vector selects which slots participate. Each selected
//! slot writes one length byte (`0` encodes null) followed by the content
//! bytes; deserialization requires an empty array and reads the same shape.

use std::io::{Read, Write};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::bit_vector::BitVector;
use super::block_array::BlockArray;
use crate::config::{BLOCKS_GROWTH, KEY_ITEMS_PER_BLOCK, MAX_KEY_CONTENT_LEN};
use crate::memory::Pool;

pub struct KeyArray {
    array: BlockArray<*mut u8>,
    pool: Arc<Pool>,
    generation: u64,
}

impl KeyArray {
    pub fn new(pool: &Arc<Pool>) -> Self {
        Self {
            array: BlockArray::new(Arc::clone(pool), KEY_ITEMS_PER_BLOCK, BLOCKS_GROWTH),
            pool: Arc::clone(pool),
            generation: pool.generation(),
        }
    }

    /// Copy construction: installs every non-null slot of `src` into a new
    /// array on `pool`.
    pub fn duplicate(src: &KeyArray, pool: &Arc<Pool>) -> Result<Self> {
        let array = Self::new(pool);
        let capacity = src.capacity();
        array.ensure_capacity(capacity)?;
        for ix in 0..capacity {
            if let Some(key) = src.get_at(ix)? {
                let data = unsafe { prefixed_slice(key) };
                if !array.try_set_at(ix, Some(data))? {
                    bail!("could not copy element at {ix}");
                }
            }
        }
        Ok(array)
    }

    /// Capacity in slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.array.capacity()
    }

    pub fn try_ensure_capacity(&self, slots: usize, timeout: Option<Duration>) -> Result<bool> {
        if slots == 0 {
            return Ok(true);
        }
        self.array.try_ensure_capacity(slots, timeout)
    }

    pub fn ensure_capacity(&self, slots: usize) -> Result<()> {
        if !self.try_ensure_capacity(slots, None)? {
            bail!("failed to ensure capacity for {slots} slots");
        }
        Ok(())
    }

    #[inline]
    fn slot(&self, index: usize) -> &AtomicPtr<u8> {
        unsafe { AtomicPtr::from_ptr(self.array.reference(index)) }
    }

    /// Installs `data` (a length-prefixed buffer, or `None` for a null
    /// slot) at `index`. Returns `Ok(false)` when another writer won the
    /// slot or the pool is exhausted.
    pub fn try_set_at(&self, index: usize, data: Option<&[u8]>) -> Result<bool> {
        ensure!(
            index < self.capacity(),
            "index {index} must be less than allocated capacity"
        );

        let candidate = match data {
            Some(data) => {
                ensure!(
                    data.len() >= 2,
                    "key must have at least one byte for size, plus one byte for content"
                );
                let content_len = data[0] as usize;
                ensure!(content_len > 0, "key length prefix byte must be positive");
                ensure!(
                    content_len <= MAX_KEY_CONTENT_LEN,
                    "key length prefix {content_len} exceeds maximum {MAX_KEY_CONTENT_LEN}"
                );
                ensure!(
                    content_len < data.len(),
                    "key length prefix {content_len} must be less than buffer length {}",
                    data.len()
                );

                let buffer = match self.pool.try_alloc(content_len + 1) {
                    Some(p) => p.as_ptr(),
                    None => return Ok(false),
                };
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, content_len + 1);
                }
                buffer
            }
            None => std::ptr::null_mut(),
        };

        let slot = self.slot(index);
        let prev = slot.load(Ordering::Acquire);
        if slot.compare_exchange(prev, candidate, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // Somebody else just updated the same slot; discard our work.
            if let Some(candidate) = NonNull::new(candidate) {
                unsafe { self.pool.free(candidate) };
            }
            return Ok(false);
        }

        if let Some(prev) = NonNull::new(prev) {
            unsafe { self.pool.schedule_for_collection(prev) };
        }
        Ok(true)
    }

    /// Current buffer pointer at `index`, or `None` for an empty slot.
    /// Wait-free; the buffer stays valid until the pool collects a
    /// replacement or is recycled.
    pub fn get_at(&self, index: usize) -> Result<Option<NonNull<u8>>> {
        ensure!(
            index < self.capacity(),
            "index {index} must be less than allocated capacity"
        );
        Ok(NonNull::new(self.slot(index).load(Ordering::Acquire)))
    }

    /// Copies the prefixed buffer at `index` into `out`; returns the number
    /// of bytes copied (`L + 1`).
    pub fn copy_key_at(&self, index: usize, out: &mut [u8]) -> Result<usize> {
        let Some(key) = self.get_at(index)? else {
            bail!("slot {index} is empty");
        };
        let data = unsafe { prefixed_slice(key) };
        ensure!(out.len() >= data.len(), "buffer is too small, must have {}", data.len());
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Writes the slots of `[0, count)` selected by `valid_entries`: one
    /// length byte (0 = null slot) then the content bytes.
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        count: usize,
        valid_entries: &BitVector,
    ) -> Result<()> {
        ensure!(count <= self.capacity(), "count to write is larger than capacity: {count}");

        for ix in 0..count {
            if !valid_entries.get(ix) {
                continue;
            }
            match self.get_at(ix)? {
                Some(key) => {
                    let data = unsafe { prefixed_slice(key) };
                    let staged: SmallVec<[u8; 256]> = SmallVec::from_slice(data);
                    writer.write_all(&staged)?;
                }
                None => writer.write_all(&[0])?,
            }
        }
        Ok(())
    }

    /// Reads the shape written by [`Self::write_to`] into an empty array.
    pub fn read_from<R: Read>(
        &self,
        reader: &mut R,
        count: usize,
        valid_entries: &BitVector,
    ) -> Result<()> {
        ensure!(self.capacity() == 0, "cannot perform read on a non-empty container");
        self.ensure_capacity(count)?;

        let mut staged: SmallVec<[u8; 256]> = SmallVec::new();
        for ix in 0..count {
            if !valid_entries.get(ix) {
                continue;
            }

            let mut prefix = [0u8; 1];
            reader.read_exact(&mut prefix)?;
            let content_len = prefix[0] as usize;

            let installed = if content_len == 0 {
                self.try_set_at(ix, None)?
            } else {
                staged.clear();
                staged.resize(content_len + 1, 0);
                staged[0] = prefix[0];
                reader.read_exact(&mut staged[1..])?;
                self.try_set_at(ix, Some(&staged))?
            };

            ensure!(installed, "failed to append new value at {ix}");
        }
        Ok(())
    }
}

unsafe impl Send for KeyArray {}
unsafe impl Sync for KeyArray {}

impl Drop for KeyArray {
    fn drop(&mut self) {
        if self.pool.generation() != self.generation {
            return;
        }
        for ix in 0..self.array.capacity() {
            let ptr = self.slot(ix).load(Ordering::Relaxed);
            if let Some(ptr) = NonNull::new(ptr) {
                unsafe { self.pool.free(ptr) };
            }
        }
        // The backing block array frees its own blocks and spine.
    }
}

/// Reborrows a length-prefixed buffer as a slice covering prefix + content.
///
/// # Safety
/// `key` must point at a valid length-prefixed buffer of `key[0] + 1`
/// readable bytes.
unsafe fn prefixed_slice<'a>(key: NonNull<u8>) -> &'a [u8] {
    let len = *key.as_ptr() as usize;
    std::slice::from_raw_parts(key.as_ptr(), len + 1)
}
