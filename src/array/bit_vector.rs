//! # Bit Vector
//!
//! A growable bitmap over a [`BlockArray`] of bytes, used by the typed
//! column stores for null tracking. Bit `i` lives in byte `i / 8`, at bit
//! position `i % 8` (LSB-first), which is also the serialized layout.
//!
//! Two disciplines are offered per bit:
//!
//! - **Scalar** (`get`/`set`/`clear`/`set_group`): plain read-modify-write
//!   on the enclosing byte, no synchronization.
//! - **Atomic** (`safe_set`/`safe_clear`/`safe_get_and_set`/
//!   `safe_get_and_clear`): a compare-exchange loop on the enclosing byte.
//!
//! The two do not linearize against each other; callers must pick one
//! discipline per byte range. `change_all` belongs to the scalar side.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, ensure, Result};

use super::block_array::BlockArray;
use crate::config::{BIT_ITEMS_PER_BLOCK, BITS_PER_ITEM, BLOCKS_GROWTH};
use crate::memory::Pool;

pub struct BitVector {
    array: BlockArray<u8>,
}

impl BitVector {
    pub fn new(pool: &Arc<Pool>) -> Self {
        Self { array: BlockArray::new(Arc::clone(pool), BIT_ITEMS_PER_BLOCK, BLOCKS_GROWTH) }
    }

    /// Copy construction: a new vector on `pool` with the same bits set.
    pub fn duplicate(src: &BitVector, pool: &Arc<Pool>) -> Result<Self> {
        let vector = Self::new(pool);
        let capacity = src.capacity();
        vector.ensure_capacity(capacity)?;
        for ix in 0..capacity {
            if src.get(ix) {
                vector.set(ix);
            }
        }
        Ok(vector)
    }

    /// Capacity in bits.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.array.capacity() * BITS_PER_ITEM
    }

    pub fn try_ensure_capacity(&self, bits: usize, timeout: Option<Duration>) -> Result<bool> {
        if bits == 0 {
            return Ok(true);
        }
        self.array.try_ensure_capacity(1 + bits / BITS_PER_ITEM, timeout)
    }

    pub fn ensure_capacity(&self, bits: usize) -> Result<()> {
        if !self.try_ensure_capacity(bits, None)? {
            bail!("failed to ensure capacity for {bits} bits");
        }
        Ok(())
    }

    #[inline]
    fn byte_ptr(&self, index: usize) -> *mut u8 {
        assert!(index < self.capacity(), "bit index {index} out of bounds");
        unsafe { self.array.reference(index / BITS_PER_ITEM) }
    }

    #[inline]
    fn mask(index: usize) -> u8 {
        1u8 << (index % BITS_PER_ITEM)
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        unsafe { *self.byte_ptr(index) & Self::mask(index) != 0 }
    }

    #[inline]
    pub fn set(&self, index: usize) {
        unsafe { *self.byte_ptr(index) |= Self::mask(index) };
    }

    #[inline]
    pub fn clear(&self, index: usize) {
        unsafe { *self.byte_ptr(index) &= !Self::mask(index) };
    }

    /// The byte holding bit `index`.
    #[inline]
    pub fn get_group(&self, index: usize) -> u8 {
        unsafe { *self.byte_ptr(index) }
    }

    /// Overwrites the byte holding bit `index`.
    #[inline]
    pub fn set_group(&self, index: usize, group: u8) {
        unsafe { *self.byte_ptr(index) = group };
    }

    #[inline]
    fn atomic_byte(&self, index: usize) -> &AtomicU8 {
        unsafe { AtomicU8::from_ptr(self.byte_ptr(index)) }
    }

    /// CAS loop applying `op` to the enclosing byte; returns the byte value
    /// observed before the successful exchange.
    #[inline]
    fn update_byte(&self, index: usize, op: impl Fn(u8) -> u8) -> u8 {
        let byte = self.atomic_byte(index);
        let mut old = byte.load(Ordering::Relaxed);
        loop {
            match byte.compare_exchange_weak(old, op(old), Ordering::AcqRel, Ordering::Acquire) {
                Ok(prev) => return prev,
                Err(observed) => old = observed,
            }
        }
    }

    pub fn safe_set(&self, index: usize) {
        let mask = Self::mask(index);
        self.update_byte(index, |old| old | mask);
    }

    pub fn safe_clear(&self, index: usize) {
        let mask = Self::mask(index);
        self.update_byte(index, |old| old & !mask);
    }

    /// Sets the bit; returns whether it was already set.
    pub fn safe_get_and_set(&self, index: usize) -> bool {
        let mask = Self::mask(index);
        self.update_byte(index, |old| old | mask) & mask != 0
    }

    /// Clears the bit; returns whether it was set.
    pub fn safe_get_and_clear(&self, index: usize) -> bool {
        let mask = Self::mask(index);
        self.update_byte(index, |old| old & !mask) & mask != 0
    }

    /// Fills every populated byte with all-ones or all-zeros. Not safe
    /// against concurrent `safe_*` writers.
    pub fn change_all(&self, value: bool) {
        let fill = if value { 0xFF } else { 0x00 };
        let items = self.array.capacity();
        let mut ix = 0;
        while ix < items {
            unsafe {
                std::ptr::write_bytes(self.array.reference(ix), fill, BIT_ITEMS_PER_BLOCK);
            }
            ix += BIT_ITEMS_PER_BLOCK;
        }
    }

    /// Writes `count` bits as `ceil(count / 8)` bytes, LSB-first within
    /// each byte.
    pub fn write_to<W: Write>(&self, writer: &mut W, count: usize) -> Result<()> {
        ensure!(
            count <= self.capacity(),
            "count to write is larger than capacity: {count}"
        );
        let mut bytes = Vec::with_capacity(count.div_ceil(BITS_PER_ITEM));
        let mut ix = 0;
        while ix < count {
            bytes.push(self.get_group(ix));
            ix += BITS_PER_ITEM;
        }
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Reads `count` bits previously written by [`Self::write_to`]. The
    /// vector must be empty; capacity is grown to cover `count` first.
    pub fn read_from<R: Read>(&self, reader: &mut R, count: usize) -> Result<()> {
        ensure!(self.capacity() == 0, "cannot perform read on a non-empty container");
        if count == 0 {
            return Ok(());
        }
        self.ensure_capacity(count)?;
        let mut bytes = vec![0u8; count.div_ceil(BITS_PER_ITEM)];
        reader.read_exact(&mut bytes)?;
        for (offset, group) in bytes.into_iter().enumerate() {
            self.set_group(offset * BITS_PER_ITEM, group);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector() -> BitVector {
        BitVector::new(&Arc::new(Pool::new()))
    }

    #[test]
    fn test_set_get_clear() {
        let v = vector();
        v.ensure_capacity(100).unwrap();
        assert!(!v.get(42));
        v.set(42);
        assert!(v.get(42));
        assert!(!v.get(41));
        assert!(!v.get(43));
        v.clear(42);
        assert!(!v.get(42));
    }

    #[test]
    fn test_safe_ops_roundtrip() {
        let v = vector();
        v.ensure_capacity(64).unwrap();
        v.safe_set(9);
        assert!(v.get(9));
        v.safe_clear(9);
        assert!(!v.get(9));

        assert!(!v.safe_get_and_set(9));
        assert!(v.safe_get_and_set(9));
        assert!(v.safe_get_and_clear(9));
        assert!(!v.safe_get_and_clear(9));
    }

    #[test]
    fn test_change_all() {
        let v = vector();
        v.ensure_capacity(1000).unwrap();
        v.change_all(true);
        for ix in 0..v.capacity() {
            assert!(v.get(ix));
        }
        v.change_all(false);
        for ix in 0..v.capacity() {
            assert!(!v.get(ix));
        }
    }

    #[test]
    fn test_group_access() {
        let v = vector();
        v.ensure_capacity(16).unwrap();
        v.set_group(8, 0xA5);
        assert_eq!(v.get_group(8), 0xA5);
        assert!(v.get(8));
        assert!(!v.get(9));
        assert!(v.get(10));
    }

    #[test]
    fn test_serialize_known_pattern() {
        let v = vector();
        v.ensure_capacity(10).unwrap();
        for ix in [0usize, 7, 8, 9] {
            v.set(ix);
        }

        let mut buffer = Vec::new();
        v.write_to(&mut buffer, 10).unwrap();
        assert_eq!(buffer, [0x81, 0x03]);

        let fresh = vector();
        fresh.read_from(&mut buffer.as_slice(), 10).unwrap();
        for ix in 0..10 {
            assert_eq!(fresh.get(ix), v.get(ix), "bit {ix}");
        }
    }

    #[test]
    fn test_read_rejects_non_empty() {
        let v = vector();
        v.ensure_capacity(8).unwrap();
        let err = v.read_from(&mut [0u8].as_slice(), 8).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn test_write_rejects_count_beyond_capacity() {
        let v = vector();
        v.ensure_capacity(8).unwrap();
        let mut sink = Vec::new();
        assert!(v.write_to(&mut sink, v.capacity() + 1).is_err());
    }

    #[test]
    fn test_duplicate() {
        let v = vector();
        v.ensure_capacity(100).unwrap();
        for ix in (0..100).step_by(3) {
            v.set(ix);
        }
        let copy = BitVector::duplicate(&v, &Arc::new(Pool::new())).unwrap();
        for ix in 0..100 {
            assert_eq!(copy.get(ix), v.get(ix), "bit {ix}");
        }
    }
}
