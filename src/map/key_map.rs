//! # Concurrent Key Map
//!
//! A concurrent map from length-prefixed byte keys to 64-bit values. Keys
//! are stored as raw pointers; equality and hashing read the length prefix
//! and the content bytes behind the pointer, so two distinct pointers with
//! equal content collide as intended. Key buffers are owned elsewhere
//! (typically by a [`KeyArray`]) and must outlive their map entries.
//!
//! ## Structure
//!
//! The map is split into `MAP_SHARD_COUNT` shards selected by the key
//! content's hash. Each shard is an rwlock around a `hashbrown` table whose
//! buckets are drawn from the pool through [`PoolAllocator`], so the map's
//! node storage lives in the arena and disappears on pool recycle.
//!
//! `try_add` and `try_get_value` may run concurrently from any number of
//! threads. `clear` is not safe against concurrent mutators; quiesce first.
//!
//! [`KeyArray`]: crate::array::KeyArray
//! [`PoolAllocator`]: crate::memory::PoolAllocator

use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr::NonNull;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;

use crate::array::KeyArray;
use crate::config::MAP_SHARD_COUNT;
use crate::memory::{Pool, PoolAllocator};

/// Map lookup with a required-match contract found no entry.
#[derive(Debug, Clone, Copy)]
pub struct KeyNotFound;

impl std::fmt::Display for KeyNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key not found")
    }
}

impl std::error::Error for KeyNotFound {}

/// Raw pointer to a length-prefixed key buffer, compared and hashed by
/// content.
#[derive(Clone, Copy)]
struct KeyRef(*const u8);

unsafe impl Send for KeyRef {}
unsafe impl Sync for KeyRef {}

impl KeyRef {
    /// # Safety
    /// The pointer must address `*ptr + 1` readable bytes.
    #[inline]
    unsafe fn content(&self) -> &[u8] {
        let len = *self.0 as usize;
        std::slice::from_raw_parts(self.0.add(1), len)
    }
}

impl PartialEq for KeyRef {
    fn eq(&self, other: &Self) -> bool {
        unsafe { self.content() == other.content() }
    }
}

impl Eq for KeyRef {}

impl Hash for KeyRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(unsafe { self.content() });
    }
}

type Shard = RwLock<HashMap<KeyRef, u64, DefaultHashBuilder, PoolAllocator>>;

pub struct ConcurrentKeyMap {
    shards: [Shard; MAP_SHARD_COUNT],
    select: DefaultHashBuilder,
}

impl ConcurrentKeyMap {
    pub fn new(pool: &Arc<Pool>) -> Self {
        Self {
            shards: std::array::from_fn(|_| {
                RwLock::new(HashMap::with_hasher_in(
                    DefaultHashBuilder::default(),
                    PoolAllocator::new(pool),
                ))
            }),
            select: DefaultHashBuilder::default(),
        }
    }

    /// Copy construction: every entry of `src` is re-keyed through `keys`.
    /// The stored value indexes the key array, and the new entry points at
    /// that array's buffer.
    pub fn duplicate_rekeyed(
        src: &ConcurrentKeyMap,
        keys: &KeyArray,
        pool: &Arc<Pool>,
    ) -> Result<Self> {
        let map = Self::new(pool);
        for shard in &src.shards {
            for (_, value) in shard.read().iter() {
                let Some(key) = keys.get_at(*value as usize)? else {
                    bail!("key array has no entry for value {value}");
                };
                ensure!(
                    unsafe { map.try_add(key, *value)? },
                    "failed to re-add entry for value {value}"
                );
            }
        }
        Ok(map)
    }

    #[inline]
    fn shard_for(&self, content: &[u8]) -> &Shard {
        let mut hasher = self.select.build_hasher();
        hasher.write(content);
        &self.shards[(hasher.finish() as usize) & (MAP_SHARD_COUNT - 1)]
    }

    /// Inserts `(key, value)` iff no equal key is present. Returns
    /// `Ok(false)` when the key already exists or the pool is exhausted.
    ///
    /// # Safety
    /// `key` must address a valid length-prefixed buffer that outlives this
    /// map (or at least every later lookup and `duplicate_rekeyed`).
    pub unsafe fn try_add(&self, key: NonNull<u8>, value: u64) -> Result<bool> {
        let content_len = *key.as_ptr() as usize;
        ensure!(content_len > 0, "key length prefix byte must be positive");

        let key = KeyRef(key.as_ptr());
        let mut shard = self.shard_for(key.content()).write();
        if shard.try_reserve(1).is_err() {
            return Ok(false);
        }
        if shard.contains_key(&key) {
            return Ok(false);
        }
        shard.insert(key, value);
        Ok(true)
    }

    /// Looks up `key` (a length-prefixed buffer of at least `L + 1` bytes).
    pub fn try_get_value(&self, key: &[u8]) -> Result<Option<u64>> {
        ensure!(
            key.len() >= 2,
            "key must have at least one byte for size, plus one byte for content"
        );
        let content_len = key[0] as usize;
        ensure!(
            content_len > 0 && content_len < key.len(),
            "key length prefix must be positive and less than buffer length"
        );

        // The probe borrows the caller's buffer only for the lookup.
        let probe = KeyRef(key.as_ptr());
        let shard = self.shard_for(&key[1..=content_len]).read();
        Ok(shard.get(&probe).copied())
    }

    /// Required-match lookup.
    pub fn get(&self, key: &[u8]) -> Result<u64> {
        match self.try_get_value(key)? {
            Some(value) => Ok(value),
            None => bail!(KeyNotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Empties the map. Not safe against concurrent mutators.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}
