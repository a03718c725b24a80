//! # Typed Column Store
//!
//! A column of fixed-width values paired with a not-null bitmap. Element
//! `i` is logically null iff bit `i` of the bitmap is clear; the value
//! array still holds a (zeroed or stale) `T` there. Both containers are
//! grown together and the user-visible capacity is the smaller of the two.
//!
//! The `ValueKind` / `ColumnStoreAny` pair is the registry for callers that
//! pick the element type at runtime: one enum variant per supported kind,
//! dispatched with an ordinary `match` instead of reflection.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use paste::paste;

use super::values::{DateTime, DateTimeOffset, Decimal, FixedWidth, Guid, TimeSpan};
use crate::array::{BitVector, BlockArray};
use crate::config::{BLOCKS_GROWTH, COLUMN_ITEMS_PER_BLOCK};
use crate::memory::Pool;

pub struct ColumnStore<T: FixedWidth> {
    values: BlockArray<T>,
    not_nulls: BitVector,
}

impl<T: FixedWidth> ColumnStore<T> {
    pub fn new(pool: &Arc<Pool>) -> Self {
        Self {
            values: BlockArray::new(Arc::clone(pool), COLUMN_ITEMS_PER_BLOCK, BLOCKS_GROWTH),
            not_nulls: BitVector::new(pool),
        }
    }

    /// Capacity in elements: the smaller of the value array and the bitmap.
    pub fn capacity(&self) -> usize {
        self.values.capacity().min(self.not_nulls.capacity())
    }

    /// Grows both containers to cover at least `capacity` elements.
    pub fn try_ensure_capacity(&self, capacity: usize, timeout: Option<Duration>) -> Result<bool> {
        if !self.not_nulls.try_ensure_capacity(capacity, timeout)? {
            return Ok(false);
        }
        self.values.try_ensure_capacity(capacity, timeout)
    }

    pub fn ensure_capacity(&self, capacity: usize) -> Result<()> {
        self.not_nulls.ensure_capacity(capacity)?;
        self.values.ensure_capacity(capacity)
    }

    /// Raw value at `index`; meaningful only while [`Self::is_not_null`]
    /// holds.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        self.values.get(index)
    }

    /// Writes the value and marks the element not-null.
    #[inline]
    pub fn set(&self, index: usize, value: T) {
        self.values.set(index, value);
        self.not_nulls.set(index);
    }

    #[inline]
    pub fn is_not_null(&self, index: usize) -> bool {
        self.not_nulls.get(index)
    }

    #[inline]
    pub fn set_is_not_null(&self, index: usize) {
        self.not_nulls.set(index);
    }

    /// Marks the element null without clearing the stored value.
    #[inline]
    pub fn clear_is_not_null(&self, index: usize) {
        self.not_nulls.clear(index);
    }
}

macro_rules! column_store_registry {
    ($($kind:ident => $ty:ty),+ $(,)?) => {
        /// Element kinds a runtime-typed column store can hold.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ValueKind {
            $($kind),+
        }

        /// Runtime-typed column store: one variant per [`ValueKind`].
        pub enum ColumnStoreAny {
            $($kind(ColumnStore<$ty>)),+
        }

        impl ColumnStoreAny {
            pub fn new(kind: ValueKind, pool: &Arc<Pool>) -> Self {
                match kind {
                    $(ValueKind::$kind => Self::$kind(ColumnStore::new(pool))),+
                }
            }

            pub fn kind(&self) -> ValueKind {
                match self {
                    $(Self::$kind(_) => ValueKind::$kind),+
                }
            }

            pub fn capacity(&self) -> usize {
                match self {
                    $(Self::$kind(store) => store.capacity()),+
                }
            }

            pub fn ensure_capacity(&self, capacity: usize) -> Result<()> {
                match self {
                    $(Self::$kind(store) => store.ensure_capacity(capacity)),+
                }
            }

            pub fn is_not_null(&self, index: usize) -> bool {
                match self {
                    $(Self::$kind(store) => store.is_not_null(index)),+
                }
            }

            pub fn clear_is_not_null(&self, index: usize) {
                match self {
                    $(Self::$kind(store) => store.clear_is_not_null(index)),+
                }
            }
        }

        paste! {
            $(
                #[doc = concat!("Column store of `", stringify!($ty), "`.")]
                pub type [<ColumnStore $kind>] = ColumnStore<$ty>;
            )+
        }
    };
}

column_store_registry!(
    U8 => u8,
    I8 => i8,
    I16 => i16,
    U16 => u16,
    I32 => i32,
    U32 => u32,
    I64 => i64,
    U64 => u64,
    F32 => f32,
    F64 => f64,
    Decimal => Decimal,
    DateTime => DateTime,
    DateTimeOffset => DateTimeOffset,
    TimeSpan => TimeSpan,
    Guid => Guid,
);
