//! # colstore - Off-Heap Columnar Storage Substrate
//!
//! colstore is the storage substrate for an in-memory database engine:
//! growable, concurrently-readable columns of fixed-width values, columns
//! of variable-length byte keys, companion bitmaps for null tracking, and a
//! concurrent map from length-prefixed keys to 64-bit values. Every
//! container draws its memory from a shared arena, so a column's whole
//! working set is released with one `recycle` and transient garbage retires
//! without stalling readers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use colstore::{ColumnStore, Pool};
//!
//! let pool = Arc::new(Pool::auto_budget());
//!
//! let prices: ColumnStore<i64> = ColumnStore::new(&pool);
//! prices.ensure_capacity(1_000_000)?;
//! prices.set(0, 4_200);
//! assert!(prices.is_not_null(0));
//! ```
//!
//! ## Architecture
//!
//! Strictly layered; higher components call lower ones, never upward:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  ColumnStore<T> / ColumnStoreAny │ KeyMap     │
//! ├───────────────────────────────────────────────┤
//! │   BitVector      │   KeyArray                 │
//! ├───────────────────────────────────────────────┤
//! │          BlockArray<T>  (spine + blocks)      │
//! ├───────────────────────────────────────────────┤
//! │   Pool  (chunk allocator + garbage list)      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Readers are wait-free: element access is two acquire loads and pointer
//! arithmetic, bit and slot updates are bounded CAS retries. Only capacity
//! growth takes a lock, and replaced spines are retired through the pool's
//! deferred-collection queue rather than freed in place, so a reader
//! holding the old spine never observes torn memory. Reclamation
//! (`Pool::collect`, `Pool::recycle`) requires externally established
//! quiescence and is `unsafe` accordingly.
//!
//! ## Module Overview
//!
//! - [`memory`]: the pool (chunk allocator, garbage list, budgeting)
//! - [`array`]: block array, bit vector, key array
//! - [`map`]: concurrent key→value map
//! - [`column`]: typed column stores and the runtime-typed registry
//! - [`view`]: `std::io` cursor over a raw byte window
//! - [`config`]: all tunable constants

pub mod array;
pub mod column;
pub mod config;
pub mod map;
pub mod memory;
pub mod view;

pub use array::{BitVector, BlockArray, BlockItem, KeyArray};
pub use column::{
    ColumnStore, ColumnStoreAny, DateTime, DateTimeOffset, Decimal, FixedWidth, Guid, TimeSpan,
    ValueKind,
};
pub use map::{ConcurrentKeyMap, KeyNotFound};
pub use memory::{InsufficientMemory, Pool, PoolAllocator};
pub use view::MemoryView;
