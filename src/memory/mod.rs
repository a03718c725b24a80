//! # Pool Memory Management
//!
//! This module provides the arena every container in the crate allocates
//! from: a chunk-backed block allocator ([`chunk`]) wrapped by the public
//! [`Pool`] with its deferred-reclamation garbage list.
//!
//! Containers share a pool through `Arc<Pool>`; releasing a whole working
//! set is a single (unsafe, quiescent) `recycle` call.

mod chunk;
mod pool;

pub use pool::{InsufficientMemory, Pool, PoolAllocator};
