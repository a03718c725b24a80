//! # Expandable Arrays
//!
//! The growable, concurrently-readable containers of the substrate:
//!
//! - [`BlockArray`]: the two-level spine-and-blocks array everything else
//!   is built on
//! - [`BitVector`]: a bitmap over a byte array, with scalar and CAS bit ops
//! - [`KeyArray`]: CAS-installed slots of length-prefixed byte keys
//!
//! All three draw from a shared [`Pool`](crate::memory::Pool) and retire
//! replaced memory through its deferred-collection queue.

mod bit_vector;
mod block_array;
mod key_array;

pub use bit_vector::BitVector;
pub use block_array::{BlockArray, BlockItem};
pub use key_array::KeyArray;
