//! # Concurrent Maps
//!
//! [`ConcurrentKeyMap`] maps length-prefixed byte keys to 64-bit values,
//! with its node storage drawn from the pool.

mod key_map;

pub use key_map::{ConcurrentKeyMap, KeyNotFound};
