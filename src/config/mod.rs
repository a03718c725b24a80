//! # Configuration
//!
//! All tunable constants live in [`constants`] and are re-exported here.
//! Import from this module rather than redefining values locally:
//!
//! ```ignore
//! use crate::config::{BLOCKS_GROWTH, BIT_ITEMS_PER_BLOCK};
//! ```

mod constants;

pub use constants::*;
