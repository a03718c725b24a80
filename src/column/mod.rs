//! # Typed Column Stores
//!
//! The user-facing composition layer: a [`ColumnStore`] pairs a block array
//! of fixed-width values with a not-null [`BitVector`], and
//! [`ColumnStoreAny`] is the runtime-typed registry over the supported
//! element kinds.
//!
//! [`BitVector`]: crate::array::BitVector

mod store;
mod values;

pub use store::{ColumnStore, ColumnStoreAny, ValueKind};
pub use values::{DateTime, DateTimeOffset, Decimal, FixedWidth, Guid, TimeSpan};
