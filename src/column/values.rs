//! # Fixed-Width Column Values
//!
//! The value types storable in a [`ColumnStore`], beyond the integer and
//! float primitives: a 128-bit fixed-point decimal, tick-based date-time
//! types, and a 16-byte GUID. All are plain `#[repr(C)]` data with a fixed
//! layout, valid at all-zero bits, so pool-zeroed blocks start out holding
//! legitimate (if meaningless) values behind clear not-null bits.
//!
//! [`ColumnStore`]: super::ColumnStore

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::array::BlockItem;

/// Marker for types a [`super::ColumnStore`] can hold: plain fixed-width
/// data with a stable byte layout.
pub trait FixedWidth: BlockItem + FromBytes + IntoBytes + Immutable + KnownLayout {}

/// 128-bit fixed-point decimal, stored as raw scaled bits.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct Decimal {
    pub bits: i128,
}

/// Instant as ticks (100 ns units) since an epoch chosen by the caller.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct DateTime {
    pub ticks: i64,
}

/// Duration as ticks (100 ns units).
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TimeSpan {
    pub ticks: i64,
}

/// Instant plus a UTC offset in minutes.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct DateTimeOffset {
    pub ticks: i64,
    pub offset_minutes: i16,
    reserved: [u8; 6],
}

impl DateTimeOffset {
    pub fn new(ticks: i64, offset_minutes: i16) -> Self {
        Self { ticks, offset_minutes, reserved: [0; 6] }
    }
}

/// 128-bit globally unique identifier.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct Guid {
    pub bytes: [u8; 16],
}

unsafe impl BlockItem for Decimal {}
unsafe impl BlockItem for DateTime {}
unsafe impl BlockItem for TimeSpan {}
unsafe impl BlockItem for DateTimeOffset {}
unsafe impl BlockItem for Guid {}

macro_rules! fixed_width_impls {
    ($($ty:ty),+ $(,)?) => {
        $( impl FixedWidth for $ty {} )+
    };
}

fixed_width_impls!(
    u8, i8, u16, i16, u32, i32, u64, i64, f32, f64,
    Decimal, DateTime, DateTimeOffset, TimeSpan, Guid,
);

const _: () = assert!(std::mem::size_of::<DateTimeOffset>() == 16);
const _: () = assert!(std::mem::size_of::<Decimal>() == 16);
const _: () = assert!(std::mem::size_of::<Guid>() == 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_are_defaults() {
        assert_eq!(Decimal::default().bits, 0);
        assert_eq!(DateTime::default().ticks, 0);
        assert_eq!(DateTimeOffset::default(), DateTimeOffset::new(0, 0));
        assert_eq!(Guid::default().bytes, [0u8; 16]);
    }

    #[test]
    fn test_datetime_offset_layout() {
        let value = DateTimeOffset::new(0x0102_0304_0506_0708, -60);
        let bytes = value.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708i64.to_le_bytes());
        assert_eq!(&bytes[8..10], &(-60i16).to_le_bytes());
    }
}
