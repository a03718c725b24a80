//! # Configuration Constants
//!
//! This module centralizes the tunable constants of the storage substrate,
//! grouping interdependent values together. Constants that depend on each
//! other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! BIT_ITEMS_PER_BLOCK (65536 bytes)
//!       │
//!       ├─> BITS_PER_ITEM (8, bits per stored byte)
//!       │
//!       └─> BITS_PER_BLOCK (derived: 65536 * 8)
//!
//! MIN_CLASS_SHIFT (4) .. MAX_CLASS_SHIFT (21)
//!       │
//!       ├─> SIZE_CLASS_COUNT (derived: one class per power of two)
//!       │
//!       └─> DEFAULT_CHUNK_SIZE (must hold the largest class)
//!
//! ALLOC_HEADER_SIZE (16 bytes)
//!       │
//!       └─> MAX_ALLOC_ALIGN (16; header-prefixed carving preserves it)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_CHUNK_SIZE >= largest size class` (a class allocation always
//!    fits in a fresh chunk)
//! 2. `ALLOC_HEADER_SIZE` is a multiple of `MAX_ALLOC_ALIGN` (user pointers
//!    stay aligned after the header prefix)
//! 3. `MAP_SHARD_COUNT` is a power of two (shard selection is a mask)
//! 4. `MAX_KEY_CONTENT_LEN < 255` (255 is reserved, length prefix is a byte)
//!
//! These are enforced by compile-time assertions below.

// ============================================================================
// BLOCK ARRAY GEOMETRY
// Shared by the bit vector, key array, and typed column stores
// ============================================================================

/// Bytes stored per block of a bit vector's backing array.
pub const BIT_ITEMS_PER_BLOCK: usize = 65536;

/// Bits packed into each stored byte.
pub const BITS_PER_ITEM: usize = 8;

/// Bits covered by one full block of a bit vector.
pub const BITS_PER_BLOCK: usize = BIT_ITEMS_PER_BLOCK * BITS_PER_ITEM;

/// Pointer slots per block of a key array.
pub const KEY_ITEMS_PER_BLOCK: usize = 65536;

/// Elements per block of a typed column store's value array.
pub const COLUMN_ITEMS_PER_BLOCK: usize = 65536;

/// Spine growth granularity, in blocks. The spine's allocated capacity is
/// always a positive multiple of this.
pub const BLOCKS_GROWTH: usize = 64;

const _: () = assert!(
    BITS_PER_BLOCK == BIT_ITEMS_PER_BLOCK * BITS_PER_ITEM,
    "BITS_PER_BLOCK derivation mismatch"
);

// ============================================================================
// CHUNK ALLOCATOR
// Size-class table and chunk sizing for the pool's block allocator
// ============================================================================

/// Smallest size class is `1 << MIN_CLASS_SHIFT` bytes (16).
pub const MIN_CLASS_SHIFT: usize = 4;

/// Largest size class is `1 << MAX_CLASS_SHIFT` bytes (2 MiB). Larger
/// requests get a dedicated mapping.
pub const MAX_CLASS_SHIFT: usize = 21;

/// Number of power-of-two size classes.
pub const SIZE_CLASS_COUNT: usize = MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1;

/// Bytes reserved from the OS per chunk mapping.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Bytes of bookkeeping prefixed to every allocation.
pub const ALLOC_HEADER_SIZE: usize = 16;

/// Strongest alignment the allocator guarantees for returned pointers.
pub const MAX_ALLOC_ALIGN: usize = 16;

/// Header tag for allocations carved from size-classed chunks.
pub const ALLOC_MAGIC: u32 = 0x434C_5354;

const _: () = assert!(
    DEFAULT_CHUNK_SIZE >= (1 << MAX_CLASS_SHIFT),
    "DEFAULT_CHUNK_SIZE must hold the largest size class"
);

const _: () = assert!(
    ALLOC_HEADER_SIZE % MAX_ALLOC_ALIGN == 0,
    "ALLOC_HEADER_SIZE must preserve MAX_ALLOC_ALIGN"
);

const _: () = assert!(
    (1 << MIN_CLASS_SHIFT) >= MAX_ALLOC_ALIGN,
    "smallest size class must be alignable"
);

// ============================================================================
// POOL BUDGET
// Sizing policy for Pool::auto_budget
// ============================================================================

/// Default byte budget as a percentage of system RAM.
pub const DEFAULT_BUDGET_PERCENT: usize = 25;

/// Minimum byte budget floor (4 MiB). Even on low-memory systems a pool
/// needs at least one chunk to function.
pub const MIN_BUDGET_FLOOR: usize = 4 * 1024 * 1024;

const _: () = assert!(
    MIN_BUDGET_FLOOR >= DEFAULT_CHUNK_SIZE,
    "budget floor must admit at least one chunk"
);

// ============================================================================
// KEY FORMAT
// ============================================================================

/// Maximum content bytes in a length-prefixed key. The prefix is a single
/// byte and 255 is reserved, so content runs 1..=254.
pub const MAX_KEY_CONTENT_LEN: usize = 254;

const _: () = assert!(MAX_KEY_CONTENT_LEN < 255, "length prefix is one byte, 255 reserved");

// ============================================================================
// CONCURRENT MAP
// ============================================================================

/// Number of lock shards in the concurrent key map. More shards reduce
/// write contention at the cost of per-shard table overhead.
pub const MAP_SHARD_COUNT: usize = 64;

const _: () = assert!(
    MAP_SHARD_COUNT.is_power_of_two(),
    "MAP_SHARD_COUNT must be a power of two for mask-based shard selection"
);
