//! Allocator sizing constants.

use kernel_phys_addresses::FRAME_SIZE;

/// Number of slots in the free-slot cache.
pub const CACHE_SLOTS: usize = 100;

/// Cache occupancy at which releases stop going to the cache and the
/// allocator falls back to the free list for good.
pub const CACHE_THRESHOLD: usize = 80;

/// Byte written over a frame's entire contents when it is freed, so that
/// dangling references read recognizable junk instead of stale data.
pub const POISON_BYTE: u8 = 0x01;

/// [`FRAME_SIZE`] as a `usize`, for slice and `write_bytes` lengths.
#[allow(clippy::cast_possible_truncation)]
pub const FRAME_BYTES: usize = FRAME_SIZE as usize;

const _: () = {
    assert!(CACHE_THRESHOLD <= CACHE_SLOTS);
    // A free frame must be able to hold the free-list link.
    assert!(FRAME_BYTES >= size_of::<usize>());
};
