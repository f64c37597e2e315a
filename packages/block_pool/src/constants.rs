/// The largest alignment any block-backed allocation can have.
///
/// Every block handed out by this crate starts on a multiple of this value. It matches the
/// alignment of `max_align_t` on mainstream 64-bit targets, which is the strictest alignment
/// any fundamental type needs there. Requests for stricter alignment are rejected rather than
/// accommodated.
pub const MAX_ALIGNMENT: usize = 16;

/// The smallest block a [`PoolAllocator`][crate::PoolAllocator] size class uses.
///
/// Includes the per-block header, so the smallest usable payload is
/// `MIN_BLOCK_SIZE - MAX_ALIGNMENT` bytes.
pub const MIN_BLOCK_SIZE: usize = 2 * MAX_ALIGNMENT;

/// Number of blocks reserved from the system allocator each time an unbounded pool grows.
pub const DEFAULT_BLOCKS_PER_CHUNK: usize = 64;

/// Largest block size (header included) a default [`PoolAllocator`][crate::PoolAllocator]
/// will create a size class for.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;

pub(crate) const ERR_POISONED_LOCK: &str =
    "encountered poisoned lock - pool state cannot be trusted after a panic inside the pool";
