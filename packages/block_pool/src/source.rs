use std::fmt;
use std::ptr::NonNull;

use crate::{PoolStatistics, Result};

/// A thread-safe source of memory blocks.
///
/// Implemented by [`FixedBlockPool`][crate::FixedBlockPool], which serves a single block size,
/// and by [`PoolAllocator`][crate::PoolAllocator], which serves any size up to a limit by
/// routing requests to per-size-class pools.
///
/// Blocks are always aligned to [`MAX_ALIGNMENT`][crate::MAX_ALIGNMENT].
pub trait BlockSource: Send + Sync + fmt::Debug {
    /// Acquires a block with room for at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is larger than the source can serve or if the source is
    /// bounded and exhausted.
    fn acquire(&self, size: usize) -> Result<NonNull<u8>>;

    /// Returns a block to the source.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`acquire()`][Self::acquire] on
    /// this same source, that it has not been released since, and that the block's memory is
    /// not used after this call.
    unsafe fn release(&self, ptr: NonNull<u8>);

    /// Returns a snapshot of the source's usage.
    fn statistics(&self) -> PoolStatistics;
}
