use std::fmt;
use std::ptr::NonNull;
use std::sync::OnceLock;

use tracing::debug;

use crate::builder::PoolSettings;
use crate::{
    BlockSource, Error, FixedBlockPool, MAX_ALIGNMENT, MIN_BLOCK_SIZE, PoolAllocatorBuilder,
    PoolStatistics, Result, SizeClassStatistics,
};

/// Every block handed out by a [`PoolAllocator`] starts with this header, which records the size
/// class the block belongs to. The caller's memory begins right after it.
#[repr(C)]
struct BlockHeader {
    class_index: usize,
}

/// The header occupies a full alignment unit so the memory after it keeps the block alignment.
const HEADER_SIZE: usize = MAX_ALIGNMENT;

const _: () = assert!(size_of::<BlockHeader>() <= HEADER_SIZE);

/// One slot per power of two. Slots below `MIN_BLOCK_SIZE` are never populated.
const CLASS_SLOTS: usize = usize::BITS as usize;

/// A thread-safe allocator serving requests of any size up to a limit from fixed-block pools.
///
/// Each request is routed to the pool of the smallest power-of-two size class the request
/// (plus a small header) fits in. The pool of a size class is created the first time the class
/// is used, and its block size never changes afterwards. Creation is safe under concurrent
/// first use: exactly one pool is ever created per class.
///
/// Releasing a pointer requires no size information. The header in front of every allocation
/// identifies the pool the block must go back to, so a block is never returned to a different
/// pool than the one it came from.
///
/// # Example
///
/// ```
/// use block_pool::PoolAllocator;
///
/// let allocator = PoolAllocator::new();
///
/// let small = allocator.acquire(10).unwrap();
/// let large = allocator.acquire(1000).unwrap();
///
/// assert_eq!(allocator.class_statistics().len(), 2);
///
/// // SAFETY: Both pointers came from this allocator and are each released once.
/// unsafe {
///     allocator.release(small);
///     allocator.release(large);
/// }
///
/// assert_eq!(allocator.statistics().blocks_in_use, 0);
/// ```
pub struct PoolAllocator {
    classes: Box<[OnceLock<FixedBlockPool>]>,

    /// Largest block size (header included) a class may be created for. Always a power of two.
    max_block_size: usize,

    settings: PoolSettings,
}

impl PoolAllocator {
    /// Creates an allocator with the default configuration.
    ///
    /// The allocator is unbounded and starts empty. Memory is reserved only when size classes
    /// are first used.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`PoolAllocator`].
    ///
    /// # Example
    ///
    /// ```
    /// use block_pool::PoolAllocator;
    ///
    /// let allocator = PoolAllocator::builder().bounded(100).build();
    /// ```
    #[inline]
    pub fn builder() -> PoolAllocatorBuilder {
        PoolAllocatorBuilder::new()
    }

    pub(crate) fn new_inner(max_block_size: usize, settings: PoolSettings) -> Self {
        Self {
            classes: (0..CLASS_SLOTS).map(|_| OnceLock::new()).collect(),
            max_block_size,
            settings,
        }
    }

    /// The largest request, in bytes, that [`acquire()`][Self::acquire] can satisfy.
    #[must_use]
    #[inline]
    pub fn max_request_size(&self) -> usize {
        self.max_block_size.saturating_sub(HEADER_SIZE)
    }

    /// Acquires memory for at least `size` bytes.
    ///
    /// The returned pointer is aligned to [`MAX_ALIGNMENT`]. It remains valid until it is passed
    /// to [`release()`][Self::release] or the allocator is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTooLarge`] if `size` exceeds
    /// [`max_request_size()`][Self::max_request_size].
    ///
    /// Returns [`Error::PoolExhausted`] if the allocator is bounded, all blocks of the size
    /// class are in use and the exhaustion policy returns errors.
    ///
    /// # Panics
    ///
    /// Panics if the allocator is bounded, all blocks of the size class are in use and the
    /// exhaustion policy is [`Abort`][crate::ExhaustionPolicy::Abort].
    pub fn acquire(&self, size: usize) -> Result<NonNull<u8>> {
        let too_large = || Error::RequestTooLarge {
            requested: size,
            maximum: self.max_request_size(),
        };

        let block_size = size
            .checked_add(HEADER_SIZE)
            .and_then(|total| total.max(MIN_BLOCK_SIZE).checked_next_power_of_two())
            .ok_or_else(too_large)?;

        if block_size > self.max_block_size {
            return Err(too_large());
        }

        let class_index = block_size.trailing_zeros() as usize;
        let block = self.class_pool(class_index, block_size).acquire(block_size)?;

        // SAFETY: The block is at least MIN_BLOCK_SIZE bytes and aligned to MAX_ALIGNMENT, so
        // the header fits at its start.
        unsafe {
            block.cast::<BlockHeader>().write(BlockHeader { class_index });
        }

        // SAFETY: The block is larger than HEADER_SIZE, so the payload stays inside it.
        Ok(unsafe { block.add(HEADER_SIZE) })
    }

    fn class_pool(&self, class_index: usize, block_size: usize) -> &FixedBlockPool {
        self.classes
            .get(class_index)
            .expect("class index is bounded by the number of bits in usize")
            .get_or_init(|| {
                debug!(block_size, "creating size class pool");
                FixedBlockPool::new_inner(block_size, self.settings.clone())
            })
    }

    /// Returns memory to the allocator.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// * `ptr` was returned by [`acquire()`][Self::acquire] on this same allocator.
    /// * `ptr` has not been released since it was acquired.
    /// * No references to the memory are used after this call.
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: The caller guarantees ptr came from acquire(), which returns an address
        // HEADER_SIZE bytes past the start of a block.
        let block = unsafe { ptr.sub(HEADER_SIZE) };

        // SAFETY: acquire() initialized the header at the start of every block it hands out.
        let class_index = unsafe { block.cast::<BlockHeader>().read().class_index };

        let pool = self
            .classes
            .get(class_index)
            .and_then(OnceLock::get)
            .expect("released memory must carry the header of an existing size class");

        // SAFETY: The header identifies the pool the block was acquired from; the caller
        // guarantees it was not released before.
        unsafe { pool.release(block) };
    }

    /// Returns a snapshot of usage aggregated across all size classes.
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        self.pools()
            .map(FixedBlockPool::statistics)
            .fold(PoolStatistics::default(), PoolStatistics::merge)
    }

    /// Returns a snapshot of usage of each size class that has been used, ordered by block size.
    #[must_use]
    pub fn class_statistics(&self) -> Vec<SizeClassStatistics> {
        self.pools()
            .map(|pool| SizeClassStatistics {
                block_size: pool.block_size(),
                statistics: pool.statistics(),
            })
            .collect()
    }

    fn pools(&self) -> impl Iterator<Item = &FixedBlockPool> {
        self.classes.iter().filter_map(OnceLock::get)
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSource for PoolAllocator {
    fn acquire(&self, size: usize) -> Result<NonNull<u8>> {
        Self::acquire(self, size)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { Self::release(self, ptr) }
    }

    fn statistics(&self) -> PoolStatistics {
        Self::statistics(self)
    }
}

impl fmt::Debug for PoolAllocator {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("max_block_size", &self.max_block_size)
            .field("size_classes", &self.pools().count())
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}
