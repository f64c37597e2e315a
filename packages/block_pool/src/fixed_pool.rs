use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, error, trace, warn};

use crate::builder::PoolSettings;
use crate::constants::ERR_POISONED_LOCK;
use crate::{
    BlockSource, DropPolicy, Error, ExhaustionEvent, ExhaustionPolicy, FixedBlockPoolBuilder,
    MAX_ALIGNMENT, PoolStatistics, Result,
};

/// A thread-safe pool of equally sized memory blocks.
///
/// Blocks are acquired and released in constant time. Released blocks are recycled through an
/// intrusive free list stored inside the vacant blocks themselves, so the pool needs no
/// bookkeeping memory per block.
///
/// Every block starts on a multiple of [`MAX_ALIGNMENT`] and is at least as large as the
/// configured block size.
///
/// # Growth
///
/// By default the pool is unbounded: when no block is free, it reserves a new chunk of
/// [`blocks_per_chunk`][1] blocks from the system allocator. Chunks are returned to the system
/// allocator only when the pool is dropped.
///
/// A [bounded][2] pool reserves all of its blocks in a single chunk when it is built and never
/// grows. When all of its blocks are in use, the configured [`ExhaustionPolicy`] decides what
/// happens to further acquisitions.
///
/// # Thread safety
///
/// The pool is thread-safe. All mutation of the free list happens under a single lock that is
/// held only for the duration of the list operation (and chunk reservation, when growing).
///
/// # Example
///
/// ```
/// use block_pool::FixedBlockPool;
///
/// let pool = FixedBlockPool::builder().block_size(64).build();
///
/// let first = pool.acquire(64).unwrap();
/// let second = pool.acquire(10).unwrap();
/// assert_ne!(first, second);
///
/// // SAFETY: Both blocks came from this pool and are each released exactly once.
/// unsafe {
///     pool.release(first);
///     pool.release(second);
/// }
///
/// assert_eq!(pool.statistics().blocks_in_use, 0);
/// ```
///
/// [1]: crate::FixedBlockPoolBuilder::blocks_per_chunk
/// [2]: crate::FixedBlockPoolBuilder::bounded
pub struct FixedBlockPool {
    /// Layout of a single block. The size is the stride between consecutive blocks in a chunk.
    block_layout: Layout,

    settings: PoolSettings,

    state: Mutex<PoolState>,
}

/// Written into every vacant block on the free list.
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// A contiguous allocation from the system allocator holding a number of blocks.
#[derive(Debug)]
struct Chunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

struct PoolState {
    /// Head of the free list of released blocks.
    free_head: Option<NonNull<FreeBlock>>,
    free_count: usize,

    /// Next never-used block of the newest chunk. Blocks are carved from here only once the
    /// free list is empty, which lets a chunk be reserved without touching all of its memory.
    fresh_next: Option<NonNull<u8>>,
    fresh_remaining: usize,

    chunks: Vec<Chunk>,
    total_blocks: usize,

    in_use: usize,
    peak_in_use: usize,
}

// SAFETY: The pointers in PoolState only ever point into chunks owned by the same pool. All
// access to them happens while holding the pool mutex, so moving the state between threads
// cannot introduce unsynchronized access.
unsafe impl Send for PoolState {}

impl FixedBlockPool {
    /// Starts building a new [`FixedBlockPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use block_pool::FixedBlockPool;
    ///
    /// let pool = FixedBlockPool::builder().block_size(32).blocks_per_chunk(16).build();
    /// ```
    #[inline]
    pub fn builder() -> FixedBlockPoolBuilder {
        FixedBlockPoolBuilder::new()
    }

    pub(crate) fn new_inner(block_size: usize, settings: PoolSettings) -> Self {
        let block_layout = Self::block_layout(block_size);

        let mut state = PoolState {
            free_head: None,
            free_count: 0,
            fresh_next: None,
            fresh_remaining: 0,
            chunks: Vec::new(),
            total_blocks: 0,
            in_use: 0,
            peak_in_use: 0,
        };

        if let Some(max_blocks) = settings.max_blocks {
            state.reserve_chunk(block_layout, max_blocks);

            debug!(
                block_size = block_layout.size(),
                capacity = max_blocks,
                "reserved bounded fixed-block pool"
            );
        }

        Self {
            block_layout,
            settings,
            state: Mutex::new(state),
        }
    }

    fn block_layout(block_size: usize) -> Layout {
        let size = block_size.max(size_of::<FreeBlock>());

        Layout::from_size_align(size, MAX_ALIGNMENT)
            .expect("block size must not overflow when padded to the maximum alignment")
            .pad_to_align()
    }

    /// Size of each block in bytes.
    ///
    /// This may be larger than the size the pool was configured with, as the block size is
    /// rounded up to a multiple of [`MAX_ALIGNMENT`].
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_layout.size()
    }

    /// Maximum number of blocks the pool may hold, or `None` if the pool is unbounded.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.settings.max_blocks
    }

    /// Acquires a block with room for at least `size` bytes.
    ///
    /// The returned block is aligned to [`MAX_ALIGNMENT`] and remains valid until it is passed
    /// to [`release()`][Self::release] or the pool is dropped. Its contents are unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTooLarge`] if `size` is larger than the block size.
    ///
    /// Returns [`Error::PoolExhausted`] if the pool is bounded, all of its blocks are in use and
    /// the exhaustion policy is [`ReturnError`][ExhaustionPolicy::ReturnError] or
    /// [`Retry`][ExhaustionPolicy::Retry].
    ///
    /// # Panics
    ///
    /// Panics if the pool is bounded, all of its blocks are in use and the exhaustion policy is
    /// [`Abort`][ExhaustionPolicy::Abort].
    pub fn acquire(&self, size: usize) -> Result<NonNull<u8>> {
        if size > self.block_layout.size() {
            return Err(Error::RequestTooLarge {
                requested: size,
                maximum: self.block_layout.size(),
            });
        }

        let mut retries_done = 0_u32;

        loop {
            if let Some(block) = self.try_take() {
                return Ok(block);
            }

            match self.settings.exhaustion_policy {
                ExhaustionPolicy::Retry { attempts, backoff } if retries_done < attempts.get() => {
                    // Cannot overflow because it is bounded by `attempts`.
                    retries_done = retries_done.wrapping_add(1);

                    trace!(
                        block_size = self.block_layout.size(),
                        retries_done, "pool exhausted, retrying after backoff"
                    );

                    thread::sleep(backoff);
                }
                _ => return Err(self.exhausted()),
            }
        }
    }

    /// Takes a block if one is available without exceeding the pool bound.
    fn try_take(&self) -> Option<NonNull<u8>> {
        let mut state = self.lock();

        let block = match state.pop_free() {
            Some(block) => block,
            None => match state.carve_fresh(self.block_layout.size()) {
                Some(block) => block,
                None => {
                    if self.settings.max_blocks.is_some() {
                        return None;
                    }

                    state.reserve_chunk(self.block_layout, self.settings.blocks_per_chunk);

                    debug!(
                        block_size = self.block_layout.size(),
                        chunks = state.chunks.len(),
                        total_blocks = state.total_blocks,
                        "fixed-block pool grew by one chunk"
                    );

                    state
                        .carve_fresh(self.block_layout.size())
                        .expect("a freshly reserved chunk always has at least one block")
                }
            },
        };

        // Cannot overflow because that would imply more blocks than fit in virtual memory.
        state.in_use = state.in_use.wrapping_add(1);
        state.peak_in_use = state.peak_in_use.max(state.in_use);

        Some(block)
    }

    /// Reports the exhaustion to the hook and applies the final step of the exhaustion policy.
    ///
    /// Called without the pool lock held.
    fn exhausted(&self) -> Error {
        let event = ExhaustionEvent {
            block_size: self.block_layout.size(),
            capacity: self.settings.max_blocks.unwrap_or_default(),
        };

        match &self.settings.out_of_memory_hook {
            Some(hook) => hook.invoke(&event),
            None => error!(
                block_size = event.block_size,
                capacity = event.capacity,
                "fixed-block pool exhausted"
            ),
        }

        if self.settings.exhaustion_policy == ExhaustionPolicy::Abort {
            panic!(
                "fixed-block pool of {} blocks of {} bytes is exhausted",
                event.capacity, event.block_size
            );
        }

        Error::PoolExhausted {
            block_size: event.block_size,
            capacity: event.capacity,
        }
    }

    /// Returns a block to the pool, making it available to future acquisitions.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// * `ptr` was returned by [`acquire()`][Self::acquire] on this same pool.
    /// * `ptr` has not been released since it was acquired.
    /// * No references to the block's memory are used after this call.
    ///
    /// The pool does not track provenance. Violating these requirements corrupts the free list.
    /// Debug builds assert that `ptr` points at a block inside this pool.
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        let mut state = self.lock();

        debug_assert!(
            state.owns_block(ptr, self.block_layout.size()),
            "released pointer {ptr:p} does not point at a block of this pool"
        );
        debug_assert!(
            state.in_use > 0,
            "released a block to a pool with no blocks in use"
        );

        let block = ptr.cast::<FreeBlock>();

        // SAFETY: The caller guarantees the block came from this pool and is no longer used.
        // Blocks are aligned to MAX_ALIGNMENT and at least size_of::<FreeBlock>() bytes, so the
        // block can hold the free list link.
        unsafe {
            block.write(FreeBlock {
                next: state.free_head,
            });
        }

        state.free_head = Some(block);
        // Cannot overflow because that would imply more blocks than fit in virtual memory.
        state.free_count = state.free_count.wrapping_add(1);
        state.in_use = state.in_use.saturating_sub(1);
    }

    /// Returns a snapshot of the pool's usage.
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        let state = self.lock();

        PoolStatistics {
            blocks_in_use: state.in_use,
            blocks_free: state.free_count.saturating_add(state.fresh_remaining),
            pools_allocated: state.chunks.len(),
            peak_blocks_in_use: state.peak_in_use,
            bytes_reserved: state.total_blocks.saturating_mul(self.block_layout.size()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }
}

impl PoolState {
    fn pop_free(&mut self) -> Option<NonNull<u8>> {
        let head = self.free_head?;

        // SAFETY: Every block on the free list had a FreeBlock written into it by release()
        // and has not been handed out since, so the link is initialized and not aliased.
        self.free_head = unsafe { head.as_ref().next };
        self.free_count = self.free_count.saturating_sub(1);

        Some(head.cast())
    }

    fn carve_fresh(&mut self, stride: usize) -> Option<NonNull<u8>> {
        if self.fresh_remaining == 0 {
            return None;
        }

        let block = self
            .fresh_next
            .expect("fresh_next is always set while fresh_remaining is non-zero");

        self.fresh_remaining = self.fresh_remaining.wrapping_sub(1);
        self.fresh_next = if self.fresh_remaining == 0 {
            None
        } else {
            // SAFETY: At least one more block follows this one in the same chunk, so the
            // result stays within the chunk allocation.
            Some(unsafe { block.add(stride) })
        };

        Some(block)
    }

    fn reserve_chunk(&mut self, block_layout: Layout, blocks: usize) {
        let size = block_layout
            .size()
            .checked_mul(blocks)
            .expect("chunk size must not overflow usize");

        let layout = Layout::from_size_align(size, block_layout.align())
            .expect("chunk layout is valid for a power-of-two alignment and non-overflowing size");

        // SAFETY: The layout has non-zero size because both the block size and the block count
        // are non-zero.
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));

        self.chunks.push(Chunk { ptr, layout });
        self.fresh_next = Some(ptr);
        self.fresh_remaining = blocks;
        self.total_blocks = self.total_blocks.saturating_add(blocks);
    }

    fn owns_block(&self, ptr: NonNull<u8>, stride: usize) -> bool {
        let address = ptr.as_ptr() as usize;

        self.chunks.iter().any(|chunk| {
            let start = chunk.ptr.as_ptr() as usize;
            let end = start.saturating_add(chunk.layout.size());

            (start..end).contains(&address) && (address.wrapping_sub(start)) % stride == 0
        })
    }
}

impl BlockSource for FixedBlockPool {
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

impl fmt::Debug for FixedBlockPool {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("block_size", &self.block_layout.size())
            .field("capacity", &self.settings.max_blocks)
            .field("exhaustion_policy", &self.settings.exhaustion_policy)
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl Drop for FixedBlockPool {
    fn drop(&mut self) {
        // The chunks must be freed even if a panic poisoned the lock.
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if state.in_use > 0 {
            if self.settings.drop_policy == DropPolicy::MustNotHaveBlocksInUse
                && !thread::panicking()
            {
                panic!(
                    "dropped a fixed-block pool with {} blocks of {} bytes still in use while the drop policy forbids it",
                    state.in_use,
                    self.block_layout.size()
                );
            }

            warn!(
                block_size = self.block_layout.size(),
                blocks_in_use = state.in_use,
                "dropping fixed-block pool with blocks still in use"
            );
        }

        for chunk in state.chunks.drain(..) {
            // SAFETY: The chunk was allocated in reserve_chunk() with exactly this layout and
            // is freed only here, once.
            unsafe { alloc::dealloc(chunk.ptr.as_ptr(), chunk.layout) };
        }
    }
}
