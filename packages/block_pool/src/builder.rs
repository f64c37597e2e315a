use std::alloc::Layout;

use crate::{
    DEFAULT_BLOCKS_PER_CHUNK, DEFAULT_MAX_BLOCK_SIZE, DropPolicy, ExhaustionPolicy,
    FixedBlockPool, MAX_ALIGNMENT, MIN_BLOCK_SIZE, OutOfMemoryHook, PoolAllocator,
};

/// Settings shared by every fixed-block pool, whether built directly or created on demand as
/// a size class of a [`PoolAllocator`].
#[derive(Clone, Debug)]
pub(crate) struct PoolSettings {
    pub(crate) blocks_per_chunk: usize,

    /// `Some` for bounded pools, which reserve exactly this many blocks up front.
    pub(crate) max_blocks: Option<usize>,

    pub(crate) exhaustion_policy: ExhaustionPolicy,
    pub(crate) out_of_memory_hook: Option<OutOfMemoryHook>,
    pub(crate) drop_policy: DropPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            blocks_per_chunk: DEFAULT_BLOCKS_PER_CHUNK,
            max_blocks: None,
            exhaustion_policy: ExhaustionPolicy::default(),
            out_of_memory_hook: None,
            drop_policy: DropPolicy::default(),
        }
    }
}

/// Builder for creating an instance of [`FixedBlockPool`].
///
/// The block size is mandatory, whereas other settings are optional. Use either
/// `.block_size()` to provide a size in bytes or `.block_layout_of::<T>()` to size blocks for a
/// specific type.
///
/// # Examples
///
/// ```
/// use block_pool::FixedBlockPool;
///
/// let pool = FixedBlockPool::builder().block_size(48).build();
/// assert_eq!(pool.block_size(), 48);
/// ```
///
/// A bounded pool for a constrained environment:
///
/// ```
/// use block_pool::{ExhaustionPolicy, FixedBlockPool};
///
/// let pool = FixedBlockPool::builder()
///     .block_layout_of::<[u64; 4]>()
///     .bounded(128)
///     .exhaustion_policy(ExhaustionPolicy::ReturnError)
///     .build();
///
/// assert_eq!(pool.statistics().blocks_free, 128);
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct FixedBlockPoolBuilder {
    block_size: Option<usize>,
    settings: PoolSettings,
}

impl FixedBlockPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            block_size: None,
            settings: PoolSettings::default(),
        }
    }

    /// Sets the size of each block in bytes.
    ///
    /// The effective block size is rounded up to a multiple of [`MAX_ALIGNMENT`].
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[inline]
    pub fn block_size(mut self, size: usize) -> Self {
        assert!(size > 0, "FixedBlockPool must have non-zero block size");
        self.block_size = Some(size);
        self
    }

    /// Sets the block size to fit a value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or requires stricter alignment than [`MAX_ALIGNMENT`].
    #[inline]
    pub fn block_layout_of<T>(self) -> Self {
        let layout = Layout::new::<T>();
        assert!(
            layout.align() <= MAX_ALIGNMENT,
            "FixedBlockPool cannot serve types aligned to more than {MAX_ALIGNMENT} bytes"
        );
        self.block_size(layout.size())
    }

    /// Sets how many blocks an unbounded pool reserves each time it needs to grow.
    ///
    /// Has no effect on bounded pools, which reserve all of their blocks up front.
    ///
    /// # Panics
    ///
    /// Panics if `blocks` is zero.
    #[inline]
    pub fn blocks_per_chunk(mut self, blocks: usize) -> Self {
        assert!(blocks > 0, "a pool chunk must contain at least one block");
        self.settings.blocks_per_chunk = blocks;
        self
    }

    /// Limits the pool to exactly `max_blocks` blocks, all reserved when the pool is built.
    ///
    /// A bounded pool never grows. When every block is in use, further acquisitions are
    /// handled according to the [exhaustion policy][Self::exhaustion_policy].
    ///
    /// # Panics
    ///
    /// Panics if `max_blocks` is zero.
    #[inline]
    pub fn bounded(mut self, max_blocks: usize) -> Self {
        assert!(max_blocks > 0, "a bounded pool must hold at least one block");
        self.settings.max_blocks = Some(max_blocks);
        self
    }

    /// Sets the [exhaustion policy][ExhaustionPolicy] used when a bounded pool runs out of
    /// free blocks.
    #[inline]
    pub fn exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.settings.exhaustion_policy = policy;
        self
    }

    /// Installs a hook invoked each time an acquisition fails on an exhausted pool.
    #[inline]
    pub fn out_of_memory_hook(mut self, hook: OutOfMemoryHook) -> Self {
        self.settings.out_of_memory_hook = Some(hook);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.settings.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no block size has been set using either [`block_size`](Self::block_size) or
    /// [`block_layout_of`](Self::block_layout_of).
    #[must_use]
    pub fn build(self) -> FixedBlockPool {
        let block_size = self.block_size.expect(
            "block size must be set using .block_size() or .block_layout_of::<T>() before calling .build()",
        );
        FixedBlockPool::new_inner(block_size, self.settings)
    }
}

/// Builder for creating an instance of [`PoolAllocator`].
///
/// All settings are optional. The pool settings (chunk size, bound, exhaustion handling and
/// drop policy) apply to every size class the allocator creates.
///
/// The builder is cloneable, so one configured builder can serve as a template for many
/// identically configured allocators.
///
/// # Examples
///
/// ```
/// use block_pool::{ExhaustionPolicy, PoolAllocator};
///
/// let allocator = PoolAllocator::builder()
///     .blocks_per_chunk(256)
///     .max_block_size(4096)
///     .exhaustion_policy(ExhaustionPolicy::ReturnError)
///     .build();
///
/// assert_eq!(allocator.max_request_size(), 4096 - block_pool::MAX_ALIGNMENT);
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct PoolAllocatorBuilder {
    max_block_size: usize,
    settings: PoolSettings,
}

impl PoolAllocatorBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            settings: PoolSettings::default(),
        }
    }

    /// Sets the largest block size (header included) the allocator creates a size class for.
    ///
    /// The value is rounded up to a power of two. Larger requests fail with
    /// [`Error::RequestTooLarge`][crate::Error::RequestTooLarge].
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`MIN_BLOCK_SIZE`] or cannot be rounded up to a power of
    /// two without overflowing.
    #[inline]
    pub fn max_block_size(mut self, size: usize) -> Self {
        assert!(
            size >= MIN_BLOCK_SIZE,
            "maximum block size must be at least {MIN_BLOCK_SIZE} bytes"
        );
        self.max_block_size = size
            .checked_next_power_of_two()
            .expect("maximum block size must be representable as a power of two");
        self
    }

    /// Sets how many blocks each size class reserves each time it needs to grow.
    ///
    /// # Panics
    ///
    /// Panics if `blocks` is zero.
    #[inline]
    pub fn blocks_per_chunk(mut self, blocks: usize) -> Self {
        assert!(blocks > 0, "a pool chunk must contain at least one block");
        self.settings.blocks_per_chunk = blocks;
        self
    }

    /// Limits every size class to exactly `max_blocks_per_class` blocks, reserved when the
    /// class is first used.
    ///
    /// # Panics
    ///
    /// Panics if `max_blocks_per_class` is zero.
    #[inline]
    pub fn bounded(mut self, max_blocks_per_class: usize) -> Self {
        assert!(
            max_blocks_per_class > 0,
            "a bounded pool must hold at least one block"
        );
        self.settings.max_blocks = Some(max_blocks_per_class);
        self
    }

    /// Sets the [exhaustion policy][ExhaustionPolicy] of every size class.
    #[inline]
    pub fn exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.settings.exhaustion_policy = policy;
        self
    }

    /// Installs a hook invoked each time an acquisition fails on an exhausted size class.
    #[inline]
    pub fn out_of_memory_hook(mut self, hook: OutOfMemoryHook) -> Self {
        self.settings.out_of_memory_hook = Some(hook);
        self
    }

    /// Sets the [drop policy][DropPolicy] of every size class.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.settings.drop_policy = policy;
        self
    }

    /// Builds the allocator with the specified configuration.
    ///
    /// No memory is reserved until the first acquisition from each size class.
    #[must_use]
    pub fn build(self) -> PoolAllocator {
        PoolAllocator::new_inner(self.max_block_size, self.settings)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(FixedBlockPoolBuilder: Send, Sync, Clone, std::fmt::Debug);
    assert_impl_all!(PoolAllocatorBuilder: Send, Sync, Clone, std::fmt::Debug);

    #[test]
    fn fixed_builder_new_creates_default_state() {
        let builder = FixedBlockPoolBuilder::new();
        assert!(builder.block_size.is_none());
        assert_eq!(builder.settings.blocks_per_chunk, DEFAULT_BLOCKS_PER_CHUNK);
        assert!(builder.settings.max_blocks.is_none());
        assert_eq!(builder.settings.exhaustion_policy, ExhaustionPolicy::Abort);
        assert_eq!(builder.settings.drop_policy, DropPolicy::MayFreeInUseBlocks);
    }

    #[test]
    fn block_layout_of_uses_type_size() {
        let builder = FixedBlockPoolBuilder::new().block_layout_of::<[u32; 5]>();
        assert_eq!(builder.block_size, Some(20));
    }

    #[test]
    #[should_panic]
    fn block_layout_of_zero_sized_type_panics() {
        let _builder = FixedBlockPoolBuilder::new().block_layout_of::<()>();
    }

    #[test]
    #[should_panic]
    fn block_layout_of_over_aligned_type_panics() {
        #[repr(align(64))]
        struct OverAligned(#[expect(dead_code, reason = "only the layout matters")] u8);

        let _builder = FixedBlockPoolBuilder::new().block_layout_of::<OverAligned>();
    }

    #[test]
    #[should_panic]
    fn build_without_block_size_panics() {
        let _pool = FixedBlockPoolBuilder::new().build();
    }

    #[test]
    #[should_panic]
    fn zero_blocks_per_chunk_panics() {
        let _builder = FixedBlockPoolBuilder::new().blocks_per_chunk(0);
    }

    #[test]
    #[should_panic]
    fn zero_bound_panics() {
        let _builder = FixedBlockPoolBuilder::new().bounded(0);
    }

    #[test]
    fn settings_can_be_overridden() {
        let builder = FixedBlockPoolBuilder::new()
            .block_size(8)
            .block_size(24)
            .exhaustion_policy(ExhaustionPolicy::ReturnError)
            .exhaustion_policy(ExhaustionPolicy::Abort);

        assert_eq!(builder.block_size, Some(24));
        assert_eq!(builder.settings.exhaustion_policy, ExhaustionPolicy::Abort);
    }

    #[test]
    fn allocator_max_block_size_rounds_up() {
        let builder = PoolAllocatorBuilder::new().max_block_size(1000);
        assert_eq!(builder.max_block_size, 1024);
    }

    #[test]
    #[should_panic]
    fn allocator_max_block_size_below_minimum_panics() {
        let _builder = PoolAllocatorBuilder::new().max_block_size(MIN_BLOCK_SIZE - 1);
    }

    #[test]
    fn allocator_builder_is_reusable_template() {
        let template = PoolAllocatorBuilder::new().bounded(3);

        let first = template.clone().build();
        let second = template.build();

        assert_eq!(first.statistics(), second.statistics());
    }
}
