use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use block_pool::{BlockSource, Error, MAX_ALIGNMENT, PoolAllocator, PoolStatistics, Result};
use tracing::error;

/// Identifies a memory resource for the lifetime of the process.
///
/// Every resource receives a distinct identifier when it is created. Identifiers are never
/// reused, so two resources compare equal through [`MemoryResource::is_equal()`] only if they
/// are the same resource.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(0);

impl ResourceId {
    /// Allocates a new identifier, distinct from every identifier allocated before it.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// The capability an allocator-aware container needs from its memory backend.
///
/// Containers in this crate do not use this trait directly. They allocate through a
/// [`PolymorphicAllocator`][crate::PolymorphicAllocator], which forwards to the memory resource
/// it wraps.
pub trait MemoryResource: Send + Sync + fmt::Debug {
    /// The identity of this resource.
    fn id(&self) -> ResourceId;

    /// Allocates `bytes` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot provide memory with the requested size and
    /// alignment.
    fn allocate(&self, bytes: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Returns memory to the resource.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`allocate()`][Self::allocate] on
    /// this same resource with the same `bytes` and `alignment`, that it has not been
    /// deallocated since, and that the memory is not used after this call.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, alignment: usize);

    /// Whether memory allocated from `self` can be deallocated through `other` and vice versa.
    ///
    /// Only the identical resource qualifies, even if another resource serves the same sizes
    /// from an identically configured pool.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        self.id() == other.id()
    }
}

/// A [`MemoryResource`] that serves memory from a fixed-block pool.
///
/// By default the backing [`BlockSource`] is a [`PoolAllocator`], which can serve allocations of
/// any size up to its maximum block size. Any other block source can be used, as long as it
/// returns blocks aligned to [`MAX_ALIGNMENT`].
///
/// The resource validates the alignment of every request. Requests for alignment stricter than
/// [`MAX_ALIGNMENT`] are rejected with [`Error::AlignmentUnsupported`] without touching the
/// pool. Memory returned by the pool is checked against the requested alignment before it is
/// handed out.
///
/// Several resources may share one block source. They remain distinct resources nonetheless.
///
/// # Example
///
/// ```
/// use pool_resource::{MemoryResource, PoolResource};
///
/// let resource = PoolResource::default();
///
/// let ptr = resource.allocate(24, 8).unwrap();
/// assert_eq!(resource.statistics().blocks_in_use, 1);
///
/// // SAFETY: The memory came from this resource with the same size and alignment.
/// unsafe { resource.deallocate(ptr, 24, 8) };
/// assert_eq!(resource.statistics().blocks_in_use, 0);
///
/// assert!(resource.allocate(24, 64).is_err());
/// ```
#[derive(Debug)]
pub struct PoolResource<B = PoolAllocator> {
    id: ResourceId,
    source: Arc<B>,
}

impl<B: BlockSource> PoolResource<B> {
    /// Creates a resource that owns `source`.
    #[must_use]
    pub fn new(source: B) -> Self {
        Self::with_shared_source(Arc::new(source))
    }

    /// Creates a resource over a block source that may also back other resources.
    #[must_use]
    pub fn with_shared_source(source: Arc<B>) -> Self {
        Self {
            id: ResourceId::next(),
            source,
        }
    }

    /// The block source this resource allocates from.
    #[must_use]
    #[inline]
    pub fn source(&self) -> &Arc<B> {
        &self.source
    }

    /// A snapshot of the backing block source's usage.
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        self.source.statistics()
    }
}

impl Default for PoolResource {
    fn default() -> Self {
        Self::new(PoolAllocator::new())
    }
}

impl<B: BlockSource> MemoryResource for PoolResource<B> {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
            return Err(Error::AlignmentUnsupported {
                requested: alignment,
                maximum: MAX_ALIGNMENT,
            });
        }

        let ptr = self.source.acquire(bytes)?;

        let address = ptr.addr().get();
        if address.trailing_zeros() < alignment.trailing_zeros() {
            // SAFETY: The block was acquired from this source just above and was never handed
            // out to anyone.
            unsafe { self.source.release(ptr) };

            error!(
                resource = %self.id,
                address,
                alignment,
                "block source returned misaligned memory"
            );

            return Err(Error::AllocatorCorruption { address, alignment });
        }

        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _bytes: usize, _alignment: usize) {
        // SAFETY: The caller guarantees the memory came from allocate() on this resource, which
        // only hands out blocks acquired from this source.
        unsafe { self.source.release(ptr) };
    }
}
