use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use allocator_api2::alloc::{AllocError, Allocator};
use tracing::debug;

use crate::MemoryResource;

/// An allocator that forwards every request to a shared [`MemoryResource`].
///
/// The allocator is a cheap handle: cloning it shares the resource. Two allocators compare
/// equal if their resources are the same resource, which is exactly when memory allocated by
/// one may be deallocated by the other.
///
/// This is the default allocator of every container in this crate, and it can be used with
/// any other container that accepts an [`allocator_api2`] allocator.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use allocator_api2::vec::Vec;
/// use pool_resource::{MemoryResource, PolymorphicAllocator, PoolResource};
///
/// let resource = Arc::new(PoolResource::default());
/// let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
/// let alloc = PolymorphicAllocator::new(shared);
///
/// let mut numbers = Vec::new_in(alloc.clone());
/// numbers.extend([1_u32, 2, 3]);
///
/// assert_eq!(resource.statistics().blocks_in_use, 1);
/// assert_eq!(alloc, PolymorphicAllocator::new(resource));
/// ```
#[derive(Clone, Debug)]
pub struct PolymorphicAllocator {
    resource: Arc<dyn MemoryResource>,
}

impl PolymorphicAllocator {
    /// Creates an allocator that allocates from `resource`.
    #[must_use]
    #[inline]
    pub fn new(resource: Arc<dyn MemoryResource>) -> Self {
        Self { resource }
    }

    /// The resource this allocator allocates from.
    #[must_use]
    #[inline]
    pub fn resource(&self) -> &Arc<dyn MemoryResource> {
        &self.resource
    }
}

// SAFETY: Memory blocks stay valid until deallocated because the allocator keeps its resource
// alive and resources only reclaim memory on deallocate or drop. Clones share the resource, so
// any clone can deallocate memory allocated by another.
unsafe impl Allocator for PolymorphicAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        match self.resource.allocate(layout.size(), layout.align()) {
            Ok(ptr) => Ok(NonNull::slice_from_raw_parts(ptr, layout.size())),
            Err(error) => {
                debug!(
                    resource = %self.resource.id(),
                    size = layout.size(),
                    align = layout.align(),
                    %error,
                    "memory resource refused allocation"
                );
                Err(AllocError)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller guarantees the memory was allocated by this allocator (or a clone,
        // which shares the resource) with this layout.
        unsafe { self.resource.deallocate(ptr, layout.size(), layout.align()) };
    }
}

impl PartialEq for PolymorphicAllocator {
    fn eq(&self, other: &Self) -> bool {
        self.resource.is_equal(&*other.resource)
    }
}

impl Eq for PolymorphicAllocator {}
