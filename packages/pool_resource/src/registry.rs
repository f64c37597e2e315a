use std::alloc::Layout;
use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::{Arc, LazyLock};

use block_pool::{
    Error, MAX_ALIGNMENT, PoolAllocator, PoolAllocatorBuilder, PoolStatistics, Result,
};
use foldhash::fast::RandomState;
use tracing::debug;

use crate::{
    MemoryResource, PolymorphicAllocator, PoolDeque, PoolList, PoolMap, PoolQueue, PoolResource,
    PoolSet, PoolString, PoolWideString,
};

static GLOBAL: LazyLock<ResourceRegistry> = LazyLock::new(ResourceRegistry::new);

/// Owns one pool-backed memory resource per container type and hands out containers bound to
/// them.
///
/// The first request for a container type creates its resource, backed by a fresh
/// [`PoolAllocator`]. Every later request for the same type shares that resource, so all
/// containers of one type draw from the same pools while containers of different types never
/// share memory.
///
/// Resources live as long as the registry. A container keeps its resource alive on its own, so
/// containers may outlive the registry that created them.
///
/// Most programs use the process-wide registry returned by [`global()`][Self::global], usually
/// through the `make_*` functions of this crate. Separate registries are useful to isolate
/// subsystems or tests from each other.
///
/// # Example
///
/// ```
/// use pool_resource::ResourceRegistry;
///
/// let registry = ResourceRegistry::new();
///
/// let mut first = registry.list::<u64>().unwrap();
/// let second = registry.list::<u64>().unwrap();
/// first.push_back(1);
///
/// assert_eq!(first.allocator(), second.allocator());
/// assert_eq!(registry.resource_count(), 1);
/// assert_eq!(registry.statistics().blocks_in_use, 1);
/// ```
pub struct ResourceRegistry {
    resources: scc::HashMap<TypeId, Arc<PoolResource>, RandomState>,
    template: PoolAllocatorBuilder,
}

impl ResourceRegistry {
    /// Creates an empty registry whose resources use the default [`PoolAllocator`]
    /// configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a new registry.
    #[inline]
    pub fn builder() -> ResourceRegistryBuilder {
        ResourceRegistryBuilder::new()
    }

    /// The process-wide registry used by the `make_*` functions.
    #[must_use]
    #[inline]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// The resource that containers of type `C` allocate from, created on first use.
    ///
    /// Concurrent first requests for the same type create exactly one resource.
    pub fn resource_for<C: 'static>(&self) -> Arc<PoolResource> {
        let key = TypeId::of::<C>();

        if let Some(resource) = self.resources.read(&key, |_, resource| Arc::clone(resource)) {
            return resource;
        }

        let entry = self.resources.entry(key).or_insert_with(|| {
            let resource = PoolResource::new(self.template.clone().build());

            debug!(
                container = type_name::<C>(),
                resource = %resource.id(),
                "registered pool resource"
            );

            Arc::new(resource)
        });

        Arc::clone(entry.get())
    }

    /// An allocator for the resource that containers of type `C` allocate from.
    pub fn allocator_for<C: 'static>(&self) -> PolymorphicAllocator {
        PolymorphicAllocator::new(self.resource_for::<C>())
    }

    /// The number of container types that have a resource in this registry.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Combined statistics of the pools behind every resource in the registry.
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        let mut total = PoolStatistics::default();

        self.resources.scan(|_, resource| {
            total = total.merge(resource.statistics());
        });

        total
    }

    /// Creates an empty list whose nodes come from the pool shared by all `PoolList<T>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlignmentUnsupported`] if a list node of `T` needs stricter alignment
    /// than pool blocks provide, or [`Error::RequestTooLarge`] if a node does not fit in the
    /// largest block.
    pub fn list<T: 'static>(&self) -> Result<PoolList<T>> {
        let alloc = self.checked_allocator::<PoolList<T>>(PoolList::<T>::node_layout())?;
        Ok(PoolList::new_in(alloc))
    }

    /// Creates an empty map whose nodes come from the pool shared by all `PoolMap<K, V>`.
    ///
    /// # Errors
    ///
    /// As for [`list()`][Self::list], with respect to the node holding a key and a value.
    pub fn map<K: 'static, V: 'static>(&self) -> Result<PoolMap<K, V>> {
        let alloc = self.checked_allocator::<PoolMap<K, V>>(PoolMap::<K, V>::node_layout())?;
        Ok(PoolMap::new_in(alloc))
    }

    /// Creates an empty set whose nodes come from the pool shared by all `PoolSet<T>`.
    ///
    /// # Errors
    ///
    /// As for [`list()`][Self::list], with respect to the node holding an element.
    pub fn set<T: 'static>(&self) -> Result<PoolSet<T>> {
        let alloc = self.checked_allocator::<PoolSet<T>>(PoolMap::<T, ()>::node_layout())?;
        Ok(PoolSet::new_in(alloc))
    }

    /// Creates an empty deque whose segments come from the pool shared by all `PoolDeque<T>`.
    ///
    /// # Errors
    ///
    /// As for [`list()`][Self::list], with respect to a segment of elements.
    pub fn deque<T: 'static>(&self) -> Result<PoolDeque<T>> {
        let alloc = self.checked_allocator::<PoolDeque<T>>(PoolDeque::<T>::segment_layout())?;
        Ok(PoolDeque::new_in(alloc))
    }

    /// Creates an empty queue whose storage comes from the pool shared by all `PoolQueue<T>`.
    ///
    /// # Errors
    ///
    /// As for [`deque()`][Self::deque].
    pub fn queue<T: 'static>(&self) -> Result<PoolQueue<T>> {
        let alloc = self.checked_allocator::<PoolQueue<T>>(PoolDeque::<T>::segment_layout())?;
        Ok(PoolQueue::new_in(alloc))
    }

    /// Creates a string holding a copy of `value`, with its buffer from the pool shared by all
    /// [`PoolString`]s.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTooLarge`] if `value` does not fit in the largest block.
    pub fn string(&self, value: &str) -> Result<PoolString> {
        let resource = self.resource_for::<PoolString>();
        check_size(&resource, value.len())?;

        Ok(PoolString::from_str_in(value, PolymorphicAllocator::new(resource)))
    }

    /// Creates a wide string holding the UTF-16 encoding of `value`, with its buffer from the
    /// pool shared by all [`PoolWideString`]s.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTooLarge`] if the encoded `value` does not fit in the largest
    /// block.
    pub fn wide_string(&self, value: &str) -> Result<PoolWideString> {
        let resource = self.resource_for::<PoolWideString>();

        let units = value.encode_utf16().count();
        check_size(&resource, units.saturating_mul(size_of::<u16>()))?;

        Ok(PoolWideString::from_str_in(value, PolymorphicAllocator::new(resource)))
    }

    fn checked_allocator<C: 'static>(&self, layout: Layout) -> Result<PolymorphicAllocator> {
        // Rejected before the resource exists, so over-aligned types leave no entry behind.
        if layout.align() > MAX_ALIGNMENT {
            return Err(Error::AlignmentUnsupported {
                requested: layout.align(),
                maximum: MAX_ALIGNMENT,
            });
        }

        let resource = self.resource_for::<C>();
        check_size(&resource, layout.size())?;

        Ok(PolymorphicAllocator::new(resource))
    }
}

fn check_size(resource: &PoolResource, size: usize) -> Result<()> {
    let maximum = resource.source().max_request_size();

    if size > maximum {
        return Err(Error::RequestTooLarge {
            requested: size,
            maximum,
        });
    }

    Ok(())
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceRegistry {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resource_count", &self.resource_count())
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// Builder for creating an instance of [`ResourceRegistry`].
///
/// # Example
///
/// ```
/// use pool_resource::{ExhaustionPolicy, PoolAllocator, ResourceRegistry};
///
/// let registry = ResourceRegistry::builder()
///     .allocator(
///         PoolAllocator::builder()
///             .bounded(4)
///             .exhaustion_policy(ExhaustionPolicy::ReturnError),
///     )
///     .build();
///
/// let mut list = registry.list::<u8>().unwrap();
/// for value in 0..4 {
///     list.try_push_back(value).unwrap();
/// }
/// assert!(list.try_push_back(4).is_err());
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct ResourceRegistryBuilder {
    template: PoolAllocatorBuilder,
}

impl ResourceRegistryBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            template: PoolAllocator::builder(),
        }
    }

    /// Sets the configuration of the [`PoolAllocator`] created for each container type.
    ///
    /// Every resource gets its own allocator built from this template, so limits such as
    /// [`bounded()`][PoolAllocatorBuilder::bounded] apply to each container type separately.
    #[inline]
    pub fn allocator(mut self, template: PoolAllocatorBuilder) -> Self {
        self.template = template;
        self
    }

    /// Builds an empty registry with the specified configuration.
    #[must_use]
    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            resources: scc::HashMap::with_hasher(RandomState::default()),
            template: self.template,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::ExhaustionPolicy;

    assert_impl_all!(ResourceRegistry: Send, Sync, fmt::Debug, Default);
    assert_impl_all!(ResourceRegistryBuilder: Send, Sync, Clone, fmt::Debug);

    #[allow(dead_code, reason = "only the layout of this type is used")]
    #[derive(Debug)]
    #[repr(align(64))]
    struct CacheLine([u8; 64]);

    #[test]
    fn same_type_shares_one_resource() {
        let registry = ResourceRegistry::new();

        let first = registry.resource_for::<PoolList<u32>>();
        let second = registry.resource_for::<PoolList<u32>>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.resource_count(), 1);
    }

    #[test]
    fn different_types_get_different_resources() {
        let registry = ResourceRegistry::new();

        let list = registry.list::<u32>().unwrap();
        let other_list = registry.list::<u64>().unwrap();
        let map = registry.map::<u32, u32>().unwrap();
        let set = registry.set::<u32>().unwrap();

        assert_ne!(list.allocator(), other_list.allocator());
        assert_ne!(list.allocator(), map.allocator());
        assert_ne!(map.allocator(), set.allocator());
        assert_eq!(registry.resource_count(), 4);
    }

    #[test]
    fn deque_and_queue_are_separate_types() {
        let registry = ResourceRegistry::new();

        let deque = registry.deque::<u16>().unwrap();
        let queue = registry.queue::<u16>().unwrap();

        assert!(
            !deque
                .allocator()
                .resource()
                .is_equal(queue.allocator().resource().as_ref())
        );
    }

    #[test]
    fn separate_registries_do_not_share() {
        let first = ResourceRegistry::new();
        let second = ResourceRegistry::new();

        let mut list = first.list::<u8>().unwrap();
        list.push_back(1);
        let other = second.list::<u8>().unwrap();

        assert_ne!(list.allocator(), other.allocator());
        assert_eq!(first.statistics().blocks_in_use, 1);
        assert_eq!(second.statistics().blocks_in_use, 0);
    }

    #[test]
    fn over_aligned_elements_are_rejected() {
        let registry = ResourceRegistry::new();

        let error = registry.list::<CacheLine>().unwrap_err();
        assert_eq!(
            error,
            Error::AlignmentUnsupported {
                requested: 64,
                maximum: MAX_ALIGNMENT,
            }
        );

        registry.map::<u8, CacheLine>().unwrap_err();
        registry.set::<CacheLine>().unwrap_err();
        registry.deque::<CacheLine>().unwrap_err();
        registry.queue::<CacheLine>().unwrap_err();

        assert_eq!(registry.resource_count(), 0);
    }

    #[test]
    fn oversized_elements_are_rejected() {
        let registry = ResourceRegistry::builder()
            .allocator(PoolAllocator::builder().max_block_size(256))
            .build();

        registry.list::<[u8; 200]>().unwrap();

        let error = registry.list::<[u8; 300]>().unwrap_err();
        assert!(matches!(error, Error::RequestTooLarge { maximum: 240, .. }));

        let error = registry.string(&"x".repeat(241)).unwrap_err();
        assert!(matches!(error, Error::RequestTooLarge { requested: 241, .. }));

        let error = registry.wide_string(&"x".repeat(121)).unwrap_err();
        assert!(matches!(error, Error::RequestTooLarge { requested: 242, .. }));
    }

    #[test]
    fn strings_use_their_own_resources() {
        let registry = ResourceRegistry::new();

        let narrow = registry.string("narrow").unwrap();
        let wide = registry.wide_string("wide").unwrap();

        assert_eq!(narrow, "narrow");
        assert_eq!(wide.to_string_lossy(), "wide");
        assert_eq!(registry.resource_count(), 2);
        assert_eq!(registry.statistics().blocks_in_use, 2);
    }

    #[test]
    fn template_applies_per_type() {
        let registry = ResourceRegistry::builder()
            .allocator(
                PoolAllocator::builder()
                    .bounded(1)
                    .exhaustion_policy(ExhaustionPolicy::ReturnError),
            )
            .build();

        let mut bytes = registry.list::<u8>().unwrap();
        let mut words = registry.list::<u16>().unwrap();

        bytes.try_push_back(1).unwrap();
        words.try_push_back(1).unwrap();
        bytes.try_push_back(2).unwrap_err();
    }

    #[test]
    fn concurrent_first_use_creates_one_resource() {
        let registry = ResourceRegistry::new();

        let resources: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.resource_for::<PoolMap<u64, u64>>()))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(registry.resource_count(), 1);
        assert!(
            resources
                .iter()
                .all(|resource| Arc::ptr_eq(resource, &resources[0]))
        );
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(std::ptr::eq(
            ResourceRegistry::global(),
            ResourceRegistry::global()
        ));
    }
}
