//! An ordered set built on [`PoolMap`], and its iterator.

use std::borrow::Borrow;
use std::fmt;
use std::iter::FusedIterator;

use allocator_api2::alloc::{AllocError, Allocator};

use crate::map::Keys;
use crate::{PolymorphicAllocator, PoolMap};

/// An ordered set that allocates each element's node from an allocator.
///
/// Built on [`PoolMap`], so it shares the map's balancing and allocation behavior.
///
/// # Example
///
/// ```
/// use pool_resource::make_set;
///
/// let mut set = make_set::<u8>().unwrap();
/// assert!(set.insert(3));
/// assert!(set.insert(1));
/// assert!(!set.insert(3));
///
/// assert_eq!(set.iter().copied().collect::<Vec<_>>(), [1, 3]);
/// ```
pub struct PoolSet<T, A: Allocator = PolymorphicAllocator> {
    map: PoolMap<T, (), A>,
}

impl<T, A: Allocator> PoolSet<T, A> {
    /// Creates an empty set that will allocate its nodes from `alloc`.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            map: PoolMap::new_in(alloc),
        }
    }

    /// The allocator the set allocates its nodes from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        self.map.allocator()
    }

    /// The number of elements in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the set contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Adds a value to the set. Returns whether the value was newly inserted.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if a new node
    /// cannot be allocated. Use [`try_insert()`][Self::try_insert] to handle the failure.
    pub fn insert(&mut self, value: T) -> bool
    where
        T: Ord,
    {
        self.map.insert(value, ()).is_none()
    }

    /// Adds a value to the set. Returns whether the value was newly inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the value was absent and a new node cannot be allocated.
    pub fn try_insert(&mut self, value: T) -> Result<bool, AllocError>
    where
        T: Ord,
    {
        Ok(self.map.try_insert(value, ())?.is_none())
    }

    /// Whether the set contains `value`.
    #[must_use]
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.contains_key(value)
    }

    /// Removes `value` from the set. Returns whether it was present.
    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.remove(value).is_some()
    }

    /// The smallest element, if any.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.map.first_key_value().map(|(value, ())| value)
    }

    /// The largest element, if any.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.map.last_key_value().map(|(value, ())| value)
    }

    /// Iterates over the elements in ascending order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.map.keys(),
        }
    }

    /// Removes all elements, returning their nodes to the allocator.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<T, A: Allocator + Default> Default for PoolSet<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T: Ord + Clone, A: Allocator + Clone> Clone for PoolSet<T, A> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for PoolSet<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, A: Allocator, B: Allocator> PartialEq<PoolSet<T, B>> for PoolSet<T, A> {
    fn eq(&self, other: &PoolSet<T, B>) -> bool {
        self.map == other.map
    }
}

impl<T: Eq, A: Allocator> Eq for PoolSet<T, A> {}

impl<T: Ord, A: Allocator> Extend<T> for PoolSet<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a PoolSet<T, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the elements of a [`PoolSet`] in ascending order.
pub struct Iter<'a, T> {
    inner: Keys<'a, T, ()>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> fmt::Debug for Iter<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.inner.len())
            .finish_non_exhaustive()
    }
}
