use std::fmt;

use allocator_api2::alloc::{AllocError, Allocator};

use crate::deque::Iter;
use crate::{PolymorphicAllocator, PoolDeque};

/// A first-in first-out queue backed by a [`PoolDeque`].
///
/// # Example
///
/// ```
/// use pool_resource::make_queue;
///
/// let mut queue = make_queue::<&str>().unwrap();
/// queue.push("first");
/// queue.push("second");
///
/// assert_eq!(queue.pop(), Some("first"));
/// assert_eq!(queue.front(), Some(&"second"));
/// ```
pub struct PoolQueue<T, A: Allocator = PolymorphicAllocator> {
    items: PoolDeque<T, A>,
}

impl<T, A: Allocator> PoolQueue<T, A> {
    /// Creates an empty queue that will allocate its storage from `alloc`.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            items: PoolDeque::new_in(alloc),
        }
    }

    /// The allocator the queue allocates its storage from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        self.items.allocator()
    }

    /// The number of elements waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds an element to the back of the queue.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if storage
    /// cannot be allocated. Use [`try_push()`][Self::try_push] to handle the failure.
    pub fn push(&mut self, value: T) {
        self.items.push_back(value);
    }

    /// Adds an element to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be allocated. The queue is left unchanged.
    pub fn try_push(&mut self, value: T) -> Result<(), AllocError> {
        self.items.try_push_back(value)
    }

    /// Removes the oldest element and returns it, or `None` if the queue is empty.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// The oldest element, which [`pop()`][Self::pop] would return next.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// The most recently pushed element.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterates over the elements from oldest to newest.
    pub fn iter(&self) -> Iter<'_, T> {
        self.items.iter()
    }

    /// Removes all elements, returning their storage to the allocator.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T, A: Allocator + Default> Default for PoolQueue<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for PoolQueue<T, A> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for PoolQueue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, A: Allocator, B: Allocator> PartialEq<PoolQueue<T, B>> for PoolQueue<T, A> {
    fn eq(&self, other: &PoolQueue<T, B>) -> bool {
        self.items == other.items
    }
}

impl<T: Eq, A: Allocator> Eq for PoolQueue<T, A> {}

impl<T, A: Allocator> Extend<T> for PoolQueue<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a PoolQueue<T, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
