//! A doubly linked list with one allocation per element, and its iterators.

use std::alloc::Layout;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator};

use crate::PolymorphicAllocator;
use crate::node::{allocate_node, take_node, try_allocate_node};

type Link<T> = Option<NonNull<Node<T>>>;

struct Node<T> {
    value: T,
    prev: Link<T>,
    next: Link<T>,
}

/// A doubly linked list that allocates each element's node from an allocator.
///
/// With the default [`PolymorphicAllocator`], every node comes from the memory resource the
/// allocator wraps. All nodes of a list have the same size, so a pool-backed list draws all of
/// its memory from a single size class.
///
/// # Example
///
/// ```
/// use pool_resource::make_list;
///
/// let mut list = make_list::<i32>().unwrap();
/// list.push_back(2);
/// list.push_back(3);
/// list.push_front(1);
///
/// assert_eq!(list.iter().copied().collect::<Vec<_>>(), [1, 2, 3]);
/// assert_eq!(list.pop_back(), Some(3));
/// ```
pub struct PoolList<T, A: Allocator = PolymorphicAllocator> {
    head: Link<T>,
    tail: Link<T>,
    len: usize,
    alloc: A,

    _owns: PhantomData<T>,
}

impl<T, A: Allocator> PoolList<T, A> {
    /// Creates an empty list that will allocate its nodes from `alloc`.
    ///
    /// No memory is allocated until the first element is added.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            alloc,
            _owns: PhantomData,
        }
    }

    /// The allocator the list allocates its nodes from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Layout of the single allocation made for each element.
    pub(crate) fn node_layout() -> Layout {
        Layout::new::<Node<T>>()
    }

    /// The number of elements in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an element to the back of the list.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if the node
    /// cannot be allocated. Use [`try_push_back()`][Self::try_push_back] to handle the failure.
    pub fn push_back(&mut self, value: T) {
        let node = allocate_node(&self.alloc, self.back_node(value));
        self.link_back(node);
    }

    /// Appends an element to the back of the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be allocated. The value is dropped and the list is
    /// left unchanged.
    pub fn try_push_back(&mut self, value: T) -> Result<(), AllocError> {
        let node = try_allocate_node(&self.alloc, self.back_node(value))?;
        self.link_back(node);
        Ok(())
    }

    /// Prepends an element to the front of the list.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if the node
    /// cannot be allocated. Use [`try_push_front()`][Self::try_push_front] to handle the
    /// failure.
    pub fn push_front(&mut self, value: T) {
        let node = allocate_node(&self.alloc, self.front_node(value));
        self.link_front(node);
    }

    /// Prepends an element to the front of the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be allocated. The value is dropped and the list is
    /// left unchanged.
    pub fn try_push_front(&mut self, value: T) -> Result<(), AllocError> {
        let node = try_allocate_node(&self.alloc, self.front_node(value))?;
        self.link_front(node);
        Ok(())
    }

    fn back_node(&self, value: T) -> Node<T> {
        Node {
            value,
            prev: self.tail,
            next: None,
        }
    }

    fn front_node(&self, value: T) -> Node<T> {
        Node {
            value,
            prev: None,
            next: self.head,
        }
    }

    fn link_back(&mut self, node: NonNull<Node<T>>) {
        match self.tail {
            // SAFETY: The tail is a live node owned by this list and no reference to it exists.
            Some(mut tail) => unsafe { tail.as_mut().next = Some(node) },
            None => self.head = Some(node),
        }

        self.tail = Some(node);
        // Cannot overflow because every element occupies memory.
        self.len = self.len.wrapping_add(1);
    }

    fn link_front(&mut self, node: NonNull<Node<T>>) {
        match self.head {
            // SAFETY: The head is a live node owned by this list and no reference to it exists.
            Some(mut head) => unsafe { head.as_mut().prev = Some(node) },
            None => self.tail = Some(node),
        }

        self.head = Some(node);
        // Cannot overflow because every element occupies memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Removes the first element and returns it, or `None` if the list is empty.
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;

        // SAFETY: The head is a live node allocated by this list's allocator. It is unlinked
        // below, so nothing references it afterwards.
        let node = unsafe { take_node(&self.alloc, head) };

        self.head = node.next;
        match self.head {
            // SAFETY: The new head is a live node owned by this list.
            Some(mut new_head) => unsafe { new_head.as_mut().prev = None },
            None => self.tail = None,
        }

        // Cannot underflow because the list was not empty.
        self.len = self.len.wrapping_sub(1);

        Some(node.value)
    }

    /// Removes the last element and returns it, or `None` if the list is empty.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;

        // SAFETY: The tail is a live node allocated by this list's allocator. It is unlinked
        // below, so nothing references it afterwards.
        let node = unsafe { take_node(&self.alloc, tail) };

        self.tail = node.prev;
        match self.tail {
            // SAFETY: The new tail is a live node owned by this list.
            Some(mut new_tail) => unsafe { new_tail.as_mut().next = None },
            None => self.head = None,
        }

        // Cannot underflow because the list was not empty.
        self.len = self.len.wrapping_sub(1);

        Some(node.value)
    }

    /// The first element, or `None` if the list is empty.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        // SAFETY: The node is live for as long as the list is borrowed.
        self.head.map(|node| unsafe { &node.as_ref().value })
    }

    /// The first element, or `None` if the list is empty.
    #[must_use]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        // SAFETY: The node is live and exclusively borrowed for as long as the list is.
        self.head.map(|mut node| unsafe { &mut node.as_mut().value })
    }

    /// The last element, or `None` if the list is empty.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        // SAFETY: The node is live for as long as the list is borrowed.
        self.tail.map(|node| unsafe { &node.as_ref().value })
    }

    /// The last element, or `None` if the list is empty.
    #[must_use]
    pub fn back_mut(&mut self) -> Option<&mut T> {
        // SAFETY: The node is live and exclusively borrowed for as long as the list is.
        self.tail.map(|mut node| unsafe { &mut node.as_mut().value })
    }

    /// Iterates over the elements from front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            head: self.head,
            tail: self.tail,
            remaining: self.len,
            _list: PhantomData,
        }
    }

    /// Iterates over the elements from front to back, allowing them to be modified.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            head: self.head,
            tail: self.tail,
            remaining: self.len,
            _list: PhantomData,
        }
    }

    /// Whether the list contains an element equal to `value`.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|element| element == value)
    }

    /// Removes all elements, returning their nodes to the allocator.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }
}

impl<T, A: Allocator + Default> Default for PoolList<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T, A: Allocator> Drop for PoolList<T, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for PoolList<T, A> {
    fn clone(&self) -> Self {
        let mut list = Self::new_in(self.alloc.clone());
        list.extend(self.iter().cloned());
        list
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for PoolList<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, A: Allocator, B: Allocator> PartialEq<PoolList<T, B>> for PoolList<T, A> {
    fn eq(&self, other: &PoolList<T, B>) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<T: Eq, A: Allocator> Eq for PoolList<T, A> {}

impl<T, A: Allocator> Extend<T> for PoolList<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a PoolList<T, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a mut PoolList<T, A> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T, A: Allocator> IntoIterator for PoolList<T, A> {
    type Item = T;
    type IntoIter = IntoIter<T, A>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { list: self }
    }
}

// SAFETY: The list owns its nodes exclusively, so sending the list sends the elements and the
// allocator, both of which are Send.
unsafe impl<T: Send, A: Allocator + Send> Send for PoolList<T, A> {}

// SAFETY: Shared access to the list only gives shared access to the elements and the allocator,
// both of which are Sync.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for PoolList<T, A> {}

/// Iterator over shared references to the elements of a [`PoolList`].
pub struct Iter<'a, T> {
    head: Link<T>,
    tail: Link<T>,
    remaining: usize,
    _list: PhantomData<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let node = self.head?;
        // SAFETY: The list is borrowed for 'a, so its nodes stay live and unmodified.
        let node = unsafe { node.as_ref() };

        self.head = node.next;
        self.remaining = self.remaining.wrapping_sub(1);

        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let node = self.tail?;
        // SAFETY: The list is borrowed for the iterator's lifetime, so its nodes stay live and
        // unmodified.
        let node = unsafe { node.as_ref() };

        self.tail = node.prev;
        self.remaining = self.remaining.wrapping_sub(1);

        Some(&node.value)
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}

impl<T> fmt::Debug for Iter<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

// SAFETY: The iterator only hands out shared references to elements, which is safe to do from
// any thread when the elements are Sync.
unsafe impl<T: Sync> Send for Iter<'_, T> {}

// SAFETY: As above.
unsafe impl<T: Sync> Sync for Iter<'_, T> {}

/// Iterator over exclusive references to the elements of a [`PoolList`].
pub struct IterMut<'a, T> {
    head: Link<T>,
    tail: Link<T>,
    remaining: usize,
    _list: PhantomData<&'a mut Node<T>>,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut node = self.head?;
        // SAFETY: The list is exclusively borrowed for 'a and every node is yielded at most
        // once, so no two references to the same element exist.
        let node = unsafe { node.as_mut() };

        self.head = node.next;
        self.remaining = self.remaining.wrapping_sub(1);

        Some(&mut node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for IterMut<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut node = self.tail?;
        // SAFETY: The list is exclusively borrowed for the iterator's lifetime and every node
        // is yielded at most once, so no two references to the same element exist.
        let node = unsafe { node.as_mut() };

        self.tail = node.prev;
        self.remaining = self.remaining.wrapping_sub(1);

        Some(&mut node.value)
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

impl<T> fmt::Debug for IterMut<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterMut")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

// SAFETY: The iterator hands out exclusive references to elements, which may be sent to another
// thread when the elements are Send.
unsafe impl<T: Send> Send for IterMut<'_, T> {}

// SAFETY: Shared access to the iterator gives no access to the elements.
unsafe impl<T: Sync> Sync for IterMut<'_, T> {}

/// Owning iterator over the elements of a [`PoolList`].
pub struct IntoIter<T, A: Allocator = PolymorphicAllocator> {
    list: PoolList<T, A>,
}

impl<T, A: Allocator> Iterator for IntoIter<T, A> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.list.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.list.len, Some(self.list.len))
    }
}

impl<T, A: Allocator> DoubleEndedIterator for IntoIter<T, A> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.list.pop_back()
    }
}

impl<T, A: Allocator> ExactSizeIterator for IntoIter<T, A> {}
impl<T, A: Allocator> FusedIterator for IntoIter<T, A> {}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for IntoIter<T, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IntoIter").field(&self.list).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use allocator_api2::alloc::Global;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{ExhaustionPolicy, MemoryResource, PoolAllocator, PoolResource};

    assert_impl_all!(PoolList<u32>: Send, Sync, Clone, fmt::Debug);
    assert_not_impl_any!(PoolList<Rc<u32>>: Send, Sync);
    assert_impl_all!(Iter<'static, u32>: Send, Sync, Clone, fmt::Debug);
    assert_impl_all!(IterMut<'static, u32>: fmt::Debug);
    assert_impl_all!(IntoIter<u32>: fmt::Debug);

    fn pool_list<T>() -> (PoolList<T>, Arc<PoolResource>) {
        let resource = Arc::new(PoolResource::default());
        let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
        let list = PoolList::new_in(PolymorphicAllocator::new(shared));
        (list, resource)
    }

    #[test]
    fn push_and_pop_at_both_ends() {
        let (mut list, _resource) = pool_list();

        list.push_back(2);
        list.push_front(1);
        list.push_back(3);

        assert_eq!(list.len(), 3);
        assert_eq!(list.front(), Some(&1));
        assert_eq!(list.back(), Some(&3));

        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.pop_back(), Some(3));
        assert_eq!(list.pop_back(), Some(2));
        assert_eq!(list.pop_back(), None);
        assert_eq!(list.pop_front(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn iterators_report_remaining_elements() {
        let mut list = PoolList::new_in(Global);
        list.extend([1, 2, 3]);

        let mut iter = list.iter();
        iter.next();
        assert_eq!(format!("{iter:?}"), "Iter { remaining: 2, .. }");
        assert_eq!(format!("{:?}", list.iter_mut()), "IterMut { remaining: 3, .. }");
    }

    #[test]
    fn every_node_comes_from_the_resource() {
        let (mut list, resource) = pool_list();

        list.extend(0..100_u64);
        assert_eq!(resource.statistics().blocks_in_use, 100);

        list.clear();
        assert_eq!(resource.statistics().blocks_in_use, 0);

        list.extend(0..10_u64);
        drop(list);
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn iterates_in_both_directions() {
        let (mut list, _resource) = pool_list();
        list.extend(1..=5);

        let forward: Vec<i32> = list.iter().copied().collect();
        let backward: Vec<i32> = list.iter().rev().copied().collect();

        assert_eq!(forward, [1, 2, 3, 4, 5]);
        assert_eq!(backward, [5, 4, 3, 2, 1]);

        let mut iter = list.iter();
        assert_eq!(iter.len(), 5);
        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next_back(), Some(&5));
        assert_eq!(iter.len(), 3);
        assert_eq!(iter.collect::<Vec<_>>(), [&2, &3, &4]);
    }

    #[test]
    fn meeting_iterators_do_not_repeat_elements() {
        let (mut list, _resource) = pool_list();
        list.extend([1, 2]);

        let mut iter = list.iter();
        assert_eq!(iter.next_back(), Some(&2));
        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next_back(), None);
    }

    #[test]
    fn iter_mut_modifies_in_place() {
        let (mut list, _resource) = pool_list();
        list.extend(1..=3);

        for value in &mut list {
            *value *= 10;
        }
        if let Some(front) = list.front_mut() {
            *front += 1;
        }
        if let Some(back) = list.back_mut() {
            *back += 2;
        }

        assert_eq!(list.iter().copied().collect::<Vec<_>>(), [11, 20, 32]);
    }

    #[test]
    fn into_iter_consumes_and_frees() {
        let (mut list, resource) = pool_list();
        list.extend(["a".to_owned(), "b".to_owned(), "c".to_owned()]);

        let mut iter = list.into_iter();
        assert_eq!(iter.next_back().as_deref(), Some("c"));
        assert_eq!(resource.statistics().blocks_in_use, 2);

        let rest: Vec<String> = iter.collect();
        assert_eq!(rest, ["a", "b"]);
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn clone_shares_allocator() {
        let (mut list, resource) = pool_list();
        list.extend([1, 2, 3]);

        let copy = list.clone();

        assert_eq!(copy, list);
        assert_eq!(copy.allocator(), list.allocator());
        assert_eq!(resource.statistics().blocks_in_use, 6);
    }

    #[test]
    fn lists_compare_across_allocators() {
        let (mut pooled, _resource) = pool_list();
        pooled.extend([1, 2, 3]);

        let mut heap = PoolList::new_in(Global);
        heap.extend([1, 2, 3]);

        assert!(pooled == heap);

        heap.push_back(4);
        assert!(pooled != heap);
    }

    #[test]
    fn contains_finds_elements() {
        let (mut list, _resource) = pool_list();
        list.extend([3, 5, 7]);

        assert!(list.contains(&5));
        assert!(!list.contains(&4));
    }

    #[test]
    fn elements_are_dropped_with_list() {
        struct CountsDrops(Rc<Cell<usize>>);

        impl Drop for CountsDrops {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));

        let mut list = PoolList::new_in(Global);
        for _ in 0..4 {
            list.push_back(CountsDrops(Rc::clone(&drops)));
        }

        drop(list.pop_front());
        assert_eq!(drops.get(), 1);

        drop(list);
        assert_eq!(drops.get(), 4);
    }

    #[test]
    fn try_push_reports_exhaustion() {
        let resource = Arc::new(PoolResource::new(
            PoolAllocator::builder()
                .bounded(2)
                .exhaustion_policy(ExhaustionPolicy::ReturnError)
                .build(),
        ));
        let mut list = PoolList::new_in(PolymorphicAllocator::new(resource));

        assert_eq!(list.try_push_back(1), Ok(()));
        assert_eq!(list.try_push_front(0), Ok(()));
        assert_eq!(list.try_push_back(2), Err(AllocError));

        assert_eq!(list.iter().copied().collect::<Vec<_>>(), [0, 1]);
    }

    #[test]
    fn debug_lists_elements() {
        let (mut list, _resource) = pool_list();
        list.extend([1, 2]);

        assert_eq!(format!("{list:?}"), "[1, 2]");
    }
}
