//! A segmented double-ended queue, and its iterator.

use std::alloc::Layout;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator, handle_alloc_error};

use crate::PolymorphicAllocator;
use crate::node::{free_node, try_allocate_node};

/// Number of elements stored in each segment.
pub(crate) const SEGMENT_CAPACITY: usize = 16;

type Link<T> = Option<NonNull<Segment<T>>>;

/// A fixed-size block of element slots, linked to its neighbors.
pub(crate) struct Segment<T> {
    slots: [MaybeUninit<T>; SEGMENT_CAPACITY],
    prev: Link<T>,
    next: Link<T>,
}

impl<T> Segment<T> {
    fn new(prev: Link<T>, next: Link<T>) -> Self {
        Self {
            slots: [const { MaybeUninit::uninit() }; SEGMENT_CAPACITY],
            prev,
            next,
        }
    }
}

/// Pointer to slot `index` of `segment`.
///
/// # Safety
///
/// `segment` must point to a live segment and `index` must be less than `SEGMENT_CAPACITY`.
unsafe fn slot<T>(segment: NonNull<Segment<T>>, index: usize) -> NonNull<T> {
    debug_assert!(index < SEGMENT_CAPACITY);

    // SAFETY: The caller guarantees the segment is live, so its slot array is in bounds.
    let slots = unsafe { &raw mut (*segment.as_ptr()).slots };

    // SAFETY: The caller guarantees the index is within the array. MaybeUninit<T> has the same
    // layout as T.
    let element = unsafe { slots.cast::<T>().add(index) };

    // SAFETY: An offset within a live allocation is never null.
    unsafe { NonNull::new_unchecked(element) }
}

/// A double-ended queue that stores its elements in fixed-size segments drawn from an
/// allocator.
///
/// Each segment holds a fixed number of elements, so every allocation the deque makes has the
/// same size and a pool-backed deque draws all of its memory from a single size class. Adding
/// or removing an element at either end takes constant time; a segment is allocated when an
/// end runs out of room and freed as soon as it becomes empty.
///
/// # Example
///
/// ```
/// use pool_resource::make_deque;
///
/// let mut deque = make_deque::<u32>().unwrap();
/// deque.push_back(2);
/// deque.push_front(1);
///
/// assert_eq!(deque.front(), Some(&1));
/// assert_eq!(deque.back(), Some(&2));
/// assert_eq!(deque.pop_front(), Some(1));
/// ```
pub struct PoolDeque<T, A: Allocator = PolymorphicAllocator> {
    /// Segment holding the front element. `None` exactly when the deque is empty.
    head: Link<T>,

    /// Segment holding the back element. `None` exactly when the deque is empty.
    tail: Link<T>,

    /// Slot of the front element within `head`.
    head_index: usize,

    /// One past the slot of the back element within `tail`.
    tail_index: usize,

    len: usize,
    alloc: A,

    _owns: PhantomData<T>,
}

impl<T, A: Allocator> PoolDeque<T, A> {
    /// Creates an empty deque that will allocate its segments from `alloc`.
    ///
    /// No memory is allocated until the first element is added.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            head: None,
            tail: None,
            head_index: 0,
            tail_index: 0,
            len: 0,
            alloc,
            _owns: PhantomData,
        }
    }

    /// The allocator the deque allocates its segments from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// The number of elements in the deque.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the deque contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an element to the back of the deque.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`] if a new segment is needed and cannot be allocated. Use
    /// [`try_push_back()`][Self::try_push_back] to handle the failure.
    pub fn push_back(&mut self, value: T) {
        self.try_push_back(value)
            .unwrap_or_else(|AllocError| handle_alloc_error(Self::segment_layout()));
    }

    /// Appends an element to the back of the deque.
    ///
    /// # Errors
    ///
    /// Returns an error if a new segment is needed and cannot be allocated. The value is
    /// dropped and the deque is left unchanged.
    pub fn try_push_back(&mut self, value: T) -> Result<(), AllocError> {
        let tail = match self.tail {
            Some(tail) if self.tail_index < SEGMENT_CAPACITY => tail,
            _ => {
                let segment = try_allocate_node(&self.alloc, Segment::new(self.tail, None))?;

                match self.tail {
                    // SAFETY: The tail is a live segment owned by this deque.
                    Some(mut old_tail) => unsafe { old_tail.as_mut().next = Some(segment) },
                    None => {
                        self.head = Some(segment);
                        self.head_index = 0;
                    }
                }

                self.tail = Some(segment);
                self.tail_index = 0;
                segment
            }
        };

        // SAFETY: The tail is live and tail_index is within its slots.
        let vacant = unsafe { slot(tail, self.tail_index) };

        // SAFETY: The slot past the back element is vacant.
        unsafe { vacant.write(value) };

        self.tail_index = self.tail_index.wrapping_add(1);
        // Cannot overflow because every element occupies memory.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Prepends an element to the front of the deque.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`] if a new segment is needed and cannot be allocated. Use
    /// [`try_push_front()`][Self::try_push_front] to handle the failure.
    pub fn push_front(&mut self, value: T) {
        self.try_push_front(value)
            .unwrap_or_else(|AllocError| handle_alloc_error(Self::segment_layout()));
    }

    /// Prepends an element to the front of the deque.
    ///
    /// # Errors
    ///
    /// Returns an error if a new segment is needed and cannot be allocated. The value is
    /// dropped and the deque is left unchanged.
    pub fn try_push_front(&mut self, value: T) -> Result<(), AllocError> {
        let head = match self.head {
            Some(head) if self.head_index > 0 => head,
            _ => {
                let segment = try_allocate_node(&self.alloc, Segment::new(None, self.head))?;

                match self.head {
                    // SAFETY: The head is a live segment owned by this deque.
                    Some(mut old_head) => unsafe { old_head.as_mut().prev = Some(segment) },
                    None => {
                        self.tail = Some(segment);
                        self.tail_index = SEGMENT_CAPACITY;
                    }
                }

                self.head = Some(segment);
                self.head_index = SEGMENT_CAPACITY;
                segment
            }
        };

        // Cannot underflow because the head segment has room in front of the front element.
        self.head_index = self.head_index.wrapping_sub(1);

        // SAFETY: The head is live and head_index is within its slots.
        let vacant = unsafe { slot(head, self.head_index) };

        // SAFETY: The slot before the front element is vacant.
        unsafe { vacant.write(value) };

        // Cannot overflow because every element occupies memory.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Removes the first element and returns it, or `None` if the deque is empty.
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;

        // SAFETY: The head is live and head_index is within its slots.
        let front = unsafe { slot(head, self.head_index) };

        // SAFETY: The slot holds the initialized front element, which is logically removed
        // below.
        let value = unsafe { front.read() };

        self.head_index = self.head_index.wrapping_add(1);
        self.len = self.len.wrapping_sub(1);

        if self.len == 0 {
            self.release_last_segment();
        } else if self.head_index == SEGMENT_CAPACITY {
            // SAFETY: The head is live. Elements remain, so a next segment exists.
            let next = unsafe { head.as_ref() }.next;
            // SAFETY: The head segment no longer holds elements and is unlinked below.
            unsafe { free_node(&self.alloc, head) };

            let mut next = next.expect("a non-empty deque has a segment after a drained head");
            // SAFETY: The next segment is live and owned by this deque.
            unsafe { next.as_mut().prev = None };

            self.head = Some(next);
            self.head_index = 0;
        }

        Some(value)
    }

    /// Removes the last element and returns it, or `None` if the deque is empty.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;

        self.tail_index = self.tail_index.wrapping_sub(1);
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The tail is live and tail_index is within its slots.
        let back = unsafe { slot(tail, self.tail_index) };

        // SAFETY: The slot holds the initialized back element, which is logically removed
        // above.
        let value = unsafe { back.read() };

        if self.len == 0 {
            self.release_last_segment();
        } else if self.tail_index == 0 {
            // SAFETY: The tail is live. Elements remain, so a previous segment exists.
            let prev = unsafe { tail.as_ref() }.prev;
            // SAFETY: The tail segment no longer holds elements and is unlinked below.
            unsafe { free_node(&self.alloc, tail) };

            let mut prev = prev.expect("a non-empty deque has a segment before a drained tail");
            // SAFETY: The previous segment is live and owned by this deque.
            unsafe { prev.as_mut().next = None };

            self.tail = Some(prev);
            self.tail_index = SEGMENT_CAPACITY;
        }

        Some(value)
    }

    /// Frees the only remaining segment once the last element has been removed.
    fn release_last_segment(&mut self) {
        debug_assert_eq!(self.head, self.tail);

        if let Some(segment) = self.head.take() {
            // SAFETY: The deque is empty, so the segment holds no elements, and it is unlinked
            // here.
            unsafe { free_node(&self.alloc, segment) };
        }

        self.tail = None;
        self.head_index = 0;
        self.tail_index = 0;
    }

    /// The first element, or `None` if the deque is empty.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.head.map(|head| {
            // SAFETY: The head is live and head_index is within its slots.
            let front = unsafe { slot(head, self.head_index) };

            // SAFETY: The slot holds the initialized front element, which stays valid for as
            // long as the deque is borrowed.
            unsafe { front.as_ref() }
        })
    }

    /// The first element, or `None` if the deque is empty.
    #[must_use]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.head.map(|head| {
            // SAFETY: The head is live and head_index is within its slots.
            let mut front = unsafe { slot(head, self.head_index) };

            // SAFETY: As in front(), with the deque exclusively borrowed.
            unsafe { front.as_mut() }
        })
    }

    /// The last element, or `None` if the deque is empty.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.tail.map(|tail| {
            // SAFETY: The tail is live and a non-empty deque keeps tail_index above zero.
            let back = unsafe { slot(tail, self.tail_index.wrapping_sub(1)) };

            // SAFETY: The slot holds the initialized back element, which stays valid for as
            // long as the deque is borrowed.
            unsafe { back.as_ref() }
        })
    }

    /// The last element, or `None` if the deque is empty.
    #[must_use]
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.tail.map(|tail| {
            // SAFETY: The tail is live and a non-empty deque keeps tail_index above zero.
            let mut back = unsafe { slot(tail, self.tail_index.wrapping_sub(1)) };

            // SAFETY: As in back(), with the deque exclusively borrowed.
            unsafe { back.as_mut() }
        })
    }

    /// Iterates over the elements from front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            front: self.head,
            front_index: self.head_index,
            back: self.tail,
            back_index: self.tail_index,
            remaining: self.len,
            _deque: PhantomData,
        }
    }

    /// Removes all elements, returning their segments to the allocator.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    /// Layout of each segment allocation.
    pub(crate) fn segment_layout() -> Layout {
        Layout::new::<Segment<T>>()
    }
}

impl<T, A: Allocator + Default> Default for PoolDeque<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T, A: Allocator> Drop for PoolDeque<T, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for PoolDeque<T, A> {
    fn clone(&self) -> Self {
        let mut deque = Self::new_in(self.alloc.clone());
        deque.extend(self.iter().cloned());
        deque
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for PoolDeque<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, A: Allocator, B: Allocator> PartialEq<PoolDeque<T, B>> for PoolDeque<T, A> {
    fn eq(&self, other: &PoolDeque<T, B>) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<T: Eq, A: Allocator> Eq for PoolDeque<T, A> {}

impl<T, A: Allocator> Extend<T> for PoolDeque<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a PoolDeque<T, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// SAFETY: The deque owns its segments exclusively, so sending the deque sends the elements and
// the allocator, both of which are Send.
unsafe impl<T: Send, A: Allocator + Send> Send for PoolDeque<T, A> {}

// SAFETY: Shared access to the deque only gives shared access to the elements and the
// allocator, both of which are Sync.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for PoolDeque<T, A> {}

/// Iterator over the elements of a [`PoolDeque`] from front to back.
pub struct Iter<'a, T> {
    front: Link<T>,
    front_index: usize,
    back: Link<T>,
    back_index: usize,
    remaining: usize,
    _deque: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut segment = self.front?;

        if self.front_index == SEGMENT_CAPACITY {
            // SAFETY: The deque is borrowed for 'a, so its segments stay live. Elements remain,
            // so the next segment exists.
            segment = unsafe { segment.as_ref() }
                .next
                .expect("remaining elements live in a following segment");
            self.front = Some(segment);
            self.front_index = 0;
        }

        // SAFETY: The segment is live and front_index is within its slots.
        let element = unsafe { slot(segment, self.front_index) };

        // SAFETY: The slot holds an initialized element that stays valid while the deque is
        // borrowed for 'a.
        let value = unsafe { element.as_ref() };

        self.front_index = self.front_index.wrapping_add(1);
        self.remaining = self.remaining.wrapping_sub(1);

        Some(value)
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

        let mut segment = self.back?;

        if self.back_index == 0 {
            // SAFETY: The deque is borrowed for the iterator's lifetime, so its segments stay
            // live. Elements remain, so the previous segment exists.
            segment = unsafe { segment.as_ref() }
                .prev
                .expect("remaining elements live in a preceding segment");
            self.back = Some(segment);
            self.back_index = SEGMENT_CAPACITY;
        }

        self.back_index = self.back_index.wrapping_sub(1);
        self.remaining = self.remaining.wrapping_sub(1);

        // SAFETY: The segment is live and back_index is within its slots.
        let element = unsafe { slot(segment, self.back_index) };

        // SAFETY: The slot holds an initialized element that stays valid while the deque is
        // borrowed.
        Some(unsafe { element.as_ref() })
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

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use allocator_api2::alloc::Global;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ExhaustionPolicy, MemoryResource, PoolAllocator, PoolResource};

    assert_impl_all!(PoolDeque<u32>: Send, Sync, Clone, fmt::Debug);
    assert_impl_all!(Iter<'static, u32>: Send, Sync, Clone, fmt::Debug);

    fn pool_deque<T>() -> (PoolDeque<T>, Arc<PoolResource>) {
        let resource = Arc::new(PoolResource::default());
        let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
        let deque = PoolDeque::new_in(PolymorphicAllocator::new(shared));
        (deque, resource)
    }

    #[test]
    fn push_and_pop_at_both_ends() {
        let (mut deque, _resource) = pool_deque();

        deque.push_back(2);
        deque.push_back(3);
        deque.push_front(1);
        deque.push_front(0);

        assert_eq!(deque.len(), 4);
        assert_eq!(deque.iter().copied().collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert_eq!(deque.pop_front(), Some(0));
        assert_eq!(deque.pop_back(), Some(3));
        assert_eq!(deque.pop_back(), Some(2));
        assert_eq!(deque.pop_front(), Some(1));
        assert_eq!(deque.pop_front(), None);
        assert_eq!(deque.pop_back(), None);
    }

    #[test]
    fn segments_are_allocated_and_freed_per_capacity() {
        let (mut deque, resource) = pool_deque();

        deque.extend(0..SEGMENT_CAPACITY);
        assert_eq!(resource.statistics().blocks_in_use, 1);

        deque.push_back(SEGMENT_CAPACITY);
        assert_eq!(resource.statistics().blocks_in_use, 2);

        for expected in 0..SEGMENT_CAPACITY {
            assert_eq!(deque.pop_front(), Some(expected));
        }
        assert_eq!(resource.statistics().blocks_in_use, 1);

        assert_eq!(deque.pop_front(), Some(SEGMENT_CAPACITY));
        assert_eq!(resource.statistics().blocks_in_use, 0);
        assert!(deque.is_empty());
    }

    #[test]
    fn front_pushes_span_segments() {
        let (mut deque, resource) = pool_deque();

        for value in (0..40).rev() {
            deque.push_front(value);
        }

        assert_eq!(deque.front(), Some(&0));
        assert_eq!(deque.back(), Some(&39));
        assert_eq!(deque.iter().copied().collect::<Vec<_>>(), (0..40).collect::<Vec<_>>());
        assert_eq!(resource.statistics().blocks_in_use, 3);

        for expected in (0..40).rev() {
            assert_eq!(deque.pop_back(), Some(expected));
        }
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn matches_vec_deque_on_mixed_workload() {
        let mut deque = PoolDeque::new_in(Global);
        let mut reference = VecDeque::new();

        let mut state: u32 = 7;
        for step in 0..10_000_u32 {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);

            match state >> 30 {
                0 => {
                    deque.push_back(step);
                    reference.push_back(step);
                }
                1 => {
                    deque.push_front(step);
                    reference.push_front(step);
                }
                2 => assert_eq!(deque.pop_front(), reference.pop_front()),
                _ => assert_eq!(deque.pop_back(), reference.pop_back()),
            }

            assert_eq!(deque.len(), reference.len());
            assert_eq!(deque.front(), reference.front());
            assert_eq!(deque.back(), reference.back());
        }

        assert!(deque.iter().eq(reference.iter()));
        assert!(deque.iter().rev().eq(reference.iter().rev()));
    }

    #[test]
    fn iterators_meet_in_the_middle() {
        let (mut deque, _resource) = pool_deque();
        deque.extend(0..35);

        let mut iter = deque.iter();
        let mut seen = Vec::new();
        while let Some(front) = iter.next() {
            seen.push(*front);
            if let Some(back) = iter.next_back() {
                seen.push(*back);
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..35).collect::<Vec<_>>());
    }

    #[test]
    fn front_and_back_mut_modify_ends() {
        let (mut deque, _resource) = pool_deque();
        deque.extend([1, 2, 3]);

        if let Some(front) = deque.front_mut() {
            *front = 10;
        }
        if let Some(back) = deque.back_mut() {
            *back = 30;
        }

        assert_eq!(deque.iter().copied().collect::<Vec<_>>(), [10, 2, 30]);
    }

    #[test]
    fn drop_releases_elements_and_segments() {
        let (mut deque, resource) = pool_deque();
        deque.extend((0..50).map(|value| value.to_string()));
        assert_eq!(resource.statistics().blocks_in_use, 4);

        drop(deque);
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn try_push_reports_exhaustion() {
        let resource = Arc::new(PoolResource::new(
            PoolAllocator::builder()
                .bounded(1)
                .exhaustion_policy(ExhaustionPolicy::ReturnError)
                .build(),
        ));
        let mut deque = PoolDeque::new_in(PolymorphicAllocator::new(resource));

        for value in 0..SEGMENT_CAPACITY {
            assert_eq!(deque.try_push_back(value), Ok(()));
        }

        assert_eq!(deque.try_push_back(99), Err(AllocError));
        assert_eq!(deque.try_push_front(99), Err(AllocError));
        assert_eq!(deque.len(), SEGMENT_CAPACITY);
        assert_eq!(deque.back(), Some(&(SEGMENT_CAPACITY - 1)));
    }

    #[test]
    fn clone_and_compare() {
        let (mut deque, _resource) = pool_deque();
        deque.extend(0..20);

        let copy = deque.clone();
        assert_eq!(copy, deque);

        deque.pop_back();
        assert_ne!(copy, deque);
    }
}
