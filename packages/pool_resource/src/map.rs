//! An ordered map with one allocation per entry, and its iterators.

use std::alloc::Layout;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator};
use smallvec::SmallVec;

use crate::PolymorphicAllocator;
use crate::node::{allocate_node, take_node, try_allocate_node};

type Link<K, V> = Option<NonNull<Node<K, V>>>;

/// AA tree node. Leaves have level 1. A left child is always one level below its parent; a
/// right child is on the same level or one below, and no two consecutive right links stay on
/// the same level.
struct Node<K, V> {
    key: K,
    value: V,
    level: usize,
    left: Link<K, V>,
    right: Link<K, V>,
}

/// Traversal stack of an iterator. AA trees are at most about twice as deep as the binary
/// logarithm of their length, so this rarely spills.
type Stack<K, V> = SmallVec<[NonNull<Node<K, V>>; 32]>;

/// An ordered map that allocates each entry's node from an allocator.
///
/// The map is a balanced search tree (an AA tree). Lookups, insertions and removals take
/// logarithmic time and iteration visits entries in ascending key order.
///
/// Every entry has its own node, and all nodes of a map have the same size, so a pool-backed
/// map draws all of its memory from a single size class. Nodes never move once allocated.
///
/// # Example
///
/// ```
/// use pool_resource::make_map;
///
/// let mut map = make_map::<i32, char>().unwrap();
/// for key in (0..10).rev() {
///     map.insert(key, 'a');
/// }
///
/// *map.get_or_insert_with(3, || 'z') = 'b';
///
/// assert_eq!(map.get(&3), Some(&'b'));
/// assert_eq!(map.first_key_value(), Some((&0, &'a')));
/// assert_eq!(map.keys().copied().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
/// ```
pub struct PoolMap<K, V, A: Allocator = PolymorphicAllocator> {
    root: Link<K, V>,
    len: usize,
    alloc: A,

    _owns: PhantomData<(K, V)>,
}

impl<K, V, A: Allocator> PoolMap<K, V, A> {
    /// Creates an empty map that will allocate its nodes from `alloc`.
    ///
    /// No memory is allocated until the first entry is inserted.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            root: None,
            len: 0,
            alloc,
            _owns: PhantomData,
        }
    }

    /// The allocator the map allocates its nodes from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Layout of the single allocation made for each element.
    pub(crate) fn node_layout() -> Layout {
        Layout::new::<Node<K, V>>()
    }

    /// The number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a reference to the value of `key`, if present.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // SAFETY: The node is live for as long as the map is borrowed.
        self.find(key).map(|node| unsafe { &node.as_ref().value })
    }

    /// Returns a mutable reference to the value of `key`, if present.
    #[must_use]
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // SAFETY: The node is live and exclusively borrowed for as long as the map is.
        self.find(key).map(|mut node| unsafe { &mut node.as_mut().value })
    }

    /// Whether the map contains an entry for `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).is_some()
    }

    fn find<Q>(&self, key: &Q) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root;

        while let Some(node) = current {
            // SAFETY: Every link of the tree points to a live node owned by this map.
            let node_ref = unsafe { node.as_ref() };

            current = match key.cmp(node_ref.key.borrow()) {
                Ordering::Less => node_ref.left,
                Ordering::Greater => node_ref.right,
                Ordering::Equal => return Some(node),
            };
        }

        None
    }

    /// Inserts a value for `key`, returning the previous value if the key was present.
    ///
    /// If the key was present, its node is reused and the stored key is left unchanged.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if a new node
    /// cannot be allocated. Use [`try_insert()`][Self::try_insert] to handle the failure.
    pub fn insert(&mut self, key: K, value: V) -> Option<V>
    where
        K: Ord,
    {
        if let Some(existing) = self.get_mut(&key) {
            return Some(mem::replace(existing, value));
        }

        let node = allocate_node(&self.alloc, Node::leaf(key, value));
        self.link(node);
        None
    }

    /// Inserts a value for `key`, returning the previous value if the key was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key was absent and a new node cannot be allocated. The key and
    /// value are dropped and the map is left unchanged.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, AllocError>
    where
        K: Ord,
    {
        if let Some(existing) = self.get_mut(&key) {
            return Ok(Some(mem::replace(existing, value)));
        }

        let node = try_allocate_node(&self.alloc, Node::leaf(key, value))?;
        self.link(node);
        Ok(None)
    }

    /// Returns a mutable reference to the value of `key`, inserting the result of `default` if
    /// the key is absent.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if a new node
    /// cannot be allocated.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        K: Ord,
        F: FnOnce() -> V,
    {
        let mut node = match self.find(&key) {
            Some(node) => node,
            None => {
                let node = allocate_node(&self.alloc, Node::leaf(key, default()));
                self.link(node);
                node
            }
        };

        // SAFETY: Nodes never move once linked, so the node is live and exclusively borrowed
        // for as long as the map is.
        unsafe { &mut node.as_mut().value }
    }

    /// Links a freshly allocated node whose key is not yet in the map.
    fn link(&mut self, node: NonNull<Node<K, V>>)
    where
        K: Ord,
    {
        // SAFETY: The tree consists of live nodes owned by this map, which is exclusively
        // borrowed, and the new node is not yet part of it.
        self.root = Some(unsafe { insert_node(self.root, node) });
        // Cannot overflow because every entry occupies memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Removes the entry for `key`, returning its value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes the entry for `key`, returning the stored key and value if it was present.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut removed = None;

        // SAFETY: The tree consists of live nodes owned by this map, which is exclusively
        // borrowed.
        self.root = unsafe { remove_node(self.root, key, &mut removed) };

        let removed = removed?;
        // Cannot underflow because the removed entry was counted.
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The node has been unlinked from the tree, so nothing references it anymore.
        let node = unsafe { take_node(&self.alloc, removed) };
        Some((node.key, node.value))
    }

    /// The entry with the smallest key, if any.
    #[must_use]
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        let mut node = self.root?;

        // SAFETY: Every link of the tree points to a live node owned by this map.
        while let Some(left) = unsafe { node.as_ref() }.left {
            node = left;
        }

        // SAFETY: As above. The node lives as long as the map is borrowed.
        let node = unsafe { node.as_ref() };
        Some((&node.key, &node.value))
    }

    /// The entry with the largest key, if any.
    #[must_use]
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        let mut node = self.root?;

        // SAFETY: Every link of the tree points to a live node owned by this map.
        while let Some(right) = unsafe { node.as_ref() }.right {
            node = right;
        }

        // SAFETY: As above. The node lives as long as the map is borrowed.
        let node = unsafe { node.as_ref() };
        Some((&node.key, &node.value))
    }

    /// Iterates over the entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            stack: SmallVec::new(),
            remaining: self.len,
            _map: PhantomData,
        };
        iter.descend_left(self.root);
        iter
    }

    /// Iterates over the keys in ascending order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates over the values in ascending key order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Removes all entries, returning their nodes to the allocator.
    pub fn clear(&mut self) {
        let root = self.root.take();
        self.len = 0;

        let mut pending: Stack<K, V> = root.into_iter().collect();
        while let Some(node) = pending.pop() {
            // SAFETY: The tree was detached from the map above and every node is visited
            // exactly once, so nothing else references it.
            let node = unsafe { take_node(&self.alloc, node) };
            pending.extend(node.left);
            pending.extend(node.right);
        }
    }
}

impl<K, V> Node<K, V> {
    fn leaf(key: K, value: V) -> Self {
        Self {
            key,
            value,
            level: 1,
            left: None,
            right: None,
        }
    }
}

// The tree algorithms below operate on raw links. Each requires that every link reachable from
// its arguments points to a live node of a single tree the caller has exclusive access to.

fn level<K, V>(link: Link<K, V>) -> usize {
    // SAFETY: Links passed here always point to live nodes of the tree being operated on.
    link.map_or(0, |node| unsafe { node.as_ref() }.level)
}

/// Removes a left horizontal link by rotating right.
///
/// # Safety
///
/// See above.
unsafe fn skew<K, V>(mut node: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    // SAFETY: Guaranteed by the caller.
    let node_ref = unsafe { node.as_mut() };

    let Some(mut left) = node_ref.left else {
        return node;
    };

    // SAFETY: Guaranteed by the caller. The child is a different node than its parent.
    let left_ref = unsafe { left.as_mut() };

    if left_ref.level != node_ref.level {
        return node;
    }

    node_ref.left = left_ref.right;
    left_ref.right = Some(node);
    left
}

/// Removes two consecutive right horizontal links by rotating left and raising the middle node.
///
/// # Safety
///
/// See above.
unsafe fn split<K, V>(mut node: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    // SAFETY: Guaranteed by the caller.
    let node_ref = unsafe { node.as_mut() };

    let Some(mut right) = node_ref.right else {
        return node;
    };

    // SAFETY: Guaranteed by the caller. The child is a different node than its parent.
    let right_ref = unsafe { right.as_mut() };

    if level(right_ref.right) != node_ref.level {
        return node;
    }

    node_ref.right = right_ref.left;
    right_ref.left = Some(node);
    // Cannot overflow because levels are bounded by the height of the tree.
    right_ref.level = right_ref.level.wrapping_add(1);
    right
}

/// Inserts `new` into the subtree rooted at `root` and returns the new root of the subtree.
///
/// # Safety
///
/// See above. In addition, `new` must be a leaf that is not part of the tree and whose key is
/// not present in it.
unsafe fn insert_node<K: Ord, V>(
    root: Link<K, V>,
    new: NonNull<Node<K, V>>,
) -> NonNull<Node<K, V>> {
    let Some(mut root) = root else {
        return new;
    };

    // SAFETY: Guaranteed by the caller.
    let root_ref = unsafe { root.as_mut() };
    // SAFETY: Guaranteed by the caller. The new node is not part of the tree.
    let goes_left = unsafe { new.as_ref() }.key < root_ref.key;

    // SAFETY: The subtrees satisfy the same requirements as the tree.
    unsafe {
        if goes_left {
            root_ref.left = Some(insert_node(root_ref.left, new));
        } else {
            root_ref.right = Some(insert_node(root_ref.right, new));
        }
    }

    // SAFETY: Guaranteed by the caller.
    unsafe { split(skew(root)) }
}

/// Removes the node with `key` from the subtree rooted at `root`, storing it in `removed`, and
/// returns the new root of the subtree.
///
/// # Safety
///
/// See above.
unsafe fn remove_node<K, V, Q>(
    root: Link<K, V>,
    key: &Q,
    removed: &mut Link<K, V>,
) -> Link<K, V>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    let mut root = root?;

    // SAFETY: Guaranteed by the caller.
    let root_ref = unsafe { root.as_mut() };

    match key.cmp(root_ref.key.borrow()) {
        Ordering::Less => {
            // SAFETY: The subtree satisfies the same requirements as the tree.
            root_ref.left = unsafe { remove_node(root_ref.left, key, removed) };
        }
        Ordering::Greater => {
            // SAFETY: The subtree satisfies the same requirements as the tree.
            root_ref.right = unsafe { remove_node(root_ref.right, key, removed) };
        }
        Ordering::Equal => {
            *removed = Some(root);

            // Without a right child the node is a leaf, since a left child would have to be on
            // a lower level than 1.
            let Some(right) = root_ref.right else {
                return root_ref.left;
            };

            // The in-order successor takes over the removed node's place in the tree.
            // SAFETY: The subtree satisfies the same requirements as the tree.
            let (rest, mut successor) = unsafe { remove_min(right) };

            // SAFETY: The successor has been detached from the tree, so it is distinct from
            // every node still in it.
            let successor_ref = unsafe { successor.as_mut() };
            successor_ref.left = root_ref.left;
            successor_ref.right = rest;
            successor_ref.level = root_ref.level;

            root = successor;
        }
    }

    // SAFETY: Guaranteed by the caller.
    Some(unsafe { rebalance(root) })
}

/// Detaches the node with the smallest key from the subtree rooted at `root`. Returns the new
/// root of the subtree and the detached node.
///
/// # Safety
///
/// See above.
unsafe fn remove_min<K, V>(mut root: NonNull<Node<K, V>>) -> (Link<K, V>, NonNull<Node<K, V>>) {
    // SAFETY: Guaranteed by the caller.
    let root_ref = unsafe { root.as_mut() };

    let Some(left) = root_ref.left else {
        return (root_ref.right, root);
    };

    // SAFETY: The subtree satisfies the same requirements as the tree.
    let (rest, min) = unsafe { remove_min(left) };
    root_ref.left = rest;

    // SAFETY: Guaranteed by the caller.
    (Some(unsafe { rebalance(root) }), min)
}

/// Restores the AA tree invariants of a node after one of its subtrees lost a node.
///
/// # Safety
///
/// See above.
unsafe fn rebalance<K, V>(mut node: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    {
        // SAFETY: Guaranteed by the caller.
        let node_ref = unsafe { node.as_mut() };

        let expected = level(node_ref.left)
            .min(level(node_ref.right))
            .wrapping_add(1);

        if expected < node_ref.level {
            node_ref.level = expected;

            if let Some(mut right) = node_ref.right {
                // SAFETY: Guaranteed by the caller. The child is a different node.
                let right_ref = unsafe { right.as_mut() };
                right_ref.level = right_ref.level.min(expected);
            }
        }
    }

    // SAFETY: Guaranteed by the caller.
    node = unsafe { skew(node) };

    {
        // SAFETY: Guaranteed by the caller.
        let node_ref = unsafe { node.as_mut() };

        if let Some(right) = node_ref.right {
            // SAFETY: The subtree satisfies the same requirements as the tree.
            let mut right = unsafe { skew(right) };
            node_ref.right = Some(right);

            // SAFETY: Guaranteed by the caller. The child is a different node.
            let right_ref = unsafe { right.as_mut() };
            if let Some(right_right) = right_ref.right {
                // SAFETY: The subtree satisfies the same requirements as the tree.
                right_ref.right = Some(unsafe { skew(right_right) });
            }
        }
    }

    // SAFETY: Guaranteed by the caller.
    node = unsafe { split(node) };

    // SAFETY: Guaranteed by the caller.
    let node_ref = unsafe { node.as_mut() };
    if let Some(right) = node_ref.right {
        // SAFETY: The subtree satisfies the same requirements as the tree.
        node_ref.right = Some(unsafe { split(right) });
    }

    node
}

impl<K, V, A: Allocator + Default> Default for PoolMap<K, V, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<K, V, A: Allocator> Drop for PoolMap<K, V, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: Ord + Clone, V: Clone, A: Allocator + Clone> Clone for PoolMap<K, V, A> {
    fn clone(&self) -> Self {
        let mut map = Self::new_in(self.alloc.clone());
        map.extend(self.iter().map(|(key, value)| (key.clone(), value.clone())));
        map
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A: Allocator> fmt::Debug for PoolMap<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: PartialEq, V: PartialEq, A: Allocator, B: Allocator> PartialEq<PoolMap<K, V, B>>
    for PoolMap<K, V, A>
{
    fn eq(&self, other: &PoolMap<K, V, B>) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq, A: Allocator> Eq for PoolMap<K, V, A> {}

impl<K: Ord, V, A: Allocator> Extend<(K, V)> for PoolMap<K, V, A> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V, A: Allocator> IntoIterator for &'a PoolMap<K, V, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// SAFETY: The map owns its nodes exclusively, so sending the map sends the entries and the
// allocator, all of which are Send.
unsafe impl<K: Send, V: Send, A: Allocator + Send> Send for PoolMap<K, V, A> {}

// SAFETY: Shared access to the map only gives shared access to the entries and the allocator,
// all of which are Sync.
unsafe impl<K: Sync, V: Sync, A: Allocator + Sync> Sync for PoolMap<K, V, A> {}

/// Iterator over the entries of a [`PoolMap`] in ascending key order.
pub struct Iter<'a, K, V> {
    /// Nodes whose left subtree has been visited but which have not been yielded yet.
    stack: Stack<K, V>,
    remaining: usize,
    _map: PhantomData<&'a Node<K, V>>,
}

impl<K, V> Iter<'_, K, V> {
    fn descend_left(&mut self, mut link: Link<K, V>) {
        while let Some(node) = link {
            self.stack.push(node);
            // SAFETY: The map is borrowed for the iterator's lifetime, so its nodes stay live.
            link = unsafe { node.as_ref() }.left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // SAFETY: The map is borrowed for 'a, so its nodes stay live and unmodified.
        let node = unsafe { node.as_ref() };

        self.descend_left(node.right);
        self.remaining = self.remaining.wrapping_sub(1);

        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            remaining: self.remaining,
            _map: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for Iter<'_, K, V> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

// SAFETY: The iterator only hands out shared references to entries, which is safe to do from
// any thread when the entries are Sync.
unsafe impl<K: Sync, V: Sync> Send for Iter<'_, K, V> {}

// SAFETY: As above.
unsafe impl<K: Sync, V: Sync> Sync for Iter<'_, K, V> {}

/// Iterator over the keys of a [`PoolMap`] in ascending order.
#[derive(Clone, Debug)]
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}
impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// Iterator over the values of a [`PoolMap`] in ascending key order.
#[derive(Clone, Debug)]
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
impl<K, V> FusedIterator for Values<'_, K, V> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use allocator_api2::alloc::Global;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ExhaustionPolicy, MemoryResource, PoolAllocator, PoolResource};

    assert_impl_all!(PoolMap<u32, String>: Send, Sync, Clone, fmt::Debug);
    assert_impl_all!(Iter<'static, u32, u32>: Send, Sync, Clone, fmt::Debug);

    fn pool_map<K, V>() -> (PoolMap<K, V>, Arc<PoolResource>) {
        let resource = Arc::new(PoolResource::default());
        let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
        let map = PoolMap::new_in(PolymorphicAllocator::new(shared));
        (map, resource)
    }

    /// Checks the AA tree invariants of the whole map and returns its entry count.
    fn check_invariants<K: Ord, V, A: Allocator>(map: &PoolMap<K, V, A>) -> usize {
        fn check<K: Ord, V>(link: Link<K, V>, lower: Option<&K>, upper: Option<&K>) -> usize {
            let Some(node) = link else {
                return 0;
            };

            // SAFETY: The map is borrowed, so its nodes are live.
            let node = unsafe { node.as_ref() };

            assert!(node.level >= 1);
            assert!(lower.is_none_or(|lower| *lower < node.key));
            assert!(upper.is_none_or(|upper| node.key < *upper));

            assert_eq!(level(node.left) + 1, node.level);

            let right_level = level(node.right);
            assert!(right_level + 1 == node.level || right_level == node.level);

            if let Some(right) = node.right {
                // SAFETY: As above.
                let right = unsafe { right.as_ref() };
                assert!(level(right.right) < node.level);
            }

            if node.left.is_none() && node.right.is_none() {
                assert_eq!(node.level, 1);
            }

            1 + check(node.left, lower, Some(&node.key))
                + check(node.right, Some(&node.key), upper)
        }

        check(map.root, None, None)
    }

    #[test]
    fn insert_get_and_replace() {
        let (mut map, _resource) = pool_map();

        assert_eq!(map.insert(2, "two"), None);
        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "deux"), Some("two"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&2), Some(&"deux"));
        assert_eq!(map.get(&3), None);
        assert!(map.contains_key(&1));
        assert!(!map.contains_key(&0));
    }

    #[test]
    fn replacing_a_value_allocates_nothing() {
        let (mut map, resource) = pool_map();

        map.insert(1, 1);
        map.insert(1, 2);

        assert_eq!(resource.statistics().blocks_in_use, 1);
    }

    #[test]
    fn iterates_in_key_order() {
        let (mut map, _resource) = pool_map();

        for key in [5, 3, 8, 1, 4, 7, 9, 2, 6] {
            map.insert(key, key * 10);
        }

        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<_> = (1..=9).map(|k| (k, k * 10)).collect();
        assert_eq!(entries, expected);

        assert_eq!(map.keys().len(), 9);
        assert_eq!(map.values().copied().sum::<i32>(), 450);
        assert_eq!(map.first_key_value(), Some((&1, &10)));
        assert_eq!(map.last_key_value(), Some((&9, &90)));
    }

    #[test]
    fn stays_balanced_under_sequential_inserts() {
        let mut map = PoolMap::new_in(Global);

        for key in 0..1000 {
            map.insert(key, ());
            if key % 97 == 0 {
                assert_eq!(check_invariants(&map), map.len());
            }
        }

        assert_eq!(check_invariants(&map), 1000);
    }

    #[test]
    fn removal_keeps_tree_valid() {
        let mut map = PoolMap::new_in(Global);
        map.extend((0..500).map(|key| (key, key.to_string())));

        // Remove in an order that exercises leaves, inner nodes and the root.
        for key in (0..500).step_by(3).chain((1..500).step_by(3)) {
            assert_eq!(map.remove(&key), Some(key.to_string()));
            assert_eq!(check_invariants(&map), map.len());
        }

        assert_eq!(map.len(), 166);
        assert!(map.keys().all(|key| key % 3 == 2));
        assert_eq!(map.remove(&0), None);
    }

    #[test]
    fn removing_everything_empties_the_map() {
        let (mut map, resource) = pool_map();
        map.extend((0..64).map(|key| (key, key)));

        for key in (0..64).rev() {
            assert_eq!(map.remove_entry(&key), Some((key, key)));
        }

        assert!(map.is_empty());
        assert_eq!(map.first_key_value(), None);
        assert_eq!(map.iter().next(), None);
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn matches_btree_map_on_mixed_workload() {
        let mut map = PoolMap::new_in(Global);
        let mut reference = BTreeMap::new();

        // A simple linear congruential sequence gives a reproducible mix of operations.
        let mut state: u32 = 12345;
        for _ in 0..5000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let key = (state >> 16) % 256;

            if state % 3 == 0 {
                assert_eq!(map.remove(&key), reference.remove(&key));
            } else {
                assert_eq!(map.insert(key, state), reference.insert(key, state));
            }
        }

        assert_eq!(check_invariants(&map), reference.len());
        assert!(map.iter().eq(reference.iter()));
    }

    #[test]
    fn get_or_insert_with_inserts_only_when_absent() {
        let (mut map, _resource) = pool_map();

        *map.get_or_insert_with(7, || 0) += 1;
        *map.get_or_insert_with(7, || unreachable!()) += 1;

        assert_eq!(map.get(&7), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn get_mut_modifies_value() {
        let (mut map, _resource) = pool_map();
        map.insert("key".to_owned(), 1);

        if let Some(value) = map.get_mut("key") {
            *value = 5;
        }

        assert_eq!(map.get("key"), Some(&5));
    }

    #[test]
    fn clear_returns_every_node() {
        let (mut map, resource) = pool_map();
        map.extend((0..300).map(|key| (key, 'a')));
        assert_eq!(resource.statistics().blocks_in_use, 300);

        map.clear();

        assert!(map.is_empty());
        assert_eq!(resource.statistics().blocks_in_use, 0);

        map.insert(1, 'b');
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn try_insert_reports_exhaustion() {
        let resource = Arc::new(PoolResource::new(
            PoolAllocator::builder()
                .bounded(1)
                .exhaustion_policy(ExhaustionPolicy::ReturnError)
                .build(),
        ));
        let mut map = PoolMap::new_in(PolymorphicAllocator::new(resource));

        assert_eq!(map.try_insert(1, 'a'), Ok(None));
        assert_eq!(map.try_insert(1, 'b'), Ok(Some('a')));
        assert_eq!(map.try_insert(2, 'c'), Err(AllocError));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn clone_and_compare() {
        let (mut map, _resource) = pool_map();
        map.extend([(1, 'x'), (2, 'y')]);

        let copy = map.clone();
        assert_eq!(copy, map);

        map.insert(3, 'z');
        assert_ne!(copy, map);
        assert_eq!(format!("{copy:?}"), "{1: 'x', 2: 'y'}");
    }
}
