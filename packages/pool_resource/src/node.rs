//! Single-value allocations through an [`Allocator`], used for container nodes.

use std::alloc::Layout;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator, handle_alloc_error};

/// Moves `value` into a new allocation from `alloc`.
pub(crate) fn try_allocate_node<N, A: Allocator>(
    alloc: &A,
    value: N,
) -> Result<NonNull<N>, AllocError> {
    let ptr = alloc.allocate(Layout::new::<N>())?.cast::<N>();

    // SAFETY: The allocation was made for the layout of N, so it is valid and aligned for a
    // write of N.
    unsafe { ptr.write(value) };

    Ok(ptr)
}

/// Moves `value` into a new allocation from `alloc`, treating failure like the standard
/// collections do.
pub(crate) fn allocate_node<N, A: Allocator>(alloc: &A, value: N) -> NonNull<N> {
    try_allocate_node(alloc, value)
        .unwrap_or_else(|AllocError| handle_alloc_error(Layout::new::<N>()))
}

/// Moves the value out of a node and frees the node's memory.
///
/// # Safety
///
/// The caller must guarantee that `ptr` was returned by [`try_allocate_node()`] or
/// [`allocate_node()`] for an allocator equivalent to `alloc`, that the node still holds an
/// initialized value and that nothing references the node after this call.
pub(crate) unsafe fn take_node<N, A: Allocator>(alloc: &A, ptr: NonNull<N>) -> N {
    // SAFETY: The caller guarantees the node holds an initialized value nobody else uses.
    let value = unsafe { ptr.read() };

    // SAFETY: The caller guarantees the node was allocated by an equivalent allocator for the
    // layout of N.
    unsafe { free_node(alloc, ptr) };

    value
}

/// Frees the memory of a node without dropping or reading its contents.
///
/// # Safety
///
/// The caller must guarantee that `ptr` was returned by [`try_allocate_node()`] or
/// [`allocate_node()`] for an allocator equivalent to `alloc` and that nothing references the
/// node after this call.
pub(crate) unsafe fn free_node<N, A: Allocator>(alloc: &A, ptr: NonNull<N>) {
    // SAFETY: Forwarding the caller's guarantees.
    unsafe { alloc.deallocate(ptr.cast(), Layout::new::<N>()) };
}
