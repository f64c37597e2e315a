//! Memory resources and allocator-aware containers backed by fixed-block pools.
//!
//! The crate connects the pools of [`block_pool`] to containers:
//!
//! - A [`MemoryResource`] hands out aligned memory by size. [`PoolResource`] implements it on
//!   top of a [`PoolAllocator`] and refuses alignments the pools cannot honor.
//! - A [`PolymorphicAllocator`] is a cheap, cloneable handle to a shared memory resource. It
//!   implements the [`allocator_api2`] `Allocator` trait, so it works with any allocator-aware
//!   container, not only the ones in this crate.
//! - [`PoolList`], [`PoolMap`], [`PoolSet`], [`PoolDeque`], [`PoolQueue`], [`PoolString`] and
//!   [`PoolWideString`] allocate all of their storage through such an allocator. Growing
//!   operations have a `try_` form that reports allocation failure instead of aborting.
//! - A [`ResourceRegistry`] owns one pool-backed resource per container type. The `make_*`
//!   functions create containers from the process-wide registry.
//!
//! # Example
//!
//! ```
//! use pool_resource::{ResourceRegistry, make_list, make_map};
//!
//! let mut numbers = make_list::<i32>().unwrap();
//! numbers.extend([3, 1, 2]);
//!
//! let mut names = make_map::<i32, char>().unwrap();
//! for (index, name) in ['a', 'b', 'c'].into_iter().enumerate() {
//!     names.insert(i32::try_from(index).unwrap(), name);
//! }
//!
//! assert_eq!(numbers.len(), 3);
//! assert_eq!(names.get(&1), Some(&'b'));
//!
//! println!("{}", ResourceRegistry::global().statistics());
//! ```
//!
//! # Alignment
//!
//! Pool blocks are aligned to [`MAX_ALIGNMENT`] bytes. The registry refuses to create a
//! container whose nodes need more, returning [`Error::AlignmentUnsupported`] instead.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod deque;
mod factories;
pub mod list;
pub mod map;
mod node;
mod polymorphic;
mod queue;
mod registry;
mod resource;
pub mod set;
mod string;

pub use block_pool::{
    DropPolicy, Error, ExhaustionPolicy, MAX_ALIGNMENT, PoolAllocator, PoolAllocatorBuilder,
    PoolStatistics, Result,
};
pub use deque::PoolDeque;
pub use factories::*;
pub use list::PoolList;
pub use map::PoolMap;
pub use polymorphic::PolymorphicAllocator;
pub use queue::PoolQueue;
pub use registry::{ResourceRegistry, ResourceRegistryBuilder};
pub use resource::{MemoryResource, PoolResource, ResourceId};
pub use set::PoolSet;
pub use string::{PoolString, PoolWideString};
