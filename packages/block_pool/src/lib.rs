//! Thread-safe fixed-block pool allocation.
//!
//! This crate provides two allocators that serve memory from pre-reserved chunks instead of
//! calling into the system allocator for every request:
//!
//! - [`FixedBlockPool`] serves blocks of a single size. Acquiring and releasing a block take
//!   constant time; released blocks are recycled through an intrusive free list.
//! - [`PoolAllocator`] serves requests of any size up to a configurable limit by routing each
//!   request to a lazily created [`FixedBlockPool`] of the matching power-of-two size class.
//!   Memory is released by pointer alone.
//!
//! Both implement the [`BlockSource`] trait, the seam used by higher-level adapters such as
//! memory resources and allocator-aware containers.
//!
//! # Bounded pools
//!
//! A pool built with [`bounded()`][FixedBlockPoolBuilder::bounded] reserves all of its memory up
//! front and never grows, which makes memory use predictable in constrained environments. When
//! a bounded pool runs out of blocks, its [`ExhaustionPolicy`] decides whether the acquisition
//! panics, fails with [`Error::PoolExhausted`] or retries after a backoff. An optional
//! [`OutOfMemoryHook`] is notified of every failed acquisition.
//!
//! # Example
//!
//! ```
//! use block_pool::{ExhaustionPolicy, PoolAllocator};
//!
//! let allocator = PoolAllocator::builder()
//!     .bounded(10)
//!     .exhaustion_policy(ExhaustionPolicy::ReturnError)
//!     .build();
//!
//! let ptrs: Vec<_> = (0..10).map(|_| allocator.acquire(8).unwrap()).collect();
//! assert!(allocator.acquire(8).is_err());
//!
//! for ptr in ptrs {
//!     // SAFETY: Every pointer came from this allocator and is released exactly once.
//!     unsafe { allocator.release(ptr) };
//! }
//!
//! println!("{}", allocator.statistics());
//! ```
//!
//! # Statistics
//!
//! Every allocator reports a [`PoolStatistics`] snapshot: blocks in use, free blocks, chunks
//! reserved from the system, the peak number of blocks in use and the total bytes reserved.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod allocator;
mod builder;
mod constants;
mod drop_policy;
mod error;
mod exhaustion;
mod fixed_pool;
mod source;
mod statistics;

pub use allocator::PoolAllocator;
pub use builder::{FixedBlockPoolBuilder, PoolAllocatorBuilder};
pub use constants::*;
pub use drop_policy::*;
pub use error::*;
pub use exhaustion::*;
pub use fixed_pool::FixedBlockPool;
pub use source::BlockSource;
pub use statistics::*;
