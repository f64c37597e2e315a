use thiserror::Error;

/// Errors that can occur when acquiring memory from a pool.
///
/// Releasing a block twice, or releasing a pointer that did not come from the pool, is not
/// represented here. Those are violations of the safety contract of the `release()` methods and
/// are not detected at runtime outside of debug builds.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The caller requested an alignment stricter than any block can provide.
    ///
    /// No block is consumed from the pool when this error is returned.
    #[error("alignment of {requested} bytes is not supported, the maximum is {maximum} bytes")]
    AlignmentUnsupported {
        /// The alignment that was requested.
        requested: usize,

        /// The strictest alignment blocks are guaranteed to have.
        maximum: usize,
    },

    /// The pool returned memory that does not satisfy its own alignment guarantee.
    ///
    /// This indicates a bug in the pool, not in the caller.
    #[error("pool returned address {address:#x} which is not aligned to {alignment} bytes")]
    AllocatorCorruption {
        /// The misaligned address returned by the pool.
        address: usize,

        /// The alignment the address was expected to satisfy.
        alignment: usize,
    },

    /// A bounded pool has no free blocks left and is not allowed to grow.
    #[error("pool of {capacity} blocks of {block_size} bytes is exhausted")]
    PoolExhausted {
        /// Size of each block in the exhausted pool.
        block_size: usize,

        /// Total number of blocks the pool is allowed to hold.
        capacity: usize,
    },

    /// The requested size is larger than the largest block the pool can serve.
    #[error("request for {requested} bytes exceeds the largest supported block of {maximum} bytes")]
    RequestTooLarge {
        /// The number of bytes requested.
        requested: usize,

        /// The largest number of bytes a single request may ask for.
        maximum: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's [`Error`] type as
/// the error value.
pub type Result<T> = std::result::Result<T, Error>;
