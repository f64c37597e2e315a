/// Determines pool behavior when the pool is dropped while blocks are still in use.
///
/// By default, the pool releases all of its memory when it is dropped, leaving any pointers
/// still held by callers dangling.
///
/// # Examples
///
/// ```
/// use block_pool::{DropPolicy, FixedBlockPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = FixedBlockPool::builder()
///     .block_size(64)
///     .drop_policy(DropPolicy::MustNotHaveBlocksInUse)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool frees its memory when it is dropped, even if blocks are still in use. This is
    /// the default.
    #[default]
    MayFreeInUseBlocks,

    /// The pool will panic if any blocks are still in use when it is dropped.
    ///
    /// This turns a forgotten release into a visible failure, which is valuable in tests and in
    /// systems where every block is expected to be returned before shutdown.
    MustNotHaveBlocksInUse,
}
