use std::fmt;
use std::ops::{Add, AddAssign};

/// A point-in-time snapshot of pool usage.
///
/// Obtained from [`FixedBlockPool::statistics()`][crate::FixedBlockPool::statistics] or
/// [`PoolAllocator::statistics()`][crate::PoolAllocator::statistics]. Taking a snapshot does not
/// change the state of the pool.
///
/// Snapshots of different pools can be combined with `+` to produce an aggregate. In an
/// aggregate, `peak_blocks_in_use` is the sum of the individual peaks, which is an upper bound
/// on the true combined peak since the individual peaks may have happened at different times.
///
/// # Example
///
/// ```
/// use block_pool::FixedBlockPool;
///
/// let pool = FixedBlockPool::builder().block_size(64).build();
///
/// let block = pool.acquire(64).unwrap();
/// let stats = pool.statistics();
/// assert_eq!(stats.blocks_in_use, 1);
/// assert_eq!(stats.pools_allocated, 1);
///
/// // SAFETY: The block came from this pool and is released exactly once.
/// unsafe { pool.release(block) };
/// assert_eq!(pool.statistics().blocks_in_use, 0);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct PoolStatistics {
    /// Number of blocks currently handed out to callers.
    pub blocks_in_use: usize,

    /// Number of blocks reserved from the system allocator that are available for acquisition.
    pub blocks_free: usize,

    /// Number of chunks obtained from the system allocator over the lifetime of the pool.
    pub pools_allocated: usize,

    /// Highest value `blocks_in_use` has reached over the lifetime of the pool.
    pub peak_blocks_in_use: usize,

    /// Total bytes reserved from the system allocator for block storage.
    pub bytes_reserved: usize,
}

impl PoolStatistics {
    /// Combines two snapshots into an aggregate.
    #[must_use]
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        Self {
            blocks_in_use: self.blocks_in_use.saturating_add(other.blocks_in_use),
            blocks_free: self.blocks_free.saturating_add(other.blocks_free),
            pools_allocated: self.pools_allocated.saturating_add(other.pools_allocated),
            peak_blocks_in_use: self
                .peak_blocks_in_use
                .saturating_add(other.peak_blocks_in_use),
            bytes_reserved: self.bytes_reserved.saturating_add(other.bytes_reserved),
        }
    }

    /// Total number of blocks currently reserved, whether in use or free.
    #[must_use]
    #[inline]
    pub fn blocks_total(&self) -> usize {
        self.blocks_in_use.saturating_add(self.blocks_free)
    }
}

impl Add for PoolStatistics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        self.merge(rhs)
    }
}

impl AddAssign for PoolStatistics {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

impl fmt::Display for PoolStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks in use: {}, blocks free: {}, peak blocks in use: {}, pools allocated: {}, bytes reserved: {}",
            self.blocks_in_use,
            self.blocks_free,
            self.peak_blocks_in_use,
            self.pools_allocated,
            self.bytes_reserved
        )
    }
}

/// Usage of a single size class of a [`PoolAllocator`][crate::PoolAllocator].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct SizeClassStatistics {
    /// Size of each block in the class, including the per-block header.
    pub block_size: usize,

    /// Usage of the class.
    pub statistics: PoolStatistics,
}

impl fmt::Display for SizeClassStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} byte blocks] {}", self.block_size, self.statistics)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn sample(in_use: usize, free: usize) -> PoolStatistics {
        PoolStatistics {
            blocks_in_use: in_use,
            blocks_free: free,
            pools_allocated: 1,
            peak_blocks_in_use: in_use,
            bytes_reserved: (in_use + free) * 32,
        }
    }

    #[test]
    fn default_is_all_zero() {
        let stats = PoolStatistics::default();
        assert_eq!(stats.blocks_total(), 0);
        assert_eq!(stats.pools_allocated, 0);
    }

    #[test]
    fn merge_sums_every_field() {
        let merged = sample(3, 5) + sample(1, 7);

        assert_eq!(merged.blocks_in_use, 4);
        assert_eq!(merged.blocks_free, 12);
        assert_eq!(merged.pools_allocated, 2);
        assert_eq!(merged.peak_blocks_in_use, 4);
        assert_eq!(merged.bytes_reserved, 16 * 32);
        assert_eq!(merged.blocks_total(), 16);
    }

    #[test]
    fn add_assign_matches_merge() {
        let mut total = PoolStatistics::default();
        total += sample(2, 2);
        total += sample(2, 2);

        assert_eq!(total, sample(2, 2).merge(sample(2, 2)));
    }

    #[test]
    fn merge_saturates_instead_of_overflowing() {
        let huge = PoolStatistics {
            blocks_in_use: usize::MAX,
            ..PoolStatistics::default()
        };

        assert_eq!((huge + huge).blocks_in_use, usize::MAX);
    }

    #[test]
    fn display_lists_usage() {
        let text = sample(3, 5).to_string();
        assert!(text.contains("blocks in use: 3"));
        assert!(text.contains("pools allocated: 1"));
    }

    #[test]
    fn size_class_display_includes_block_size() {
        let class = SizeClassStatistics {
            block_size: 128,
            statistics: sample(0, 64),
        };

        assert!(class.to_string().starts_with("[128 byte blocks]"));
    }
}
