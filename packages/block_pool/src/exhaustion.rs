use std::fmt;
use std::num::NonZero;
use std::sync::Arc;
use std::time::Duration;

/// Determines what a bounded pool does when a block is requested but none are free.
///
/// Unbounded pools never become exhausted. They grow by reserving more memory from the system
/// allocator instead.
///
/// Whatever the policy, the pool's [`OutOfMemoryHook`] (if any) is invoked exactly once for
/// each acquisition that ultimately fails, before the policy's final action is taken.
///
/// # Examples
///
/// ```
/// use block_pool::{ExhaustionPolicy, FixedBlockPool};
///
/// let pool = FixedBlockPool::builder()
///     .block_size(32)
///     .bounded(4)
///     .exhaustion_policy(ExhaustionPolicy::ReturnError)
///     .build();
///
/// let blocks: Vec<_> = (0..4).map(|_| pool.acquire(32).unwrap()).collect();
/// assert!(pool.acquire(32).is_err());
/// # for block in blocks {
/// #     // SAFETY: Each block came from this pool and is released once.
/// #     unsafe { pool.release(block) };
/// # }
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ExhaustionPolicy {
    /// Exhaustion is a fatal configuration error. The acquiring thread panics. This is the
    /// default.
    ///
    /// With `panic = "abort"` this terminates the process.
    #[default]
    Abort,

    /// The acquisition fails with [`Error::PoolExhausted`][crate::Error::PoolExhausted].
    ReturnError,

    /// The acquiring thread sleeps for `backoff` and tries again, up to `attempts` times, in
    /// the hope that another thread releases a block in the meantime. If every attempt fails,
    /// the acquisition fails with [`Error::PoolExhausted`][crate::Error::PoolExhausted].
    ///
    /// The pool lock is not held while sleeping.
    Retry {
        /// How many more times to try after the first attempt fails.
        attempts: NonZero<u32>,

        /// How long to sleep before each retry.
        backoff: Duration,
    },
}

/// Describes a failed acquisition from an exhausted pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ExhaustionEvent {
    /// Size of each block in the exhausted pool.
    pub block_size: usize,

    /// Total number of blocks the pool is allowed to hold.
    pub capacity: usize,
}

/// A callback invoked synchronously on the acquiring thread when a bounded pool is exhausted.
///
/// The hook runs without any pool lock held, so it may inspect pool statistics. It must not
/// assume that returning from the hook makes the acquisition succeed. What happens after the
/// hook returns is decided by the pool's [`ExhaustionPolicy`].
///
/// If no hook is installed, exhaustion is reported through `tracing` at error level instead.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use block_pool::{ExhaustionPolicy, FixedBlockPool, OutOfMemoryHook};
///
/// let failures = Arc::new(AtomicUsize::new(0));
/// let hook = OutOfMemoryHook::new({
///     let failures = Arc::clone(&failures);
///     move |_event| {
///         failures.fetch_add(1, Ordering::Relaxed);
///     }
/// });
///
/// let pool = FixedBlockPool::builder()
///     .block_size(32)
///     .bounded(1)
///     .exhaustion_policy(ExhaustionPolicy::ReturnError)
///     .out_of_memory_hook(hook)
///     .build();
///
/// let block = pool.acquire(32).unwrap();
/// assert!(pool.acquire(32).is_err());
/// assert_eq!(failures.load(Ordering::Relaxed), 1);
/// # // SAFETY: The block came from this pool and is released once.
/// # unsafe { pool.release(block) };
/// ```
#[derive(Clone)]
pub struct OutOfMemoryHook {
    callback: Arc<dyn Fn(&ExhaustionEvent) + Send + Sync>,
}

impl OutOfMemoryHook {
    /// Wraps a callback into a hook that can be installed on a pool.
    #[inline]
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ExhaustionEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub(crate) fn invoke(&self, event: &ExhaustionEvent) {
        (self.callback)(event);
    }
}

impl fmt::Debug for OutOfMemoryHook {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutOfMemoryHook").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(OutOfMemoryHook: Send, Sync, Clone, fmt::Debug);
    assert_impl_all!(ExhaustionPolicy: Send, Sync, Copy);

    #[test]
    fn default_policy_is_abort() {
        assert_eq!(ExhaustionPolicy::default(), ExhaustionPolicy::Abort);
    }

    #[test]
    fn hook_receives_event() {
        let seen = Arc::new(AtomicUsize::new(0));

        let hook = OutOfMemoryHook::new({
            let seen = Arc::clone(&seen);
            move |event| {
                seen.store(event.block_size, Ordering::Relaxed);
            }
        });

        hook.invoke(&ExhaustionEvent {
            block_size: 48,
            capacity: 10,
        });

        assert_eq!(seen.load(Ordering::Relaxed), 48);
    }

    #[test]
    fn cloned_hooks_share_callback() {
        let calls = Arc::new(AtomicUsize::new(0));

        let hook = OutOfMemoryHook::new({
            let calls = Arc::clone(&calls);
            move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
            }
        });
        let clone = hook.clone();

        let event = ExhaustionEvent {
            block_size: 16,
            capacity: 1,
        };
        hook.invoke(&event);
        clone.invoke(&event);

        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn hook_debug_is_opaque() {
        let hook = OutOfMemoryHook::new(|_| {});
        assert!(format!("{hook:?}").contains("OutOfMemoryHook"));
    }
}
