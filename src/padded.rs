//! Reentrant lock variant with each hot field on its own cache line.
//!
//! The shared atomic word carries owner id, lock bit and an adaptive
//! reentrancy metric; the recursion depth itself lives in a plain field on
//! a separate cache line, logically owned by whichever thread holds the
//! lock. Contenders spinning on the word therefore never invalidate the
//! line the owner's reentrant traffic runs on, and the reentrant path is
//! a plain load plus a plain add with no atomics at all.
//!
//! The lock is generic over the back-off policy. See the [`relax`] module
//! for the provided policies, and the alias modules below for ready-made
//! `Mutex` types.
//!
//! [`relax`]: crate::relax

use core::marker::PhantomData;

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{AtomicU64, Ordering};
use crate::cfg::cell::{UnsafeCell, UnsafeCellWith};
use crate::lock::RawLock;
use crate::relax::Relax;
use crate::tid;
use crate::word::Padded;

/// Recursion bookkeeping owned by the current lock holder.
#[derive(Clone, Copy, Debug)]
struct Depth {
    /// Outstanding acquisitions by the owning thread.
    count: u32,
    /// Largest `count` seen during the current ownership.
    deepest: u32,
}

/// A reentrant lock that keeps the contended word and the owner's
/// recursion depth on separate cache lines.
///
/// This is a raw lock: it protects no data of its own. Wrap it in a
/// [`ReentrantMutex`] (see the alias modules in this module) unless you
/// are pairing it with external state by hand.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub struct PaddedLock<R> {
    state: CachePadded<AtomicU64>,
    // Written without atomics; the lock word arbitrates the single writer.
    depth: CachePadded<UnsafeCell<Depth>>,
    relax: PhantomData<R>,
}

// SAFETY: `depth` is only ever touched by the thread the lock word names
// as owner, every other field is atomic.
unsafe impl<R> Send for PaddedLock<R> {}
unsafe impl<R> Sync for PaddedLock<R> {}

impl<R> PaddedLock<R> {
    /// Attempts one acquisition, reporting the lock's reentrancy metric
    /// on failure.
    fn try_acquire(&self) -> Result<(), u32> {
        let me = tid::current().get();
        let mut bits = self.state.load(Ordering::Relaxed);
        loop {
            let state = Padded::from_bits(bits);
            if state.owner == me {
                debug_assert!(state.locked);
                // SAFETY: We hold the lock, so we are the single thread
                // allowed at the depth field.
                unsafe {
                    self.depth.with_mut_unchecked(|depth| {
                        depth.count += 1;
                        depth.deepest = depth.deepest.max(depth.count);
                    });
                }
                return Ok(());
            }
            if state.locked {
                return Err(state.metric);
            }
            let claimed = Padded { owner: me, locked: true, ..state };
            match self.state.compare_exchange(
                bits,
                claimed.into_bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: The exchange just made us the owner.
                    unsafe {
                        self.depth.with_mut_unchecked(|depth| {
                            *depth = Depth { count: 1, deepest: 1 };
                        });
                    }
                    return Ok(());
                }
                // The word changed under us; only report contention if it
                // is now actually held by another thread.
                Err(observed) => bits = observed,
            }
        }
    }
}

/// Folds the deepest recursion of the finished ownership into the metric.
///
/// Any monotone estimator works here; this one is a bounded running
/// average, so a burst of deep recursion fades once holders go shallow
/// again.
fn estimate(metric: u32, deepest: u32) -> u32 {
    metric / 2 + deepest / 2
}

unsafe impl<R: Relax> RawLock for PaddedLock<R> {
    fn new() -> Self {
        let state = Padded { owner: 0, locked: false, metric: 0 };
        Self {
            state: CachePadded::new(AtomicU64::new(state.into_bits())),
            depth: CachePadded::new(UnsafeCell::new(Depth { count: 0, deepest: 0 })),
            relax: PhantomData,
        }
    }

    fn lock(&self) {
        let mut relax = R::new();
        while let Err(metric) = self.try_acquire() {
            relax.relax(metric);
        }
    }

    fn try_lock(&self) -> bool {
        self.try_acquire().is_ok()
    }

    unsafe fn unlock(&self) {
        let state = Padded::from_bits(self.state.load(Ordering::Relaxed));
        debug_assert_eq!(
            state.owner,
            tid::current().get(),
            "released by a thread that does not hold the lock"
        );
        debug_assert!(state.locked);
        // SAFETY: The caller guarantees this thread holds the lock.
        let deepest = unsafe {
            self.depth.with_mut_unchecked(|depth| {
                debug_assert!(depth.count > 0);
                depth.count -= 1;
                (depth.count == 0).then_some(depth.deepest)
            })
        };
        let Some(deepest) = deepest else { return };
        let released = Padded {
            owner: 0,
            locked: false,
            metric: estimate(state.metric, deepest),
        };
        self.state.store(released.into_bits(), Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        Padded::from_bits(self.state.load(Ordering::Relaxed)).locked
    }
}

/// A padded [`ReentrantMutex`] wired to a chosen back-off policy.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub type Mutex<T, R> = crate::lock::ReentrantMutex<T, PaddedLock<R>>;

/// The guard type matching [`Mutex`].
pub type MutexGuard<'a, T, R> = crate::lock::ReentrantMutexGuard<'a, T, PaddedLock<R>>;

/// A padded lock that spins in a tight loop during contention.
pub mod nosleep {
    use crate::relax::NoSleep;

    /// A padded [`Mutex`] with the [`NoSleep`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::padded::nosleep::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, NoSleep>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, NoSleep>;
}

/// A padded lock that yields its time slice during contention.
pub mod yields {
    use crate::relax::Yield;

    /// A padded [`Mutex`] with the [`Yield`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::padded::yields::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Yield>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Yield>;
}

/// A padded lock that spins without power-down hints during contention.
pub mod loops {
    use crate::relax::Loop;

    /// A padded [`Mutex`] with the [`Loop`] back-off policy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Loop>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Loop>;
}

/// A padded lock that backs off exponentially during contention.
pub mod exponential {
    use crate::relax::Exponential;

    /// A padded [`Mutex`] with the [`Exponential`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::padded::exponential::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Exponential>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Exponential>;
}

/// A padded lock whose waiting scales with the lock's reentrancy metric.
pub mod adaptive {
    use crate::relax::Adaptive;

    /// A padded [`Mutex`] with the [`Adaptive`] back-off policy.
    ///
    /// The metric folded into the lock word on release is what this
    /// policy consumes while waiting.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Adaptive>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Adaptive>;
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::test::tests;

    type Mutex<T> = super::yields::Mutex<T>;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Mutex<_>>();
    }

    #[test]
    fn lots_and_lots_reentrant() {
        tests::lots_and_lots_reentrant::<Mutex<_>>();
    }

    #[test]
    fn smoke() {
        tests::smoke::<Mutex<_>>();
    }

    #[test]
    fn reentrancy_depth() {
        tests::reentrancy_depth::<Mutex<_>>();
    }

    #[test]
    fn no_self_deadlock() {
        tests::no_self_deadlock::<Mutex<_>>();
    }

    #[test]
    fn partial_release_keeps_lock() {
        tests::partial_release_keeps_lock::<Mutex<_>>();
    }

    #[test]
    fn mutual_exclusion_handover() {
        tests::mutual_exclusion_handover::<Mutex<_>>();
    }

    #[test]
    fn message_passing() {
        tests::message_passing::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_debug() {
        tests::test_mutex_debug::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_from() {
        tests::test_mutex_from::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_default() {
        tests::test_mutex_default::<Mutex<_>>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_nested() {
        tests::test_lock_arc_nested::<Mutex<_>, Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Mutex<_>>();
    }

    #[test]
    fn test_lock_unsized() {
        tests::test_lock_unsized::<super::nosleep::Mutex<_>>();
    }

    #[test]
    fn counter_exact_under_contention() {
        tests::counter_exact_under_contention::<super::exponential::Mutex<_>>();
    }

    #[test]
    fn nested_pairs_under_contention() {
        tests::nested_pairs_under_contention::<super::adaptive::Mutex<_>>();
    }

    #[test]
    fn metric_estimator_is_bounded() {
        let mut metric = 0;
        for _ in 0..64 {
            metric = super::estimate(metric, 8);
        }
        assert!(metric <= 8);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;

    type Mutex<T> = super::yields::Mutex<T>;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }

    #[test]
    fn reentrant_join() {
        models::reentrant_join::<Mutex<_>>();
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join::<Mutex<_>>();
    }
}
