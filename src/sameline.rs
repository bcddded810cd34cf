//! Reentrant lock variant that fuses all state into one atomic word.
//!
//! Owner id and recursion depth share a single `u64`, so the reentrant
//! fast path is one plain load plus one plain store: no read-modify-write
//! and no second cache line. The flip side is that contenders spin on the
//! very word the owner keeps writing to, so every reentrant acquisition
//! costs the owner a round of coherence traffic under contention.
//!
//! The lock is generic over the back-off policy. See the [`relax`] module
//! for the provided policies, and the alias modules below for ready-made
//! `Mutex` types.
//!
//! [`relax`]: crate::relax

use core::marker::PhantomData;

use crate::cfg::atomic::{AtomicU64, Ordering};
use crate::lock::RawLock;
use crate::relax::Relax;
use crate::tid;
use crate::word::Fused;

/// A reentrant lock holding owner id and recursion depth in one shared
/// atomic word.
///
/// This is a raw lock: it protects no data of its own. Wrap it in a
/// [`ReentrantMutex`] (see the alias modules in this module) unless you
/// are pairing it with external state by hand.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub struct SamelineLock<R> {
    state: AtomicU64,
    relax: PhantomData<R>,
}

// SAFETY: The only field is an atomic word; all mutation goes through it.
unsafe impl<R> Send for SamelineLock<R> {}
unsafe impl<R> Sync for SamelineLock<R> {}

impl<R> SamelineLock<R> {
    /// Attempts one acquisition, reporting the holder's recursion depth
    /// on failure.
    fn try_acquire(&self) -> Result<(), u32> {
        let me = tid::current().get();
        let mut bits = self.state.load(Ordering::Relaxed);
        loop {
            let state = Fused::from_bits(bits);
            if state.owner == me {
                debug_assert!(state.depth > 0);
                // Only the owner stores to a held word, so no RMW is
                // needed here.
                let raised = Fused { depth: state.depth + 1, ..state };
                self.state.store(raised.into_bits(), Ordering::Relaxed);
                return Ok(());
            }
            if state.depth != 0 {
                return Err(state.depth);
            }
            let claimed = Fused { owner: me, depth: 1 };
            match self.state.compare_exchange(
                Fused::UNLOCKED,
                claimed.into_bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                // The word changed under us; only report contention if it
                // is now actually held by another thread.
                Err(observed) => bits = observed,
            }
        }
    }
}

unsafe impl<R: Relax> RawLock for SamelineLock<R> {
    fn new() -> Self {
        Self { state: AtomicU64::new(Fused::UNLOCKED), relax: PhantomData }
    }

    fn lock(&self) {
        let mut relax = R::new();
        while let Err(depth) = self.try_acquire() {
            relax.relax(depth);
        }
    }

    fn try_lock(&self) -> bool {
        self.try_acquire().is_ok()
    }

    unsafe fn unlock(&self) {
        let state = Fused::from_bits(self.state.load(Ordering::Relaxed));
        debug_assert_eq!(
            state.owner,
            tid::current().get(),
            "released by a thread that does not hold the lock"
        );
        debug_assert!(state.depth > 0);
        if state.depth == 1 {
            self.state.store(Fused::UNLOCKED, Ordering::Release);
        } else {
            let lowered = Fused { depth: state.depth - 1, ..state };
            self.state.store(lowered.into_bits(), Ordering::Relaxed);
        }
    }

    fn is_locked(&self) -> bool {
        Fused::from_bits(self.state.load(Ordering::Relaxed)).depth != 0
    }
}

/// A sameline [`ReentrantMutex`] wired to a chosen back-off policy.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub type Mutex<T, R> = crate::lock::ReentrantMutex<T, SamelineLock<R>>;

/// The guard type matching [`Mutex`].
pub type MutexGuard<'a, T, R> = crate::lock::ReentrantMutexGuard<'a, T, SamelineLock<R>>;

/// A sameline lock that spins in a tight loop during contention.
pub mod nosleep {
    use crate::relax::NoSleep;

    /// A sameline [`Mutex`] with the [`NoSleep`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::sameline::nosleep::Mutex;
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

/// A sameline lock that yields its time slice during contention.
pub mod yields {
    use crate::relax::Yield;

    /// A sameline [`Mutex`] with the [`Yield`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::sameline::yields::Mutex;
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

/// A sameline lock that spins without power-down hints during contention.
pub mod loops {
    use crate::relax::Loop;

    /// A sameline [`Mutex`] with the [`Loop`] back-off policy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Loop>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Loop>;
}

/// A sameline lock that backs off exponentially during contention.
pub mod exponential {
    use crate::relax::Exponential;

    /// A sameline [`Mutex`] with the [`Exponential`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::sameline::exponential::Mutex;
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

/// A sameline lock whose waiting scales with the observed recursion depth.
pub mod adaptive {
    use crate::relax::Adaptive;

    /// A sameline [`Mutex`] with the [`Adaptive`] back-off policy.
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
