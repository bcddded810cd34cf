//! The locking contract shared by every variant, and the scoped wrapper
//! that protects data with it.
//!
//! A lock variant implements [`RawLock`]: mutual exclusion between threads,
//! free re-acquisition by the thread that already holds the lock, and a
//! release that only takes effect once it has balanced every acquisition.
//! [`ReentrantMutex`] pairs any such lock with a value and hands out RAII
//! guards, so acquisitions are released on every exit path of a scope.
//!
//! Because the owning thread may hold several guards at once, guards only
//! give shared access to the underlying data. Mutation from within a
//! critical section goes through a [`Cell`], [`RefCell`] or similar.
//!
//! [`Cell`]: core::cell::Cell
//! [`RefCell`]: core::cell::RefCell

use core::fmt::{self, Debug, Display, Formatter};
use core::marker::PhantomData;
#[cfg(not(all(loom, test)))]
use core::ops::Deref;

use crate::cfg::cell::{UnsafeCell, UnsafeCellWith};

/// A raw reentrant mutual-exclusion lock.
///
/// # Safety
///
/// Implementations must guarantee that at any instant at most one thread
/// owns the lock, that [`lock`] and a successful [`try_lock`] establish an
/// acquire ordering with the release of the previous owner, and that the
/// thread currently owning the lock can re-acquire it any number of times
/// without blocking. The lock is released only after as many [`unlock`]
/// calls as there were acquisitions.
///
/// [`lock`]: RawLock::lock
/// [`try_lock`]: RawLock::try_lock
/// [`unlock`]: RawLock::unlock
pub unsafe trait RawLock {
    /// Creates a new lock in an unlocked state ready for use.
    fn new() -> Self
    where
        Self: Sized;

    /// Acquires the lock, blocking the calling thread until it is able to
    /// do so.
    ///
    /// If the calling thread already owns the lock this returns immediately
    /// after raising the reentrancy depth.
    fn lock(&self);

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock is now owned by the calling thread,
    /// which includes the reentrant case, and `false` if another thread
    /// currently owns it.
    fn try_lock(&self) -> bool;

    /// Lowers the reentrancy depth, releasing the lock when the depth
    /// reaches zero.
    ///
    /// # Safety
    ///
    /// The calling thread must currently own the lock, with one pending
    /// [`lock`] or successful [`try_lock`] for this call to balance. An
    /// unbalanced release breaks the mutual-exclusion guarantee that any
    /// data wrapper relies on. Violations are asserted in debug builds.
    ///
    /// [`lock`]: RawLock::lock
    /// [`try_lock`]: RawLock::try_lock
    unsafe fn unlock(&self);

    /// Returns `true` if some thread currently owns the lock.
    ///
    /// The answer is immediately stale, it must only be used as a hint.
    fn is_locked(&self) -> bool;
}

/// A mutual exclusion primitive that the owning thread may re-acquire,
/// useful for protecting shared data.
///
/// This mutex will block threads waiting for the lock to become available,
/// while the thread that already owns it gets back in without blocking.
/// The protected value is only accessible through the RAII guards returned
/// from [`lock`] and [`try_lock`]. Guards give shared access; the owning
/// thread may hold any number of them at once, so place a [`Cell`] or
/// [`RefCell`] inside the mutex when the critical section must mutate.
///
/// # Examples
///
/// ```
/// use std::cell::Cell;
/// use std::sync::Arc;
/// use std::thread;
///
/// use relock::sameline::yields::Mutex;
///
/// const N: usize = 10;
///
/// let data = Arc::new(Mutex::new(Cell::new(0)));
///
/// let handles: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::spawn(move || {
///             // Re-acquiring while already holding is fine.
///             let outer = data.lock();
///             let inner = data.lock();
///             inner.set(inner.get() + 1);
///             drop(inner);
///             drop(outer);
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(data.lock().get(), N);
/// ```
///
/// [`lock`]: ReentrantMutex::lock
/// [`try_lock`]: ReentrantMutex::try_lock
/// [`Cell`]: core::cell::Cell
/// [`RefCell`]: core::cell::RefCell
pub struct ReentrantMutex<T: ?Sized, L> {
    raw: L,
    data: UnsafeCell<T>,
}

// SAFETY: A held lock serializes all access to `data`, and the reentrant
// sharing within the owning thread only ever produces shared references.
unsafe impl<T: ?Sized + Send, L: RawLock> Send for ReentrantMutex<T, L> {}
unsafe impl<T: ?Sized + Send, L: RawLock> Sync for ReentrantMutex<T, L> {}

impl<T, L: RawLock> ReentrantMutex<T, L> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use relock::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        Self { raw: L::new(), data: UnsafeCell::new(value) }
    }

    /// Consumes this mutex, returning the underlying data.
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, L: RawLock> ReentrantMutex<T, L> {
    /// Acquires this mutex, blocking the current thread until it is able
    /// to do so.
    ///
    /// Returns immediately if the calling thread already owns the lock. An
    /// RAII guard is returned to allow scoped unlock of the lock; when all
    /// of the owning thread's guards are dropped, the mutex unlocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// use relock::queue::yields::Mutex;
    ///
    /// let mutex = Arc::new(Mutex::new(0));
    /// let c_mutex = Arc::clone(&mutex);
    ///
    /// thread::spawn(move || {
    ///     assert_eq!(*c_mutex.lock(), 0);
    /// })
    /// .join().expect("thread::spawn failed");
    /// ```
    #[inline]
    pub fn lock(&self) -> ReentrantMutexGuard<'_, T, L> {
        self.raw.lock();
        ReentrantMutexGuard::new(self)
    }

    /// Attempts to acquire this mutex without blocking.
    ///
    /// Returns `None` if another thread currently owns the lock. The
    /// reentrant case succeeds: the owning thread always gets a guard.
    ///
    /// # Examples
    ///
    /// ```
    /// use relock::padded::nosleep::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    ///
    /// let outer = mutex.try_lock().expect("the lock is free");
    /// // Same thread, so this succeeds as well.
    /// let inner = mutex.try_lock().expect("reentrant acquisition");
    /// assert_eq!(*outer + *inner, 0);
    /// ```
    #[inline]
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, T, L>> {
        self.raw.try_lock().then(|| ReentrantMutexGuard::new(self))
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::cell::Cell;
    ///
    /// use relock::sameline::exponential::Mutex;
    ///
    /// let mutex = Mutex::new(Cell::new(21));
    /// mutex.lock_then(|guard| guard.set(guard.get() * 2));
    /// assert_eq!(mutex.lock_then(|guard| guard.get()), 42);
    /// ```
    #[inline]
    pub fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(ReentrantMutexGuard<'_, T, L>) -> Ret,
    {
        f(self.lock())
    }

    /// Attempts to acquire this mutex and, on success, runs the closure
    /// against its guard.
    ///
    /// Returns `None` without running the closure if another thread
    /// currently owns the lock.
    #[inline]
    pub fn try_lock_then<F, Ret>(&self, f: F) -> Option<Ret>
    where
        F: FnOnce(ReentrantMutexGuard<'_, T, L>) -> Ret,
    {
        self.try_lock().map(f)
    }

    /// Returns `true` if some thread currently owns this mutex.
    ///
    /// The answer is immediately stale, it must only be used as a hint.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the mutex mutably, no actual locking needs
    /// to take place, the mutable borrow statically guarantees no guards
    /// exist.
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: The exclusive borrow of the mutex rules out any guard.
        unsafe { &mut *self.data.get() }
    }
}

impl<T: Default, L: RawLock> Default for ReentrantMutex<T, L> {
    /// Creates a mutex with the `Default` value for `T`.
    #[inline]
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T, L: RawLock> From<T> for ReentrantMutex<T, L> {
    /// Creates a mutex from an instance of `T`.
    #[inline]
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + Debug, L: RawLock> Debug for ReentrantMutex<T, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => {
                guard.with(|data| d.field("data", &data));
            }
            None => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this
/// structure is dropped (falls out of scope), one level of the lock will
/// be released.
///
/// The data protected by the mutex can be accessed through this guard via
/// its [`Deref`] implementation. Access is shared: the owning thread may
/// hold several guards over the same mutex at the same time, and the
/// mutex only unlocks once every one of them is gone.
///
/// This structure is returned by the [`lock`] and [`try_lock`] methods on
/// [`ReentrantMutex`], and passed to the closures of [`lock_then`] and
/// [`try_lock_then`].
///
/// [`Deref`]: core::ops::Deref
/// [`lock`]: ReentrantMutex::lock
/// [`try_lock`]: ReentrantMutex::try_lock
/// [`lock_then`]: ReentrantMutex::lock_then
/// [`try_lock_then`]: ReentrantMutex::try_lock_then
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct ReentrantMutexGuard<'a, T: ?Sized, L: RawLock> {
    lock: &'a ReentrantMutex<T, L>,
    // Dropping a guard on another thread would release a reentrancy level
    // the origin thread still counts on, so guards never leave it.
    marker: PhantomData<*const ()>,
}

// SAFETY: The guard only exposes shared references to the underlying data.
unsafe impl<T: ?Sized + Sync, L: RawLock> Sync for ReentrantMutexGuard<'_, T, L> {}

impl<'a, T: ?Sized, L: RawLock> ReentrantMutexGuard<'a, T, L> {
    const fn new(lock: &'a ReentrantMutex<T, L>) -> Self {
        Self { lock, marker: PhantomData }
    }

    /// Runs `f` against a shared reference pointing to the underlying data.
    pub(crate) fn with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        // SAFETY: A guard instance holds the lock, and the lock only ever
        // hands out shared access while held.
        unsafe { self.lock.data.with_unchecked(f) }
    }
}

impl<T: ?Sized, L: RawLock> Drop for ReentrantMutexGuard<'_, T, L> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: The guard's existence proves one pending acquisition by
        // the current thread.
        unsafe { self.lock.raw.unlock() }
    }
}

#[cfg(not(all(loom, test)))]
impl<T: ?Sized, L: RawLock> Deref for ReentrantMutexGuard<'_, T, L> {
    type Target = T;

    /// Dereferences the guard to access the underlying data.
    #[inline(always)]
    fn deref(&self) -> &T {
        // SAFETY: A guard instance holds the lock, and the lock only ever
        // hands out shared access while held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized + Debug, L: RawLock> Debug for ReentrantMutexGuard<'_, T, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|data| data.fmt(f))
    }
}

impl<T: ?Sized + Display, L: RawLock> Display for ReentrantMutexGuard<'_, T, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|data| data.fmt(f))
    }
}

#[cfg(test)]
impl<T: ?Sized, L: RawLock> crate::test::LockNew for ReentrantMutex<T, L> {
    type Target = T;

    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized,
    {
        Self::new(value)
    }
}

#[cfg(test)]
impl<T: ?Sized, L: RawLock> crate::test::LockThen for ReentrantMutex<T, L> {
    fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        self.lock_then(|guard| guard.with(|data| f(data)))
    }

    fn try_lock_then<F, Ret>(&self, f: F) -> Option<Ret>
    where
        F: FnOnce(&T) -> Ret,
    {
        self.try_lock_then(|guard| guard.with(|data| f(data)))
    }
}

#[cfg(all(not(loom), test))]
impl<T: ?Sized, L: RawLock> crate::test::LockData for ReentrantMutex<T, L> {
    fn get_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::cell::Cell;
    use std::sync::Arc;
    use std::thread;

    type Mutex<T> = crate::padded::yields::Mutex<T>;

    #[test]
    fn nested_guards_release_in_any_order() {
        let mutex = Mutex::new(Cell::new(0));
        let outer = mutex.lock();
        let inner = mutex.lock();
        assert!(mutex.is_locked());
        drop(outer);
        // One release down, still ours through the remaining guard.
        assert!(mutex.is_locked());
        inner.set(inner.get() + 1);
        drop(inner);
        assert!(!mutex.is_locked());
        assert_eq!(mutex.into_inner().get(), 1);
    }

    #[test]
    fn try_lock_fails_across_threads_only() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock();
        let contender = Arc::clone(&mutex);
        let failed = thread::spawn(move || contender.try_lock().is_none())
            .join()
            .unwrap();
        assert!(failed);
        // The reentrant case still succeeds.
        assert!(mutex.try_lock().is_some());
        drop(guard);
    }

    #[test]
    fn guard_debug_display() {
        let value = 42;
        let mutex = Mutex::new(value);
        let guard = mutex.lock();
        assert_eq!(format!("{value:?}"), format!("{guard:?}"));
        assert_eq!(format!("{value}"), format!("{guard}"));
    }

    #[test]
    fn debug_while_contended_does_not_block() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock();
        let observer = Arc::clone(&mutex);
        let msg = thread::spawn(move || format!("{observer:?}"))
            .join()
            .unwrap();
        assert_eq!(msg, "Mutex { data: <locked> }");
        drop(guard);
    }
}
