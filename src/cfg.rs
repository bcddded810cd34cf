//! Aliases to `core`, `std` and `loom` facilities.
//!
//! Lock state is manipulated through these aliases so that the exact same
//! locking code runs against the real atomics in normal builds and against
//! the [`loom`] permutation checker when compiled with `--cfg loom`.
//!
//! [`loom`]: https://crates.io/crates/loom

pub(crate) mod atomic {
    #[cfg(not(all(loom, test)))]
    pub(crate) use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

    #[cfg(all(loom, test))]
    pub(crate) use ::loom::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
}

pub(crate) mod cell {
    #[cfg(not(all(loom, test)))]
    pub(crate) use core::cell::{Cell, UnsafeCell};

    #[cfg(all(loom, test))]
    pub(crate) use ::loom::cell::UnsafeCell;

    /// A loom based stand-in for [`core::cell::Cell`], restricted to the
    /// surface the lock implementations actually touch.
    #[cfg(all(loom, test))]
    pub(crate) struct Cell<T> {
        inner: UnsafeCell<T>,
    }

    #[cfg(all(loom, test))]
    impl<T: Copy> Cell<T> {
        pub(crate) fn new(value: T) -> Self {
            Self { inner: UnsafeCell::new(value) }
        }

        pub(crate) fn get(&self) -> T {
            // SAFETY: Cell values are only ever accessed by their owning
            // thread, same as the `core` counterpart.
            self.inner.with(|ptr| unsafe { *ptr })
        }

        pub(crate) fn set(&self, value: T) {
            // SAFETY: see `get`.
            self.inner.with_mut(|ptr| unsafe { *ptr = value });
        }
    }

    /// Closure based access to [`UnsafeCell`] contents that both the `core`
    /// and the loom cell types can provide.
    pub(crate) trait UnsafeCellWith<T: ?Sized> {
        /// Runs `f` against a shared reference to the underlying data.
        ///
        /// # Safety
        ///
        /// Caller must guarantee there is no concurrent exclusive access.
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret;

        /// Runs `f` against an exclusive reference to the underlying data.
        ///
        /// # Safety
        ///
        /// Caller must guarantee there is no concurrent access of any kind.
        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret;
    }

    #[cfg(not(all(loom, test)))]
    impl<T: ?Sized> UnsafeCellWith<T> for UnsafeCell<T> {
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret,
        {
            // SAFETY: guaranteed by the caller.
            f(unsafe { &*self.get() })
        }

        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: guaranteed by the caller.
            f(unsafe { &mut *self.get() })
        }
    }

    #[cfg(all(loom, test))]
    impl<T: ?Sized> UnsafeCellWith<T> for UnsafeCell<T> {
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret,
        {
            // SAFETY: guaranteed by the caller.
            self.with(|ptr| f(unsafe { &*ptr }))
        }

        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: guaranteed by the caller.
            self.with_mut(|ptr| f(unsafe { &mut *ptr }))
        }
    }
}

pub(crate) mod hint {
    #[cfg(not(all(loom, test)))]
    pub(crate) use core::hint::spin_loop;

    #[cfg(all(loom, test))]
    pub(crate) use ::loom::hint::spin_loop;
}

pub(crate) mod thread {
    #[cfg(not(all(loom, test)))]
    pub(crate) use std::thread::{sleep, yield_now};

    #[cfg(not(all(loom, test)))]
    pub(crate) use std::thread_local;

    #[cfg(all(loom, test))]
    pub(crate) use ::loom::thread::yield_now;

    #[cfg(all(loom, test))]
    pub(crate) use ::loom::thread_local;

    /// Loom has no notion of time, a sleeping thread simply cedes its slot
    /// in the current permutation.
    #[cfg(all(loom, test))]
    pub(crate) fn sleep(_dur: core::time::Duration) {
        yield_now();
    }
}
