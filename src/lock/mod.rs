//! The lock module.
//!
//! Contains types for locks and lock guards that provide mutual
//! exclusion, and traits that express their behaviors.
//!
//! The kernel is single-CPU: spinlocks exist to order critical sections
//! against wakeups and to catch re-entry bugs, and sleep-locks are the
//! long-term locks processes may hold across block I/O.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

mod sleeplock;
mod spinlock;

pub use sleeplock::{Sleeplock, SleeplockGuard};
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};

/// Raw locks that busy wait.
pub trait RawLock {
    /// Acquires the lock.
    fn acquire(&self);

    /// Releases the lock.
    fn release(&self);

    /// Check whether the lock is held.
    fn holding(&self) -> bool;
}

/// Locks that own their own `RawLock` and `data: T`.
pub struct Lock<R, T> {
    lock: R,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` goes through the guard, which the lock
// serializes.
unsafe impl<R: Sync, T: Send> Sync for Lock<R, T> {}
unsafe impl<R: Send, T: Send> Send for Lock<R, T> {}

/// Guards that provide exclusive access to the lock's data until
/// dropped.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<R: RawLock, T> Lock<R, T> {
    /// Acquires the lock and returns its guard.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.lock.acquire();
        Guard { lock: self }
    }

    /// Check whether the lock is held.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    /// Consumes the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a raw pointer to the inner data.
    ///
    /// # Safety
    ///
    /// The caller must ensure that accessing the pointer does not incur
    /// a race.
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard holds the lock and `&mut self` is exclusive.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<R, T> Lock<R, T> {
    const fn from_raw(lock: R, data: T) -> Self {
        Self {
            lock,
            data: UnsafeCell::new(data),
        }
    }
}
