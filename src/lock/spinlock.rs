//! Spin locks.
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

use super::{Guard, Lock, RawLock};

/// Mutual exclusion lock that busy waits (spins).
pub struct RawSpinlock {
    /// Name of lock, for debugging.
    name: &'static str,

    locked: AtomicBool,
}

/// Locks that busy wait (spin).
pub type Spinlock<T> = Lock<RawSpinlock, T>;
/// Guards of `Spinlock<T>`.
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
        }
    }
}

impl RawLock for RawSpinlock {
    /// Acquires the lock.
    ///
    /// The `Acquire` exchange pairs with the `Release` store in
    /// `release()` so stores inside one critical section are visible to
    /// the next. On a single CPU a lock observed held here can only
    /// mean re-entry, which is a deadlock; panic instead of spinning.
    fn acquire(&self) {
        assert!(!self.holding(), "acquire {}", self.name);
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        assert!(self.holding(), "release {}", self.name);
        self.locked.store(false, Ordering::Release);
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Spinlock<T> {
    /// Returns a new `Spinlock` with name `name` and data `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self::from_raw(RawSpinlock::new(name), data)
    }
}
