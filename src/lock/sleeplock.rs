//! Sleeping locks: long-term locks for processes.
//!
//! A contended sleep-lock does not spin; it parks the caller on the
//! lock's wait channel and unwinds the in-progress system call with
//! `KernelError::Sleeping`. The call is re-dispatched after the holder
//! releases and wakes the channel, and re-attempts the acquisition.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::Spinlock;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::proc::{KernelCtx, Pid, WaitChannel};

/// Long-term locks for processes.
pub struct Sleeplock<T> {
    /// Spinlock protecting this sleep lock.
    lk: Spinlock<SleeplockInfo>,

    /// Waiters park here until the holder releases.
    chan: WaitChannel,

    /// Name of lock, for debugging.
    name: &'static str,

    data: UnsafeCell<T>,
}

// SAFETY: access to `data` goes through the guard, which the lock
// serializes.
unsafe impl<T: Send> Sync for Sleeplock<T> {}
unsafe impl<T: Send> Send for Sleeplock<T> {}

struct SleeplockInfo {
    locked: bool,

    /// Process holding the lock. Meaningful only when `locked`.
    pid: Pid,
}

pub struct SleeplockGuard<'s, T> {
    lock: &'s Sleeplock<T>,
    kernel: &'s Kernel,
}

impl<T> Sleeplock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lk: Spinlock::new("sleep lock", SleeplockInfo {
                locked: false,
                pid: 0,
            }),
            chan: WaitChannel::new(),
            name,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock, or parks the caller until the holder lets go.
    pub fn lock<'s>(&'s self, ctx: &KernelCtx<'s>) -> Result<SleeplockGuard<'s, T>> {
        let mut info = self.lk.lock();
        if info.locked {
            assert!(info.pid != ctx.pid(), "{}: recursive lock", self.name);
            return Err(self.chan.sleep(&mut info, ctx));
        }
        info.locked = true;
        info.pid = ctx.pid();
        drop(info);
        Ok(SleeplockGuard {
            lock: self,
            kernel: ctx.kernel(),
        })
    }

    /// Check whether the calling process is holding the lock.
    pub fn holding(&self, ctx: &KernelCtx<'_>) -> bool {
        let info = self.lk.lock();
        info.locked && info.pid == ctx.pid()
    }

    /// Returns a raw pointer to the inner data.
    ///
    /// # Safety
    ///
    /// The caller must ensure no lock holder can race with the access,
    /// e.g. because the enclosing slot is provably free.
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }
}

impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard holds the lock and `&mut self` is exclusive.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        let mut info = self.lock.lk.lock();
        info.locked = false;
        info.pid = 0;
        drop(info);
        self.lock.chan.wakeup(self.kernel);
    }
}
