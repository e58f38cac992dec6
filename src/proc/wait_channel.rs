//! Wait channels: the rendezvous token between sleepers and wakers.
//!
//! A channel is identified by its address, so a `WaitChannel` must not
//! move while anyone might sleep on it (the kernel and pipes keep
//! theirs at stable addresses for their whole lifetime).

use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::lock::SpinlockGuard;
use crate::proc::KernelCtx;

pub struct WaitChannel {
    /// Makes the type non-zero-sized; distinct channels must have
    /// distinct addresses.
    _padding: u8,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self { _padding: 0 }
    }

    pub fn as_chan(&self) -> usize {
        self as *const _ as usize
    }

    /// Parks the calling process on this channel and unwinds the
    /// system call with `Sleeping`.
    ///
    /// The caller still holds the spinlock protecting the condition it
    /// checked; the process table is locked and the process marked
    /// SLEEPING *before* that guard is released on the way out, so a
    /// wakeup cannot slip between the check and the sleep. The
    /// re-dispatch re-runs the call, which re-checks the condition —
    /// the sleep/wakeup convention.
    #[must_use]
    pub fn sleep<T>(&self, _guard: &mut SpinlockGuard<'_, T>, ctx: &KernelCtx<'_>) -> KernelError {
        ctx.kernel().procs().sleep_current(self.as_chan(), ctx)
    }

    /// Wakes every process sleeping on this channel.
    pub fn wakeup(&self, kernel: &Kernel) {
        kernel.procs().wakeup(self.as_chan());
    }
}
