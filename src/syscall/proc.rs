//! Process system calls.

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::proc::KernelCtx;
use crate::vm::RegionKind;

use crate::arch::{pgrounddown, pgroundup};
use crate::param::PGSIZE;

impl Kernel {
    pub(crate) fn sys_fork(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let pid = self.procs().fork(ctx)?;
        Ok(pid as usize)
    }

    pub(crate) fn sys_exit(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        self.procs().exit(ctx);
        Ok(0)
    }

    pub(crate) fn sys_wait(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let pid = self.procs().wait(ctx)?;
        Ok(pid as usize)
    }

    pub(crate) fn sys_kill(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let pid = ctx.argint(0)?;
        self.procs().kill(pid)?;
        Ok(0)
    }

    pub(crate) fn sys_getpid(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        Ok(ctx.pid() as usize)
    }

    /// Grows the heap by `size` bytes and returns the old break. A
    /// non-positive size just reports the current break; there is no
    /// shrinking.
    pub(crate) fn sys_sbrk(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let size = ctx.argint(0)?;
        let old = {
            let vspace = ctx.proc().vspace.borrow();
            vspace.region(RegionKind::Heap).end()
        };
        if size <= 0 {
            return Ok(old);
        }
        let size = size as usize;

        // Reserve frames first: mapping while this address space is
        // borrowed must not evict.
        let npages = (pgroundup(old + size) - pgrounddown(old)) / PGSIZE;
        self.ensure_free_pages(npages, ctx)?;

        {
            let mut vspace = ctx.proc().vspace.borrow_mut();
            let mapped = vspace.add_map(RegionKind::Heap, old, size, true, ctx)?;
            if mapped != size {
                return Err(KernelError::NoMemory);
            }
            vspace.region_mut(RegionKind::Heap).size += size;
            vspace.invalidate();
        }
        self.reinstall_current(ctx);
        Ok(old)
    }

    /// Sleeps until `n` clock ticks have elapsed since the call was
    /// first dispatched.
    pub(crate) fn sys_sleep(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let n = ctx.argint(0)?;
        if n < 0 {
            return Err(KernelError::InvalidArgument);
        }

        let mut ticks = self.ticks().lock();
        let deadline = {
            let mut data = ctx.data_mut();
            match data.alarm {
                Some(deadline) => deadline,
                None => {
                    let deadline = ticks.wrapping_add(n as u32);
                    data.alarm = Some(deadline);
                    deadline
                }
            }
        };
        if ctx.killed() {
            ctx.data_mut().alarm = None;
            return Err(KernelError::Killed);
        }
        if *ticks >= deadline {
            ctx.data_mut().alarm = None;
            return Ok(0);
        }
        Err(self.ticks_chan().sleep(&mut ticks, ctx))
    }

    /// Clock ticks since boot.
    pub(crate) fn sys_uptime(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let _ = ctx;
        let ticks = self.ticks().lock();
        Ok(*ticks as usize)
    }

    /// Testing hook: arm a simulated crash after `n` more block
    /// writes.
    pub(crate) fn sys_crashn(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let n = ctx.argint(0)?;
        if n < 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.disk().lock().arm_crash(n as u32);
        Ok(0)
    }
}
