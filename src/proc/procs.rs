//! The process table and scheduler.
//!
//! A fixed pool of process slots behind one spinlock. The scheduler
//! scans the table in order for a RUNNABLE process with kernel work to
//! run (a parked system call, or a pending kill) and dispatches it;
//! a process whose next instruction is in user space is the harness's
//! to drive. Sleep/wakeup rendezvous through channel values under the
//! same lock, which is the sole reason wakeups are not lost.

use alloc::vec::Vec;
use array_macro::array;

use super::{KernelCtx, Pid, Proc, ProcInfo, Procstate};
use crate::error::{KernelError, Result};
use crate::kalloc::Ppn;
use crate::kernel::Kernel;
use crate::lock::{Spinlock, SpinlockGuard};
use crate::param::{NPROC, PGSIZE};
use crate::vm::RegionKind;

struct ProcsShared {
    nextpid: Pid,
    init_slot: Option<usize>,
}

pub struct Procs {
    lock: Spinlock<ProcsShared>,
    pool: [Proc; NPROC],
}

impl Procs {
    pub fn new() -> Self {
        Self {
            lock: Spinlock::new("ptable", ProcsShared {
                nextpid: 1,
                init_slot: None,
            }),
            pool: array![_ => Proc::new(); NPROC],
        }
    }

    pub fn proc(&self, slot: usize) -> &Proc {
        &self.pool[slot]
    }

    /// Slot of the process with the given pid.
    pub fn slot_of(&self, pid: Pid) -> Option<usize> {
        let _shared = self.lock.lock();
        self.pool.iter().position(|p| {
            let info = p.info();
            info.state != Procstate::UNUSED && info.pid == pid
        })
    }

    /// Looks for an UNUSED slot; if found, moves it to EMBRYO with a
    /// fresh pid and reset private state.
    fn alloc(&self) -> Result<usize> {
        let slot = {
            let mut shared = self.lock.lock();
            let slot = self
                .pool
                .iter()
                .position(|p| p.info().state == Procstate::UNUSED)
                .ok_or(KernelError::NoMemory)?;
            let pid = shared.nextpid;
            shared.nextpid += 1;
            self.pool[slot].set_info(ProcInfo {
                state: Procstate::EMBRYO,
                pid,
                parent: 0,
                chan: 0,
            });
            slot
        };
        let p = &self.pool[slot];
        p.clear_killed();
        let mut data = p.data.borrow_mut();
        *data = super::ProcData::new();
        data.pending = false;
        Ok(slot)
    }

    /// Sets up the first user process: an empty address space with one
    /// stack page, named init. Every orphan is reparented to it.
    pub(crate) fn userinit(&self, kernel: &Kernel) -> Pid {
        let slot = self.alloc().expect("userinit: no slot");
        let ctx = KernelCtx::new(kernel, slot);

        kernel
            .ensure_free_pages(1, &ctx)
            .expect("userinit: no memory");
        {
            let mut vspace = self.pool[slot].vspace.borrow_mut();
            let top = vspace.region(RegionKind::Stack).base;
            let mapped = vspace
                .add_map(RegionKind::Stack, top - PGSIZE, PGSIZE, true, &ctx)
                .expect("userinit: stack");
            assert_eq!(mapped, PGSIZE);
            vspace.region_mut(RegionKind::Stack).size = PGSIZE;
            vspace.invalidate();
        }
        self.pool[slot].data.borrow_mut().set_name(b"init");

        let mut shared = self.lock.lock();
        shared.init_slot = Some(slot);
        let mut info = self.pool[slot].info();
        info.state = Procstate::RUNNABLE;
        self.pool[slot].set_info(info);
        info.pid
    }

    /// Creates a new process copying the caller: CoW-cloned address
    /// space, copied trap frame with a zero return value, duplicated
    /// fd table. The child starts RUNNABLE.
    pub(crate) fn fork(&self, ctx: &KernelCtx<'_>) -> Result<Pid> {
        let kernel = ctx.kernel();
        let slot = self.alloc()?;
        let child = &self.pool[slot];

        // Clone the vspace under the table lock, as fork does.
        {
            let _shared = self.lock.lock();
            let mut cvs = child.vspace.borrow_mut();
            let mut pvs = ctx.proc().vspace.borrow_mut();
            cvs.copy_cow(&mut pvs, kernel);
        }
        // The parent's own mappings were downgraded; reload them.
        kernel.reinstall_current(ctx);

        // Trap frame, name, and fd table. The child returns 0.
        let dup_result: Result<()> = {
            let pdata = ctx.proc().data.borrow();
            let mut cdata = child.data.borrow_mut();
            cdata.tf = pdata.tf.clone();
            cdata.tf.rax = 0;
            cdata.name = pdata.name;
            let mut res = Ok(());
            for (i, f) in pdata.files.iter().enumerate() {
                if let Some(f) = f {
                    if let Err(e) = kernel.ftable().dup(*f, ctx) {
                        res = Err(e);
                        break;
                    }
                    cdata.files[i] = Some(*f);
                }
            }
            res
        };
        if let Err(e) = dup_result {
            self.teardown(slot, ctx);
            return Err(e);
        }

        let _shared = self.lock.lock();
        let mut info = child.info();
        info.parent = ctx.pid();
        info.state = Procstate::RUNNABLE;
        child.set_info(info);
        Ok(info.pid)
    }

    /// Releases a half-built process after a failed fork.
    fn teardown(&self, slot: usize, ctx: &KernelCtx<'_>) {
        let p = &self.pool[slot];
        let files: Vec<_> = {
            let mut data = p.data.borrow_mut();
            data.files.iter_mut().filter_map(|f| f.take()).collect()
        };
        for f in files {
            ctx.kernel().ftable().close(f, ctx);
        }
        p.vspace.borrow_mut().free(ctx.kernel());
        p.set_info(ProcInfo {
            state: Procstate::UNUSED,
            pid: 0,
            parent: 0,
            chan: 0,
        });
    }

    /// Exits the current process: closes every descriptor, reparents
    /// children to init, turns ZOMBIE and wakes the parent. The zombie
    /// keeps its address space until the parent reaps it in `wait`.
    pub(crate) fn exit(&self, ctx: &KernelCtx<'_>) {
        let kernel = ctx.kernel();
        let files: Vec<_> = {
            let mut data = ctx.proc().data.borrow_mut();
            data.pending = false;
            data.files.iter_mut().filter_map(|f| f.take()).collect()
        };
        for f in files {
            kernel.ftable().close(f, ctx);
        }

        let shared = self.lock.lock();
        let my = ctx.proc().info();
        let init_slot = shared.init_slot.expect("exit before userinit");
        assert!(init_slot != ctx.slot(), "init exiting");
        let init_pid = self.pool[init_slot].info().pid;

        for p in self.pool.iter() {
            let mut info = p.info();
            if info.state != Procstate::UNUSED && info.pid != my.pid && info.parent == my.pid {
                info.parent = init_pid;
                p.set_info(info);
            }
        }

        let mut info = my;
        info.state = Procstate::ZOMBIE;
        ctx.proc().set_info(info);

        // Signal the waiting parent.
        self.wakeup_locked(&shared, my.parent as usize);
        drop(shared);

        if kernel.cpu().current() == Some(ctx.slot()) {
            kernel.cpu().set_current(None);
        }
        log::debug!("exit: pid {}", my.pid);
    }

    /// Reaps a ZOMBIE child: frees its resources and returns its pid.
    /// With live children but no zombie, sleeps on the caller's pid;
    /// with no children at all, fails.
    pub(crate) fn wait(&self, ctx: &KernelCtx<'_>) -> Result<Pid> {
        let mut shared = self.lock.lock();
        let my_pid = ctx.proc().info().pid;

        let mut haschild = false;
        for p in self.pool.iter() {
            let info = p.info();
            if info.state == Procstate::UNUSED || info.parent != my_pid {
                continue;
            }
            haschild = true;
            if info.state == Procstate::ZOMBIE {
                p.vspace.borrow_mut().free(ctx.kernel());
                p.set_info(ProcInfo {
                    state: Procstate::UNUSED,
                    pid: 0,
                    parent: 0,
                    chan: 0,
                });
                p.clear_killed();
                return Ok(info.pid);
            }
        }
        if !haschild {
            return Err(KernelError::NoChild);
        }
        Err(self.sleep_locked(&mut shared, my_pid as usize, ctx))
    }

    /// Kills the process with the given pid; a sleeper is woken so it
    /// can observe the flag.
    pub(crate) fn kill(&self, pid: Pid) -> Result<()> {
        let _shared = self.lock.lock();
        for p in self.pool.iter() {
            let mut info = p.info();
            if info.state != Procstate::UNUSED && info.pid == pid {
                p.kill();
                if info.state == Procstate::SLEEPING {
                    info.state = Procstate::RUNNABLE;
                    info.chan = 0;
                    p.set_info(info);
                }
                return Ok(());
            }
        }
        Err(KernelError::NoSuchEntry)
    }

    /// Parks the current process on `chan`. The caller holds the
    /// spinlock guarding the slept-on condition; the table lock is
    /// taken (and the state changed) before that guard is released on
    /// unwind, so no wakeup can be missed.
    pub(crate) fn sleep_current(&self, chan: usize, ctx: &KernelCtx<'_>) -> KernelError {
        let mut shared = self.lock.lock();
        self.sleep_locked(&mut shared, chan, ctx)
    }

    /// Sleep variant for callers already holding the table lock.
    fn sleep_locked(
        &self,
        _shared: &mut SpinlockGuard<'_, ProcsShared>,
        chan: usize,
        ctx: &KernelCtx<'_>,
    ) -> KernelError {
        let p = ctx.proc();
        let mut info = p.info();
        info.state = Procstate::SLEEPING;
        info.chan = chan;
        p.set_info(info);
        KernelError::Sleeping
    }

    /// Wakes every process sleeping on `chan`.
    pub(crate) fn wakeup(&self, chan: usize) {
        let shared = self.lock.lock();
        self.wakeup_locked(&shared, chan);
    }

    fn wakeup_locked(&self, _shared: &SpinlockGuard<'_, ProcsShared>, chan: usize) {
        for p in self.pool.iter() {
            let mut info = p.info();
            if info.state == Procstate::SLEEPING && info.chan == chan {
                info.state = Procstate::RUNNABLE;
                info.chan = 0;
                p.set_info(info);
            }
        }
    }

    /// One scheduling round: scans the table in order for a RUNNABLE
    /// process with kernel work (a parked call or a pending kill),
    /// installs its address space, marks it RUNNING and dispatches it.
    /// Returns the pid it ran.
    pub(crate) fn scheduler(&self, kernel: &Kernel) -> Option<Pid> {
        let (slot, pid) = {
            let _shared = self.lock.lock();
            let mut found = None;
            for (slot, p) in self.pool.iter().enumerate() {
                let info = p.info();
                if info.state != Procstate::RUNNABLE {
                    continue;
                }
                if p.data.borrow().pending || p.killed() {
                    let mut info = p.info();
                    info.state = Procstate::RUNNING;
                    p.set_info(info);
                    found = Some((slot, info.pid));
                    break;
                }
            }
            found?
        };

        kernel.cpu().set_current(Some(slot));
        kernel
            .cpu()
            .install(self.pool[slot].vspace.borrow().pagetable().clone());
        crate::trap::resume(kernel, slot);
        Some(pid)
    }

    /// Timer preemption: the running process gives up the CPU.
    pub(crate) fn yield_cpu(&self, kernel: &Kernel) {
        if let Some(slot) = kernel.cpu().current() {
            let _shared = self.lock.lock();
            let p = &self.pool[slot];
            let mut info = p.info();
            if info.state == Procstate::RUNNING {
                info.state = Procstate::RUNNABLE;
                p.set_info(info);
            }
        }
    }

    /// Retargets every mapping of frame `ppn` to `swap_index` in every
    /// address space, rebuilding the affected page tables.
    pub(crate) fn mark_swapped(
        &self,
        kernel: &Kernel,
        ppn: Ppn,
        swap_index: usize,
        va: usize,
    ) -> usize {
        let _shared = self.lock.lock();
        let mut count = 0;
        for (slot, p) in self.pool.iter().enumerate() {
            if p.info().state == Procstate::UNUSED {
                continue;
            }
            let mut vspace = p.vspace.borrow_mut();
            let changed = vspace.mark_swapped(ppn, swap_index, va);
            if changed > 0 && kernel.cpu().current() == Some(slot) {
                kernel.cpu().install(vspace.pagetable().clone());
            }
            count += changed;
        }
        count
    }

    /// Re-points every mapping of `swap_index` at the fresh frame
    /// `ppn` in every address space.
    pub(crate) fn update_cow_refs(
        &self,
        kernel: &Kernel,
        ppn: Ppn,
        swap_index: usize,
        va: usize,
    ) -> usize {
        let _shared = self.lock.lock();
        let mut count = 0;
        for (slot, p) in self.pool.iter().enumerate() {
            if p.info().state == Procstate::UNUSED {
                continue;
            }
            let mut vspace = p.vspace.borrow_mut();
            let changed = vspace.update_cow_refs(ppn, swap_index, va);
            if changed > 0 && kernel.cpu().current() == Some(slot) {
                kernel.cpu().install(vspace.pagetable().clone());
            }
            count += changed;
        }
        count
    }

    /// Prints a process listing, for debugging.
    pub fn procdump(&self) {
        for p in self.pool.iter() {
            let info = p.info();
            if info.state == Procstate::UNUSED {
                continue;
            }
            let data = p.data.borrow();
            let name_len = data.name.iter().position(|b| *b == 0).unwrap_or(0);
            log::info!(
                "{} {} {}",
                info.pid,
                info.state.as_str(),
                core::str::from_utf8(&data.name[..name_len]).unwrap_or("???")
            );
        }
    }
}
