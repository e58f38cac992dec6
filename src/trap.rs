//! Trap handling: system-call entry, page faults, clock ticks.
//!
//! The simulated machine enters here where the trap vectors would. A
//! parked system call is re-dispatched from the saved trap frame by
//! the scheduler; page faults raised by user-mode accesses are
//! resolved in the order: swapped page, stack growth, CoW write —
//! anything else kills the process (or panics for a kernel-mode
//! fault).

use crate::arch::{fault, pgrounddown};
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::param::{PGSIZE, STACKPAGES};
use crate::proc::{KernelCtx, Procstate};
use crate::vm::RegionKind;

/// Runs the pending kernel work of a RUNNING process: the kill check
/// on entry, the saved system call, and the kill check on the way back
/// to user mode.
pub(crate) fn resume(kernel: &Kernel, slot: usize) {
    let ctx = KernelCtx::new(kernel, slot);

    if ctx.killed() {
        kernel.procs().exit(&ctx);
        return;
    }

    let (num, pending) = {
        let data = ctx.data();
        (data.tf.rax, data.pending)
    };
    if pending {
        let ret = kernel.dispatch(num, &ctx);
        match ret {
            Err(KernelError::Sleeping) => {
                // Parked; the trap frame still holds the call for the
                // re-dispatch after a wakeup.
                debug_assert_eq!(ctx.proc().info().state, Procstate::SLEEPING);
            }
            Ok(v) => {
                let mut data = ctx.data_mut();
                data.tf.rax = v as u64;
                data.pending = false;
            }
            Err(_) => {
                let mut data = ctx.data_mut();
                data.tf.rax = (-1i64) as u64;
                data.pending = false;
            }
        }
    }

    if ctx.killed() && ctx.proc().info().state == Procstate::RUNNING {
        kernel.procs().exit(&ctx);
        return;
    }

    // Back to user mode; the harness drives the next instruction.
    kernel.procs().yield_cpu(kernel);
}

/// Services a page fault at `addr` with x86 error code `err`.
/// Returns `Err(Killed)` when the fault is not covered by the
/// swap-in / stack-growth / CoW rules and the process was killed.
pub(crate) fn page_fault(kernel: &Kernel, slot: usize, addr: usize, err: u64) -> Result<()> {
    let ctx = KernelCtx::new(kernel, slot);

    if err & fault::USER == 0 {
        // In the kernel, it must be our mistake.
        panic!("unexpected kernel page fault at {:#x} (err {:#x})", addr, err);
    }

    if err & fault::PRESENT == 0 {
        // A swapped page faults not-present; bring it back in. Every
        // mapping of the slot is retargeted at the fresh frame.
        let swapped = ctx
            .proc()
            .vspace
            .borrow()
            .page_at(addr)
            .filter(|info| info.swapped)
            .map(|info| info.swap_index);
        if let Some(swap_index) = swapped {
            kernel
                .swappage_in(swap_index, &ctx)
                .expect("page fault: out of memory and swap");
            kernel.reinstall_current(&ctx);
            return Ok(());
        }

        // A not-present write just below the stack grows it, up to
        // the growth window.
        if err & fault::WRITE != 0 {
            let (top, low) = {
                let vspace = ctx.proc().vspace.borrow();
                let stack = vspace.region(RegionKind::Stack);
                (stack.base, stack.end())
            };
            let new_low = pgrounddown(addr);
            if addr < top && addr > top - STACKPAGES * PGSIZE && new_low < low {
                let grow = low - new_low;
                kernel
                    .ensure_free_pages(grow / PGSIZE, &ctx)
                    .expect("page fault: cannot grow stack");
                {
                    let mut vspace = ctx.proc().vspace.borrow_mut();
                    let mapped = vspace
                        .add_map(RegionKind::Stack, new_low, grow, true, &ctx)
                        .expect("page fault: stack map");
                    assert_eq!(mapped, grow, "page fault: short stack map");
                    vspace.region_mut(RegionKind::Stack).size += grow;
                    vspace.invalidate();
                }
                kernel.reinstall_current(&ctx);
                return Ok(());
            }
        }
    } else if err & fault::WRITE != 0 {
        // A write protection fault on a CoW page gets a private copy.
        let is_cow = ctx
            .proc()
            .vspace
            .borrow()
            .page_at(addr)
            .map(|info| info.present && info.cow)
            .unwrap_or(false);
        if is_cow {
            kernel
                .cow_break(addr, &ctx)
                .expect("page fault: cannot copy cow page");
            return Ok(());
        }
    }

    // Assume the process misbehaved.
    log::warn!(
        "pid {}: unhandled page fault at {:#x} (err {:#x}), killing",
        ctx.pid(),
        addr,
        err
    );
    ctx.proc().kill();
    Err(KernelError::Killed)
}
