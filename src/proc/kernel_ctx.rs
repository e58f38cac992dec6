//! The kernel context: which kernel, which current process.
//!
//! Every operation that runs on behalf of a process carries one of
//! these instead of reaching for a global. Boot-time work (recovery,
//! file-system init) runs with the boot context, which has no process
//! and therefore must never sleep.

use crate::kernel::Kernel;
use crate::proc::{Pid, Proc, ProcData};
use crate::static_refcell::{Ref, RefMut};

const NO_PROC: usize = usize::MAX;

#[derive(Copy, Clone)]
pub struct KernelCtx<'s> {
    kernel: &'s Kernel,
    slot: usize,
}

impl<'s> KernelCtx<'s> {
    pub(crate) fn new(kernel: &'s Kernel, slot: usize) -> Self {
        Self { kernel, slot }
    }

    /// The context of boot-time kernel work, before processes exist.
    pub(crate) fn boot(kernel: &'s Kernel) -> Self {
        Self {
            kernel,
            slot: NO_PROC,
        }
    }

    pub fn kernel(&self) -> &'s Kernel {
        self.kernel
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn proc(&self) -> &'s Proc {
        assert!(self.slot != NO_PROC, "no current process");
        self.kernel.procs().proc(self.slot)
    }

    /// Pid of the current process, or 0 for the boot context.
    pub fn pid(&self) -> Pid {
        if self.slot == NO_PROC {
            0
        } else {
            self.proc().info().pid
        }
    }

    pub fn killed(&self) -> bool {
        self.slot != NO_PROC && self.proc().killed()
    }

    pub fn data(&self) -> Ref<ProcData> {
        self.proc().data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<ProcData> {
        self.proc().data.borrow_mut()
    }
}
