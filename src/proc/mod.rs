//! Processes.
//!
//! A process is a table slot: identity and lifecycle state guarded by
//! the single process-table spinlock, a killed flag, an address space,
//! and process-private data (trap frame, fd table, name) that only the
//! process itself touches. Cross-process relationships — parent links
//! and wait channels — are plain values, not owning pointers, so the
//! table has no reference cycles.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::TrapFrame;
use crate::file::FileRef;
use crate::param::{MAXPROCNAME, NOFILE};
use crate::static_refcell::StaticRefCell;
use crate::vm::Vspace;

mod kernel_ctx;
mod procs;
mod wait_channel;

pub use kernel_ctx::KernelCtx;
pub use procs::Procs;
pub use wait_channel::WaitChannel;

pub type Pid = i32;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Procstate {
    UNUSED,
    EMBRYO,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ZOMBIE,
}

impl Procstate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Procstate::UNUSED => "unused",
            Procstate::EMBRYO => "embryo",
            Procstate::SLEEPING => "sleep ",
            Procstate::RUNNABLE => "runble",
            Procstate::RUNNING => "run   ",
            Procstate::ZOMBIE => "zombie",
        }
    }
}

/// Identity and lifecycle, guarded by the process-table spinlock.
/// Reading a single field without the lock (e.g. one's own pid) is
/// fine on this single-CPU machine; every mutation goes through
/// `Procs`.
#[derive(Copy, Clone)]
pub struct ProcInfo {
    pub state: Procstate,
    pub pid: Pid,
    pub parent: Pid,

    /// Wait channel this process sleeps on, if SLEEPING.
    pub chan: usize,
}

impl ProcInfo {
    const fn unused() -> Self {
        Self {
            state: Procstate::UNUSED,
            pid: 0,
            parent: 0,
            chan: 0,
        }
    }
}

/// Process-private state; no lock needed, the owner is the only
/// writer. Borrows are runtime-checked.
pub struct ProcData {
    /// Saved user registers.
    pub tf: TrapFrame,

    /// A system call is parked in the trap frame awaiting re-dispatch.
    pub pending: bool,

    /// Per-process file descriptors into the global open-file table.
    pub files: [Option<FileRef>; NOFILE],

    /// Process name (debugging).
    pub name: [u8; MAXPROCNAME],

    /// Absolute tick deadline of an in-progress sleep(ticks).
    pub alarm: Option<u32>,
}

impl ProcData {
    fn new() -> Self {
        Self {
            tf: TrapFrame::default(),
            pending: false,
            files: [None; NOFILE],
            name: [0; MAXPROCNAME],
            alarm: None,
        }
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let n = core::cmp::min(name.len(), MAXPROCNAME - 1);
        self.name[..n].copy_from_slice(&name[..n]);
        self.name[n] = 0;
    }
}

/// Per-process state.
pub struct Proc {
    info: Cell<ProcInfo>,

    /// If true, the process has been killed; it exits on its next
    /// return to user space.
    killed: AtomicBool,

    pub vspace: StaticRefCell<Vspace>,
    pub data: StaticRefCell<ProcData>,
}

impl Proc {
    fn new() -> Self {
        Self {
            info: Cell::new(ProcInfo::unused()),
            killed: AtomicBool::new(false),
            vspace: StaticRefCell::new(Vspace::new()),
            data: StaticRefCell::new(ProcData::new()),
        }
    }

    pub(crate) fn info(&self) -> ProcInfo {
        self.info.get()
    }

    pub(crate) fn set_info(&self, info: ProcInfo) {
        self.info.set(info);
    }

    /// Kill: the process exits on its next return to user space.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn clear_killed(&self) {
        self.killed.store(false, Ordering::Release);
    }
}
