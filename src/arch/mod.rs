//! Machine-dependent definitions for the simulated x86-64 machine.
//!
//! Real trap vectors, context-switch assembly and device programming
//! are outside the core; what the kernel consumes is the saved
//! register file of a trapped process, the page-fault error code, and
//! a per-CPU structure naming the running process and the installed
//! translation. The test harness plays the role of the CPU: it issues
//! user-mode loads and stores through the installed page table and
//! enters the trap layer exactly where the vectors would.

use core::cell::{Cell, RefCell};

pub mod vm;

pub use vm::{PageTable, Pte};

/// Saved user register file, pushed at trap entry.
#[derive(Clone, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}

/// Page-fault error code bits (x86-64 `PF` error layout).
pub mod fault {
    /// The faulting page was present (protection violation).
    pub const PRESENT: u64 = 1 << 0;
    /// The access was a write.
    pub const WRITE: u64 = 1 << 1;
    /// The access came from user mode.
    pub const USER: u64 = 1 << 2;
}

/// Per-CPU state. The simulated machine has one CPU.
pub struct Cpu {
    /// Slot of the process running on this cpu, if any.
    proc: Cell<Option<usize>>,

    /// The installed translation (the MMU's current root).
    table: RefCell<PageTable>,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            proc: Cell::new(None),
            table: RefCell::new(PageTable::empty()),
        }
    }

    pub fn current(&self) -> Option<usize> {
        self.proc.get()
    }

    pub fn set_current(&self, slot: Option<usize>) {
        self.proc.set(slot);
    }

    /// Loads a translation into the MMU.
    pub fn install(&self, table: PageTable) {
        *self.table.borrow_mut() = table;
    }

    /// Walks the installed translation the way the MMU would.
    pub fn translate(&self, va: usize) -> Option<Pte> {
        self.table.borrow().lookup(va)
    }
}

/// Round down to the nearest page boundary.
pub const fn pgrounddown(addr: usize) -> usize {
    addr & !(crate::param::PGSIZE - 1)
}

/// Round up to the nearest page boundary.
pub const fn pgroundup(addr: usize) -> usize {
    (addr + crate::param::PGSIZE - 1) & !(crate::param::PGSIZE - 1)
}
