//! The kernel: every subsystem behind one owned value.
//!
//! `Kernel::new` boots over a disk image: it reads the superblock,
//! replays the log if a committed transaction is pending, and loads
//! the inode file — all before any other I/O. The returned box must
//! stay where it is: wait channels are identified by address.
//!
//! The simulated machine drives the kernel through a few entry points:
//! `syscall` (a trap from the process's user code), `schedule` (one
//! scheduler round over parked work), `tick` (the clock interrupt),
//! and `user_read`/`user_write` (user-mode memory accesses through the
//! installed translation, raising page faults as real loads and stores
//! would).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::convert::TryFrom;

use crate::arch::{fault, Cpu, TrapFrame};
use crate::bio::Bcache;
use crate::console::{consoleread, consolewrite, Console, CONSOLE};
use crate::error::{KernelError, Result};
use crate::file::{Devsw, FileKind, FileTable};
use crate::fs::{FileSystem, Superblock};
use crate::hal::MemDisk;
use crate::kalloc::{Frames, Kmem};
use crate::lock::Spinlock;
use crate::param::{NDEV, PGSIZE, ROOTDEV, SWAPPAGES};
use crate::proc::{KernelCtx, Pid, Procs, Procstate, WaitChannel};
use crate::trap;
use crate::vm::{VPageInfo, Vspace};

pub struct Kernel {
    frames: Frames,
    kmem: Spinlock<Kmem>,

    ticks: Spinlock<u32>,
    ticks_chan: WaitChannel,

    procs: Procs,
    bcache: Bcache,
    ftable: FileTable,
    fs: FileSystem,
    console: Console,
    devsw: [Devsw; NDEV],

    disk: Spinlock<MemDisk>,
    cpu: Cpu,
}

impl Kernel {
    /// Boots a kernel over `disk` with `npages` physical frames.
    pub fn new(disk: MemDisk, npages: usize) -> Box<Kernel> {
        let superblock = Superblock::read(&disk);
        let mut devsw = [Devsw::none(); NDEV];
        devsw[CONSOLE as usize] = Devsw {
            read: Some(consoleread),
            write: Some(consolewrite),
        };

        let kernel = Box::new(Kernel {
            frames: Frames::new(npages),
            kmem: Spinlock::new("kmem", Kmem::new(npages, SWAPPAGES)),
            ticks: Spinlock::new("time", 0),
            ticks_chan: WaitChannel::new(),
            procs: Procs::new(),
            bcache: Bcache::new(),
            ftable: FileTable::new(),
            fs: FileSystem::new(ROOTDEV, superblock),
            console: Console::new(),
            devsw,
            disk: Spinlock::new("disk", disk),
            cpu: Cpu::new(),
        });

        let ctx = KernelCtx::boot(&kernel);
        kernel.fs.init(&kernel, &ctx);
        kernel
    }

    pub(crate) fn frames(&self) -> &Frames {
        &self.frames
    }

    pub(crate) fn kmem(&self) -> &Spinlock<Kmem> {
        &self.kmem
    }

    pub(crate) fn ticks(&self) -> &Spinlock<u32> {
        &self.ticks
    }

    pub(crate) fn ticks_chan(&self) -> &WaitChannel {
        &self.ticks_chan
    }

    pub fn procs(&self) -> &Procs {
        &self.procs
    }

    pub(crate) fn bcache(&self) -> &Bcache {
        &self.bcache
    }

    pub(crate) fn ftable(&self) -> &FileTable {
        &self.ftable
    }

    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    pub(crate) fn console(&self) -> &Console {
        &self.console
    }

    pub(crate) fn devsw(&self, devid: i16) -> Option<&Devsw> {
        self.devsw.get(usize::try_from(devid).ok()?)
    }

    pub(crate) fn disk(&self) -> &Spinlock<MemDisk> {
        &self.disk
    }

    pub(crate) fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Sets up the first user process.
    pub fn userinit(&self) -> Pid {
        self.procs.userinit(self)
    }

    /// A trap from `pid`'s user code: dispatches system call `num`
    /// with up to three arguments. Returns the value delivered in
    /// `rax`, or `None` if the process parked inside the call (a later
    /// wakeup and `schedule` finish it).
    pub fn syscall(&self, pid: Pid, num: u64, args: [u64; 3]) -> Option<i64> {
        let slot = self.procs.slot_of(pid).expect("syscall: no such process");
        let p = self.procs.proc(slot);
        {
            let mut data = p.data.borrow_mut();
            assert!(!data.pending, "syscall: process is parked in a call");
            data.tf.rax = num;
            data.tf.rdi = args[0];
            data.tf.rsi = args[1];
            data.tf.rdx = args[2];
            data.pending = true;
        }
        self.run_slot(slot);
        trap::resume(self, slot);

        let data = p.data.borrow();
        if data.pending {
            None
        } else {
            Some(data.tf.rax as i64)
        }
    }

    /// One scheduler round: runs the first RUNNABLE process with
    /// kernel work pending. Returns the pid it ran, if any.
    pub fn schedule(&self) -> Option<Pid> {
        self.procs.scheduler(self)
    }

    /// Runs scheduler rounds until no process has kernel work left.
    pub fn run(&self) {
        while self.schedule().is_some() {}
    }

    /// The clock interrupt: bumps the tick count, wakes sleepers, and
    /// preempts the running process.
    pub fn tick(&self) {
        {
            let mut ticks = self.ticks.lock();
            *ticks = ticks.wrapping_add(1);
        }
        self.ticks_chan.wakeup(self);
        self.procs.yield_cpu(self);
    }

    /// Switches the CPU to `slot`: marks it RUNNING and installs its
    /// translation.
    fn run_slot(&self, slot: usize) {
        let p = self.procs.proc(slot);
        let info = p.info();
        assert!(
            matches!(info.state, Procstate::RUNNABLE | Procstate::RUNNING),
            "run_slot: {:?}",
            info.state
        );
        let mut info = info;
        info.state = Procstate::RUNNING;
        p.set_info(info);
        self.cpu.set_current(Some(slot));
        self.cpu.install(p.vspace.borrow().pagetable().clone());
    }

    /// A user-mode store by `pid`: walks the installed translation and
    /// raises page faults exactly as the MMU would. Fails only if the
    /// fault policy killed the process.
    pub fn user_write(&self, pid: Pid, va: usize, bytes: &[u8]) -> Result<()> {
        let slot = self.procs.slot_of(pid).ok_or(KernelError::NoSuchEntry)?;
        self.run_slot(slot);
        for (i, byte) in bytes.iter().enumerate() {
            let a = va + i;
            loop {
                match self.cpu.translate(a) {
                    Some(pte) if pte.user && pte.writable => {
                        self.frames.write(pte.ppn, a % PGSIZE, &[*byte]);
                        break;
                    }
                    Some(_) => {
                        self.fault_or_die(slot, a, fault::USER | fault::WRITE | fault::PRESENT)?;
                    }
                    None => {
                        self.fault_or_die(slot, a, fault::USER | fault::WRITE)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// A user-mode load by `pid`.
    pub fn user_read(&self, pid: Pid, va: usize, bytes: &mut [u8]) -> Result<()> {
        let slot = self.procs.slot_of(pid).ok_or(KernelError::NoSuchEntry)?;
        self.run_slot(slot);
        for (i, byte) in bytes.iter_mut().enumerate() {
            let a = va + i;
            loop {
                match self.cpu.translate(a) {
                    Some(pte) if pte.user => {
                        let mut b = [0u8; 1];
                        self.frames.read(pte.ppn, a % PGSIZE, &mut b);
                        *byte = b[0];
                        break;
                    }
                    Some(_) => {
                        self.fault_or_die(slot, a, fault::USER | fault::PRESENT)?;
                    }
                    None => {
                        self.fault_or_die(slot, a, fault::USER)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Raises a page fault; an unhandled one forces the faulting
    /// process out on this, its return to user mode.
    fn fault_or_die(&self, slot: usize, addr: usize, err: u64) -> Result<()> {
        match trap::page_fault(self, slot, addr, err) {
            Ok(()) => Ok(()),
            Err(e) => {
                let ctx = KernelCtx::new(self, slot);
                self.procs.exit(&ctx);
                Err(e)
            }
        }
    }

    /// Shuts the machine down and hands back the disk image.
    pub fn into_disk(self: Box<Self>) -> MemDisk {
        let kernel = *self;
        kernel.disk.into_inner()
    }

    /// Prints a process listing, for debugging.
    pub fn procdump(&self) {
        self.procs.procdump();
    }

    // Test-facing introspection.

    pub fn proc_state(&self, pid: Pid) -> Option<Procstate> {
        let slot = self.procs.slot_of(pid)?;
        Some(self.procs.proc(slot).info().state)
    }

    pub fn trapframe(&self, pid: Pid) -> Option<TrapFrame> {
        let slot = self.procs.slot_of(pid)?;
        Some(self.procs.proc(slot).data.borrow().tf.clone())
    }

    /// Runs `f` against the process's address space.
    pub fn with_vspace<R>(&self, pid: Pid, f: impl FnOnce(&Vspace) -> R) -> Option<R> {
        let slot = self.procs.slot_of(pid)?;
        Some(f(&self.procs.proc(slot).vspace.borrow()))
    }

    /// Every mapped page of a process, for invariant checks.
    pub fn mapped_pages(&self, pid: Pid) -> Vec<(usize, VPageInfo)> {
        self.with_vspace(pid, |vs| vs.mapped_pages()).unwrap_or_default()
    }

    /// Global-slot reference count behind a process's fd, for
    /// invariant checks.
    pub fn fd_refcnt(&self, pid: Pid, fd: usize) -> Option<u32> {
        let slot = self.procs.slot_of(pid)?;
        let ctx = KernelCtx::boot(self);
        let f = self.procs.proc(slot).data.borrow().files[fd]?;
        Some(self.ftable.refcnt(f, &ctx))
    }

    /// `(head, tail)` of the pipe behind a process's fd, for invariant
    /// checks.
    pub fn pipe_counters(&self, pid: Pid, fd: usize) -> Option<(usize, usize)> {
        let slot = self.procs.slot_of(pid)?;
        let f = self.procs.proc(slot).data.borrow().files[fd]?;
        let ctx = KernelCtx::boot(self);
        let file = self.ftable.slot(f).lock(&ctx).ok()?;
        match &file.kind {
            FileKind::Pipe { pipe } => Some(pipe.counters()),
            _ => None,
        }
    }

    /// Arms the crashn testing hook directly (also reachable as a
    /// system call).
    pub fn arm_crash(&self, n: u32) {
        self.disk.lock().arm_crash(n);
    }

    /// Whether the simulated disk has crashed.
    pub fn crashed(&self) -> bool {
        self.disk.lock().crashed()
    }

    /// Block writes the disk has performed, for crash-point sweeps.
    pub fn disk_writes(&self) -> u64 {
        self.disk.lock().nwrites()
    }

    /// Cache reference count of a disk block; every `bread` must have
    /// been balanced by a release.
    pub fn buffer_refcnt(&self, blockno: u32) -> u32 {
        self.bcache.refcnt(self.fs.dev(), blockno)
    }
}
