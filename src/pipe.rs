//! Pipes.
//!
//! A pipe is a ring buffer in a single allocator frame, guarded by a
//! spinlock, with monotonically increasing `head` (read) and `tail`
//! (write) counters: `tail - head` is always within `[0, PIPEBUF]`,
//! and `counter % PIPEBUF` indexes the frame. Each direction has its
//! own wait channel; closing a side wakes both.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KernelError, Result};
use crate::file::{FileKind, FileRef, OMode};
use crate::kalloc::Ppn;
use crate::kernel::Kernel;
use crate::lock::Spinlock;
use crate::param::PGSIZE;
use crate::proc::{KernelCtx, WaitChannel};

/// Ring capacity: the whole backing frame.
pub const PIPEBUF: usize = PGSIZE;

struct PipeInner {
    /// Backing frame for the ring data.
    ppn: Ppn,

    /// Bytes read so far.
    head: usize,

    /// Bytes written so far.
    tail: usize,

    /// Read fd is still open.
    readopen: bool,

    /// Write fd is still open.
    writeopen: bool,
}

pub struct Pipe {
    inner: Spinlock<PipeInner>,

    /// Readers park here while the ring is empty.
    read_chan: WaitChannel,

    /// Writers park here while the ring is full.
    write_chan: WaitChannel,
}

impl Pipe {
    /// Reads up to `n` bytes into user memory at `va`. An empty pipe
    /// with the write side open parks the reader; with the write side
    /// closed it is end-of-file.
    pub fn read(&self, va: usize, n: usize, ctx: &KernelCtx<'_>) -> Result<usize> {
        let kernel = ctx.kernel();
        let mut inner = self.inner.lock();

        if inner.head == inner.tail {
            if !inner.writeopen {
                return Ok(0);
            }
            if ctx.killed() {
                return Err(KernelError::Killed);
            }
            return Err(self.read_chan.sleep(&mut inner, ctx));
        }

        let count = core::cmp::min(n, inner.tail - inner.head);
        let mut bytes = Vec::with_capacity(count);
        for i in 0..count {
            let mut byte = [0u8; 1];
            kernel
                .frames()
                .read(inner.ppn, (inner.head + i) % PIPEBUF, &mut byte);
            bytes.push(byte[0]);
        }
        inner.head += count;
        drop(inner);

        kernel.copy_out(va, &bytes, ctx)?;
        self.write_chan.wakeup(kernel);
        Ok(count)
    }

    /// Writes up to `n` bytes from user memory at `va`. A full ring
    /// parks the writer before anything is copied; otherwise up to the
    /// free space is written and the (possibly short) count returned.
    /// A closed read side is an error.
    pub fn write(&self, va: usize, n: usize, ctx: &KernelCtx<'_>) -> Result<usize> {
        let kernel = ctx.kernel();

        // Fetch the source before taking the ring lock; the copy may
        // fault pages in.
        let mut bytes = Vec::new();
        bytes.resize(n, 0);
        kernel.copy_in(&mut bytes, va, ctx)?;

        let mut inner = self.inner.lock();
        if !inner.readopen {
            return Err(KernelError::BrokenPipe);
        }
        if ctx.killed() {
            return Err(KernelError::Killed);
        }
        if inner.tail - inner.head == PIPEBUF {
            return Err(self.write_chan.sleep(&mut inner, ctx));
        }

        let count = core::cmp::min(n, PIPEBUF - (inner.tail - inner.head));
        for (i, byte) in bytes[..count].iter().enumerate() {
            kernel
                .frames()
                .write(inner.ppn, (inner.tail + i) % PIPEBUF, &[*byte]);
        }
        inner.tail += count;
        drop(inner);

        self.read_chan.wakeup(kernel);
        Ok(count)
    }

    /// Closes one side. The last side to close frees the ring frame.
    pub fn close(&self, writable: bool, ctx: &KernelCtx<'_>) {
        let kernel = ctx.kernel();
        let mut inner = self.inner.lock();
        if writable {
            inner.writeopen = false;
        } else {
            inner.readopen = false;
        }
        let free = if !inner.readopen && !inner.writeopen {
            Some(inner.ppn)
        } else {
            None
        };
        drop(inner);

        self.read_chan.wakeup(kernel);
        self.write_chan.wakeup(kernel);
        if let Some(ppn) = free {
            kernel.kfree(ppn);
        }
    }

    /// `(head, tail)` counters, for invariant checks in tests.
    pub fn counters(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.head, inner.tail)
    }
}

impl Kernel {
    /// Creates a pipe and two open-file slots for its ends: the read
    /// end is read-only, the write end write-only.
    pub(crate) fn allocate_pipe(&self, ctx: &KernelCtx<'_>) -> Result<(FileRef, FileRef)> {
        let ppn = self.kalloc(ctx)?;
        self.mark_kernel(ppn);
        let ppn = scopeguard::guard(ppn, |ppn| self.kfree(ppn));

        let pipe = Arc::new(Pipe {
            inner: Spinlock::new("pipe", PipeInner {
                ppn: *ppn,
                head: 0,
                tail: 0,
                readopen: true,
                writeopen: true,
            }),
            read_chan: WaitChannel::new(),
            write_chan: WaitChannel::new(),
        });

        let f0 = self.ftable().alloc(
            FileKind::Pipe { pipe: pipe.clone() },
            OMode::RDONLY,
            ctx,
        )?;
        let f1 = match self.ftable().alloc(
            FileKind::Pipe { pipe: pipe.clone() },
            OMode::WRONLY,
            ctx,
        ) {
            Ok(f1) => f1,
            Err(e) => {
                // The failed alloc already shut the write side; drop
                // the read end and the frame comes back with it.
                scopeguard::ScopeGuard::into_inner(ppn);
                self.ftable().close(f0, ctx);
                return Err(e);
            }
        };

        // The files own the frame now.
        scopeguard::ScopeGuard::into_inner(ppn);
        Ok((f0, f1))
    }
}
