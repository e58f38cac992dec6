//! File descriptors.
//!
//! The global open-file table unifies regular files, device files and
//! pipes behind a tagged variant. Each slot carries a sleep-lock, a
//! reference count, an open mode and (for regular files) a byte
//! offset. The slot lock serializes the whole read or write, offset
//! update included, so concurrent operations on one descriptor never
//! interleave.

use alloc::sync::Arc;
use alloc::vec;

use array_macro::array;

use crate::error::{KernelError, Result};
use crate::fs::{IType, Iref, Path, Stat};
use crate::kernel::Kernel;
use crate::lock::Sleeplock;
use crate::param::{BSIZE, MAXOPBLOCKS, NFILE};
use crate::pipe::Pipe;
use crate::proc::KernelCtx;

bitflags! {
    /// Open modes.
    pub struct OMode: u32 {
        const RDONLY = 0x0;
        const WRONLY = 0x1;
        const RDWR = 0x2;
        const CREATE = 0x200;
    }
}

impl OMode {
    fn access(self) -> u32 {
        self.bits() & 0x3
    }

    pub fn valid_access(self) -> bool {
        self.access() != 0x3
    }

    pub fn readable(self) -> bool {
        matches!(self.access(), 0x0 | 0x2)
    }

    pub fn writable(self) -> bool {
        matches!(self.access(), 0x1 | 0x2)
    }

    pub fn create(self) -> bool {
        self.contains(OMode::CREATE)
    }
}

/// What an open-file slot holds.
pub enum FileKind {
    None,
    Inode { ip: Iref },
    Device { ip: Iref, devid: i16 },
    Pipe { pipe: Arc<Pipe> },
}

/// One open-file entry, guarded by the slot's sleep-lock.
pub struct File {
    pub refcnt: u32,
    pub kind: FileKind,
    pub perm: OMode,
    pub offset: u32,
}

impl File {
    fn free() -> Self {
        Self {
            refcnt: 0,
            kind: FileKind::None,
            perm: OMode::RDONLY,
            offset: 0,
        }
    }
}

/// A process-side handle: an index into the global table. Each copy in
/// an fd table accounts for one slot reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileRef(pub(crate) usize);

/// Map from device id to device read/write operations.
#[derive(Copy, Clone)]
pub struct Devsw {
    pub read: Option<fn(&KernelCtx<'_>, &mut [u8]) -> Result<usize>>,
    pub write: Option<fn(&KernelCtx<'_>, &[u8]) -> Result<usize>>,
}

impl Devsw {
    pub const fn none() -> Self {
        Self {
            read: None,
            write: None,
        }
    }
}

pub struct FileTable {
    slots: [Sleeplock<File>; NFILE],
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            slots: array![_ => Sleeplock::new("file", File::free()); NFILE],
        }
    }

    /// Claims a free slot for `kind`. On failure the inode reference or
    /// pipe endpoint inside `kind` is released before returning.
    pub(crate) fn alloc(
        &self,
        kind: FileKind,
        perm: OMode,
        ctx: &KernelCtx<'_>,
    ) -> Result<FileRef> {
        for (idx, slot) in self.slots.iter().enumerate() {
            let mut file = match slot.lock(ctx) {
                Ok(file) => file,
                Err(e) => {
                    drop_kind(kind, perm, ctx);
                    return Err(e);
                }
            };
            if file.refcnt == 0 {
                *file = File {
                    refcnt: 1,
                    kind,
                    perm,
                    offset: 0,
                };
                return Ok(FileRef(idx));
            }
        }
        drop_kind(kind, perm, ctx);
        Err(KernelError::TooManyOpenFile)
    }

    /// Bumps the slot's reference count (fork, dup).
    pub(crate) fn dup(&self, f: FileRef, ctx: &KernelCtx<'_>) -> Result<()> {
        let mut file = self.slots[f.0].lock(ctx)?;
        assert!(file.refcnt > 0, "filedup");
        file.refcnt += 1;
        Ok(())
    }

    /// Drops one reference; the last one releases the inode or closes
    /// the pipe endpoint.
    pub(crate) fn close(&self, f: FileRef, ctx: &KernelCtx<'_>) {
        // The slot lock cannot be contended here on this single-CPU
        // machine; a parked close would lose the reference.
        let mut file = self.slots[f.0].lock(ctx).expect("fileclose");
        assert!(file.refcnt > 0, "fileclose");
        file.refcnt -= 1;
        if file.refcnt == 0 {
            let kind = core::mem::replace(&mut file.kind, FileKind::None);
            let perm = file.perm;
            file.offset = 0;
            drop(file);
            drop_kind(kind, perm, ctx);
        }
    }

    /// Reads from the file into user memory at `va`, advancing the
    /// offset for regular files.
    pub(crate) fn read(&self, f: FileRef, va: usize, n: usize, ctx: &KernelCtx<'_>) -> Result<usize> {
        let kernel = ctx.kernel();
        let mut file = self.slots[f.0].lock(ctx)?;
        if file.refcnt == 0 || !file.perm.readable() {
            return Err(KernelError::InvalidArgument);
        }
        let count = match &file.kind {
            FileKind::Pipe { pipe } => {
                let pipe = pipe.clone();
                return pipe.read(va, n, ctx);
            }
            FileKind::Device { devid, .. } => {
                let read = kernel
                    .devsw(*devid)
                    .and_then(|d| d.read)
                    .ok_or(KernelError::InvalidArgument)?;
                let mut buf = vec![0u8; n];
                let count = read(ctx, &mut buf)?;
                kernel.copy_out(va, &buf[..count], ctx)?;
                return Ok(count);
            }
            FileKind::Inode { ip } => {
                let mut guard = kernel.fs().itable().lock(ip, ctx)?;
                let mut buf = vec![0u8; n];
                let count = guard.readi(&mut buf, file.offset, ctx)?;
                drop(guard);
                kernel.copy_out(va, &buf[..count], ctx)?;
                count
            }
            FileKind::None => return Err(KernelError::InvalidArgument),
        };
        file.offset += count as u32;
        Ok(count)
    }

    /// Writes user memory at `va` into the file, advancing the offset
    /// for regular files. Regular-file writes are chunked so each
    /// transaction stays well under the log's capacity.
    pub(crate) fn write(
        &self,
        f: FileRef,
        va: usize,
        n: usize,
        ctx: &KernelCtx<'_>,
    ) -> Result<usize> {
        let kernel = ctx.kernel();
        let mut file = self.slots[f.0].lock(ctx)?;
        if file.refcnt == 0 || !file.perm.writable() {
            return Err(KernelError::InvalidArgument);
        }
        let count = match &file.kind {
            FileKind::Pipe { pipe } => {
                let pipe = pipe.clone();
                return pipe.write(va, n, ctx);
            }
            FileKind::Device { devid, .. } => {
                let write = kernel
                    .devsw(*devid)
                    .and_then(|d| d.write)
                    .ok_or(KernelError::InvalidArgument)?;
                let mut buf = vec![0u8; n];
                kernel.copy_in(&mut buf, va, ctx)?;
                return write(ctx, &buf);
            }
            FileKind::Inode { ip } => {
                // A few blocks at a time, so a single transaction never
                // overflows the log: inode-file writeback, bitmap
                // blocks and non-aligned slop included.
                let max = (MAXOPBLOCKS - 1 - 1 - 2) / 2 * BSIZE;
                let start = file.offset;
                let mut off = start;
                let mut written = 0;
                while written < n {
                    let m = core::cmp::min(n - written, max);
                    let mut buf = vec![0u8; m];
                    kernel.copy_in(&mut buf, va + written, ctx)?;

                    let mut tx = kernel.fs().begin_tx(ctx)?;
                    let mut guard = kernel.fs().itable().lock(ip, ctx)?;
                    let count = guard.writei(&buf, off, &mut tx, ctx)?;
                    drop(guard);
                    tx.commit(ctx);

                    assert_eq!(count, m, "short filewrite");
                    off += count as u32;
                    written += count;
                }
                written
            }
            FileKind::None => return Err(KernelError::InvalidArgument),
        };
        file.offset += count as u32;
        Ok(count)
    }

    /// Copies `{dev, inum, type, size}` out of the file's inode.
    pub(crate) fn stat(&self, f: FileRef, ctx: &KernelCtx<'_>) -> Result<Stat> {
        let kernel = ctx.kernel();
        let file = self.slots[f.0].lock(ctx)?;
        match &file.kind {
            FileKind::Inode { ip } | FileKind::Device { ip, .. } => {
                let guard = kernel.fs().itable().lock(ip, ctx)?;
                Ok(guard.stat())
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Slot reference count, for invariant checks in tests.
    pub fn refcnt(&self, f: FileRef, ctx: &KernelCtx<'_>) -> u32 {
        self.slots[f.0].lock(ctx).map(|file| file.refcnt).unwrap_or(0)
    }

    pub(crate) fn slot(&self, f: FileRef) -> &Sleeplock<File> {
        &self.slots[f.0]
    }
}

/// Releases whatever a `FileKind` holds.
fn drop_kind(kind: FileKind, perm: OMode, ctx: &KernelCtx<'_>) {
    match kind {
        FileKind::Inode { ip } | FileKind::Device { ip, .. } => {
            ctx.kernel().fs().itable().irelease(ip);
        }
        FileKind::Pipe { pipe } => {
            pipe.close(perm.writable(), ctx);
        }
        FileKind::None => {}
    }
}

impl Kernel {
    /// Resolves `path` and claims a global open-file slot for it. With
    /// the create flag, a missing file is created first; creating an
    /// existing path opens the existing inode.
    pub(crate) fn fileopen(&self, path: &Path, mode: OMode, ctx: &KernelCtx<'_>) -> Result<FileRef> {
        let ip = match self.fs().namei(path, ctx) {
            Ok(ip) => ip,
            Err(KernelError::NoSuchEntry) if mode.create() => {
                self.fs().addfile(path, ctx)?;
                self.fs().namei(path, ctx)?
            }
            Err(e) => return Err(e),
        };

        let typ = {
            let guard = match self.fs().itable().lock(&ip, ctx) {
                Ok(guard) => guard,
                Err(e) => {
                    self.fs().itable().irelease(ip);
                    return Err(e);
                }
            };
            (guard.typ, guard.devid)
        };
        let kind = match typ {
            (IType::Device, devid) => FileKind::Device { ip, devid },
            _ => FileKind::Inode { ip },
        };
        self.ftable().alloc(kind, mode, ctx)
    }
}
