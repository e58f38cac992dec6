//! The redo log: all-or-nothing multi-block writes.
//!
//! A single sleep-lock serializes transactions; at most one writer
//! mutates the file system at a time. On disk, the log region holds a
//! metadata block followed by up to `LOGSIZE` shadow blocks carrying
//! the new contents of the blocks named in the metadata.
//!
//! A transaction is bounded by `begin_tx`/`commit_tx`:
//! 1. `begin_tx` writes an empty metadata block, so a stale commit
//!    record can never resurrect.
//! 2. Each `log_write` stages the buffer into a shadow block and
//!    persists the updated metadata. Writing the same block twice
//!    reuses its shadow slot (absorption).
//! 3. `commit_tx` sets `committed = 1` — the linearization point —
//!    then copies every shadow block home and clears the metadata.
//!
//! A crash before the commit record leaves the pre-transaction state; a
//! crash after it (even partway through the home copies) is replayed by
//! `recover` on the next boot, before any other I/O.

use core::mem;

use itertools::izip;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::Buf;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::lock::Sleeplock;
use crate::param::{BSIZE, LOGSIZE};
use crate::proc::KernelCtx;

/// On-disk log metadata.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
struct LogMeta {
    committed: i16,
    _pad: [u8; 2],
    nchanges: u32,
    blocknos: [u32; LOGSIZE],
}

const_assert!(mem::size_of::<LogMeta>() <= BSIZE);

/// Log state; the disk holds the authoritative metadata, so this is
/// just the region's location behind the transaction lock.
pub struct Log {
    dev: u32,
    start: u32,
}

impl Log {
    pub const fn new(dev: u32, start: u32) -> Sleeplock<Log> {
        Sleeplock::new("log", Log { dev, start })
    }
}

/// An open transaction: holder of the log sleep-lock. Dropping an
/// uncommitted transaction aborts it (the metadata on disk is still
/// uncommitted, so nothing lands).
pub struct Tx<'s> {
    kernel: &'s Kernel,
    pub(super) guard: crate::lock::SleeplockGuard<'s, Log>,
}

impl Sleeplock<Log> {
    /// Opens a transaction: takes the log lock and writes an empty
    /// metadata block.
    pub fn begin_tx<'s>(&'s self, ctx: &KernelCtx<'s>) -> Result<Tx<'s>> {
        let guard = self.lock(ctx)?;
        let tx = Tx {
            kernel: ctx.kernel(),
            guard,
        };
        tx.write_meta(&LogMeta::default(), ctx);
        Ok(tx)
    }
}

impl<'s> Tx<'s> {
    pub fn kernel(&self) -> &'s Kernel {
        self.kernel
    }
}

impl Tx<'_> {
    fn meta_blockno(&self) -> u32 {
        self.guard.start
    }

    fn shadow_blockno(&self, i: u32) -> u32 {
        self.guard.start + 1 + i
    }

    fn read_meta(&self, ctx: &KernelCtx<'_>) -> LogMeta {
        let buf = self
            .kernel
            .bcache()
            .bread(self.guard.dev, self.meta_blockno(), ctx)
            .expect("log: meta read");
        let mut meta = LogMeta::default();
        meta.as_bytes_mut()
            .copy_from_slice(&buf.data()[..mem::size_of::<LogMeta>()]);
        meta
    }

    fn write_meta(&self, meta: &LogMeta, ctx: &KernelCtx<'_>) {
        let mut buf = self
            .kernel
            .bcache()
            .bread(self.guard.dev, self.meta_blockno(), ctx)
            .expect("log: meta write");
        buf.data_mut().fill(0);
        buf.data_mut()[..mem::size_of::<LogMeta>()].copy_from_slice(meta.as_bytes());
        buf.bwrite(self.kernel);
    }

    /// Stages a modified buffer: records its block number in the
    /// metadata, persists its contents into a shadow block, and
    /// persists the metadata. The caller keeps (and then releases) the
    /// buffer; `commit` performs the home write.
    pub fn write(&mut self, buf: &mut Buf<'_>, ctx: &KernelCtx<'_>) {
        buf.set_dirty();

        let mut meta = self.read_meta(ctx);
        let nchanges = meta.nchanges as usize;

        // Absorption: a block already staged reuses its shadow slot.
        let staged = meta.blocknos[..nchanges]
            .iter()
            .position(|b| *b == buf.blockno);
        let slot = match staged {
            Some(slot) => slot,
            None => {
                assert!(nchanges < LOGSIZE, "too big a transaction");
                meta.blocknos[nchanges] = buf.blockno;
                meta.nchanges += 1;
                nchanges
            }
        };

        let mut shadow = self
            .kernel
            .bcache()
            .bread(self.guard.dev, self.shadow_blockno(slot as u32), ctx)
            .expect("log: shadow write");
        shadow.data_mut().copy_from(buf.data());
        shadow.bwrite(self.kernel);
        drop(shadow);

        self.write_meta(&meta, ctx);
    }

    /// Commits the transaction. The metadata write that sets
    /// `committed = 1` is the linearization point; once it reaches the
    /// disk the transaction survives any crash.
    pub fn commit(self, ctx: &KernelCtx<'_>) {
        let mut meta = self.read_meta(ctx);
        meta.committed = 1;
        self.write_meta(&meta, ctx);

        install(self.kernel, self.guard.dev, self.guard.start, &meta, ctx);

        self.write_meta(&LogMeta::default(), ctx);
        // Dropping self releases the log lock.
    }
}

/// Copies every shadow block to its recorded home block. Idempotent.
fn install(kernel: &Kernel, dev: u32, start: u32, meta: &LogMeta, ctx: &KernelCtx<'_>) {
    let shadows = (0..meta.nchanges).map(|i| start + 1 + i);
    for (blockno, shadow_no) in izip!(&meta.blocknos[..meta.nchanges as usize], shadows) {
        let shadow = kernel
            .bcache()
            .bread(dev, shadow_no, ctx)
            .expect("log: install read");
        let mut home = kernel
            .bcache()
            .bread(dev, *blockno, ctx)
            .expect("log: install home");
        home.data_mut().copy_from(shadow.data());
        home.bwrite(kernel);
    }
}

/// Boot-time recovery; must run before any other file-system I/O. If
/// the metadata says committed, the shadow blocks are authoritative and
/// are replayed; either way the metadata is cleared.
pub fn recover(kernel: &Kernel, dev: u32, start: u32, ctx: &KernelCtx<'_>) {
    let mut meta = LogMeta::default();
    {
        let buf = kernel
            .bcache()
            .bread(dev, start, ctx)
            .expect("log: recover read");
        meta.as_bytes_mut()
            .copy_from_slice(&buf.data()[..mem::size_of::<LogMeta>()]);
    }

    if meta.committed == 1 {
        log::info!("log: recovering {} blocks", meta.nchanges);
        install(kernel, dev, start, &meta, ctx);
    }

    let mut buf = kernel
        .bcache()
        .bread(dev, start, ctx)
        .expect("log: recover clear");
    buf.data_mut().fill(0);
    buf.bwrite(kernel);
}
