//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents. Caching
//! reduces disk reads and provides a synchronization point for blocks
//! used by multiple processes.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call `bread`.
//! * After changing buffer data, call `bwrite` to sync it to disk.
//! * The buffer lock is released when the `Buf` drops.
//! * Only one process at a time can use a buffer; a buffer carries a
//!   dirty bit for blocks staged in the log but not yet written home.

use array_macro::array;
use core::ops::{Deref, DerefMut};

use crate::error::Result;
use crate::kernel::Kernel;
use crate::lock::{Sleeplock, SleeplockGuard, Spinlock};
use crate::param::{BSIZE, NBUF};
use crate::proc::KernelCtx;

/// Block data, aligned so on-disk structs of u32s can be read in place.
#[repr(align(4))]
pub struct BufData {
    inner: [u8; BSIZE],
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl BufData {
    pub fn copy_from(&mut self, other: &BufData) {
        self.inner.copy_from_slice(&other.inner);
    }
}

pub struct BufInner {
    /// Has data been read from disk?
    valid: bool,

    /// Modified since last written to disk?
    dirty: bool,

    data: BufData,
}

impl BufInner {
    const fn new() -> Self {
        Self {
            valid: false,
            dirty: false,
            data: BufData { inner: [0; BSIZE] },
        }
    }
}

/// Identity and reference count of one cache slot, under the cache
/// spinlock.
#[derive(Clone, Copy)]
struct BufCtl {
    dev: u32,
    blockno: u32,
    refcnt: u32,
}

impl BufCtl {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            refcnt: 0,
        }
    }
}

pub struct Bcache {
    ctl: Spinlock<[BufCtl; NBUF]>,
    inner: [Sleeplock<BufInner>; NBUF],
}

/// A locked buffer: exclusive access to one disk block's cached
/// contents. Dropping it releases the lock and the cache reference.
pub struct Buf<'s> {
    bcache: &'s Bcache,
    idx: usize,
    pub dev: u32,
    pub blockno: u32,
    guard: SleeplockGuard<'s, BufInner>,
}

impl Bcache {
    pub fn new() -> Self {
        Self {
            ctl: Spinlock::new("bcache", [BufCtl::new(); NBUF]),
            inner: array![_ => Sleeplock::new("buffer", BufInner::new()); NBUF],
        }
    }

    /// Returns a locked buffer with the contents of the indicated
    /// block.
    pub fn bread<'s>(&'s self, dev: u32, blockno: u32, ctx: &KernelCtx<'s>) -> Result<Buf<'s>> {
        let idx = {
            let mut ctl = self.ctl.lock();

            // Is the block already cached? A released buffer keeps its
            // identity (and contents) until recycled, so this must
            // match on identity alone — a second slot for the same
            // block would resurrect stale data.
            let idx = match ctl
                .iter()
                .position(|b| b.dev == dev && b.blockno == blockno)
            {
                Some(idx) => idx,
                None => {
                    // Recycle an unused buffer.
                    let idx = ctl
                        .iter()
                        .position(|b| b.refcnt == 0)
                        .expect("bread: no buffers");
                    ctl[idx].dev = dev;
                    ctl[idx].blockno = blockno;
                    // SAFETY: refcnt is 0, so no holder of this slot's
                    // sleep-lock exists.
                    unsafe { (*self.inner[idx].get_mut_raw()).valid = false };
                    idx
                }
            };
            ctl[idx].refcnt += 1;
            idx
        };

        // Undo the reference if locking parks the caller.
        let release = scopeguard::guard((), |_| {
            self.ctl.lock()[idx].refcnt -= 1;
        });
        let mut guard = self.inner[idx].lock(ctx)?;
        scopeguard::ScopeGuard::into_inner(release);

        if !guard.valid {
            ctx.kernel()
                .disk()
                .lock()
                .read(blockno, &mut guard.data.inner);
            guard.valid = true;
        }
        Ok(Buf {
            bcache: self,
            idx,
            dev,
            blockno,
            guard,
        })
    }

    /// Cache reference count of a block, for invariant checks in tests.
    pub fn refcnt(&self, dev: u32, blockno: u32) -> u32 {
        let ctl = self.ctl.lock();
        ctl.iter()
            .find(|b| b.refcnt > 0 && b.dev == dev && b.blockno == blockno)
            .map(|b| b.refcnt)
            .unwrap_or(0)
    }
}

impl<'s> Buf<'s> {
    pub fn data(&self) -> &BufData {
        &self.guard.data
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        &mut self.guard.data
    }

    pub fn dirty(&self) -> bool {
        self.guard.dirty
    }

    pub fn set_dirty(&mut self) {
        self.guard.dirty = true;
    }

    /// Writes the buffer's contents to the device and clears the dirty
    /// bit.
    pub fn bwrite(&mut self, kernel: &Kernel) {
        kernel.disk().lock().write(self.blockno, &self.guard.data.inner);
        self.guard.dirty = false;
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // The sleep-lock guard drops after this body; the reference is
        // ours until then, so the slot cannot be recycled under us.
        self.bcache.ctl.lock()[self.idx].refcnt -= 1;
    }
}
