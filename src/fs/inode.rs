//! Inodes.
//!
//! An inode describes a single unnamed file: its type, size, and the
//! six extents holding its content. The on-disk inodes live packed
//! inside a distinguished file, the inode file (inum 0), which starts
//! at `superblock.inodestart` and grows by appending; its own inode is
//! the first entry, so the layout is self-describing.
//!
//! The kernel keeps a cache of in-use inodes in memory to provide a
//! place for synchronizing access to inodes used by multiple
//! processes. The cached inodes carry book-keeping that is not stored
//! on disk: the reference count and the valid flag.
//!
//! * `iget` finds or creates a cache entry and increments its count;
//!   it does not read from disk.
//! * `lock` takes the per-inode sleep-lock and loads the on-disk image
//!   the first time.
//! * `irelease` drops a reference; at zero the slot may be recycled
//!   (the disk-resident data persists).
//!
//! An inode is present in the cache iff its count is positive; at most
//! one in-memory copy exists per `(dev, inum)`.

use core::cmp;
use core::mem;

use array_macro::array;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use super::{FileName, Stat, Tx};
use crate::error::{KernelError, Result};
use crate::lock::{Sleeplock, SleeplockGuard, Spinlock};
use crate::param::{BSIZE, EXTENTBLOCKS, INODEFILEINO, NEXTENT, NINODE};
use crate::proc::KernelCtx;

/// Directory entries hold names of up to this many bytes.
pub const DIRSIZ: usize = 14;

/// Size of an on-disk inode.
pub const INODE_SIZE: usize = 64;

/// Size of a directory entry.
pub const DIRENT_SIZE: usize = 16;

/// A run of consecutive disk blocks.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, AsBytes, FromBytes)]
pub struct Extent {
    pub startblkno: u32,
    pub nblocks: u32,
}

/// On-disk inode structure, 64 bytes so inodes pack contiguously into
/// blocks.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct Dinode {
    /// File type.
    pub typ: i16,

    /// Device number (device inodes only).
    pub devid: i16,

    /// Size of file (bytes).
    pub size: u32,

    /// Data blocks of file on disk.
    pub data: [Extent; NEXTENT],

    pub pad: [u8; 8],
}

const_assert!(mem::size_of::<Dinode>() == INODE_SIZE);
const_assert!(BSIZE % INODE_SIZE == 0);

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct Dirent {
    /// Inode number; 0 marks a tombstone.
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

const_assert!(mem::size_of::<Dirent>() == DIRENT_SIZE);

impl Dirent {
    /// Fill in name. If shorter than DIRSIZ, a NUL terminator is
    /// appended.
    pub fn set_name(&mut self, name: &FileName) {
        let name = name.as_bytes();
        let len = cmp::min(name.len(), DIRSIZ);
        self.name[..len].copy_from_slice(&name[..len]);
        if len < DIRSIZ {
            self.name[len] = 0;
        }
    }

    /// Returns the slice that exactly contains the name.
    pub fn name(&self) -> &FileName {
        let len = self.name.iter().position(|ch| *ch == 0).unwrap_or(DIRSIZ);
        // SAFETY: self.name[..len] contains no NUL and len <= DIRSIZ.
        unsafe { FileName::from_bytes(&self.name[..len]) }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i16)]
pub enum IType {
    None = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

impl IType {
    pub fn from_disk(typ: i16) -> IType {
        match typ {
            1 => IType::Dir,
            2 => IType::File,
            3 => IType::Device,
            _ => IType::None,
        }
    }
}

/// In-memory copy of the on-disk inode, plus the valid flag. Guarded
/// by the per-inode sleep-lock.
pub struct InodeInner {
    /// Has the on-disk image been loaded?
    pub valid: bool,

    pub typ: IType,
    pub devid: i16,
    pub size: u32,
    pub data: [Extent; NEXTENT],
}

impl InodeInner {
    const fn zero() -> Self {
        Self {
            valid: false,
            typ: IType::None,
            devid: 0,
            size: 0,
            data: [Extent {
                startblkno: 0,
                nblocks: 0,
            }; NEXTENT],
        }
    }

    /// Maps a file block number to its disk block by walking the
    /// extents. `None` when the block is past the allocated extents.
    fn block_of(&self, fb: u32) -> Option<u32> {
        let mut fb = fb;
        for ext in self.data.iter() {
            if ext.nblocks == 0 {
                return None;
            }
            if fb < ext.nblocks {
                return Some(ext.startblkno + fb);
            }
            fb -= ext.nblocks;
        }
        None
    }
}

struct Inode {
    inner: Sleeplock<InodeInner>,
}

/// Identity and reference count of one cache slot, under the cache
/// spinlock.
#[derive(Copy, Clone)]
struct Ictl {
    dev: u32,
    inum: u32,
    refcnt: u32,
}

/// A counted reference to a cached inode. Obtained from `iget`/`idup`,
/// returned with `irelease`.
pub struct Iref {
    idx: usize,
    pub dev: u32,
    pub inum: u32,
}

/// A locked inode: the sleep-lock is held and the on-disk image is
/// loaded.
pub struct InodeGuard<'s> {
    pub dev: u32,
    pub inum: u32,
    guard: SleeplockGuard<'s, InodeInner>,
}

impl core::ops::Deref for InodeGuard<'_> {
    type Target = InodeInner;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl core::ops::DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

pub struct Itable {
    ctl: Spinlock<[Ictl; NINODE]>,
    inodes: [Inode; NINODE],

    /// The inode file's in-memory inode, permanently cached.
    inodefile: Inode,
}

impl Itable {
    pub fn new() -> Self {
        Self {
            ctl: Spinlock::new("icache", [Ictl {
                dev: 0,
                inum: 0,
                refcnt: 0,
            }; NINODE]),
            inodes: array![_ => Inode { inner: Sleeplock::new("inode", InodeInner::zero()) }; NINODE],
            inodefile: Inode {
                inner: Sleeplock::new("inodefile", InodeInner::zero()),
            },
        }
    }

    /// Loads the inode file's own inode from the first entry of the
    /// inode region. Called once at boot; idempotent.
    pub fn init_inodefile(&self, dev: u32, sb: &super::Superblock, ctx: &KernelCtx<'_>) {
        let buf = ctx
            .kernel()
            .bcache()
            .bread(dev, sb.inodestart, ctx)
            .expect("init_inodefile");
        let mut di = Dinode::default();
        di.as_bytes_mut()
            .copy_from_slice(&buf.data()[..INODE_SIZE]);
        drop(buf);

        let mut inner = self
            .inodefile
            .inner
            .lock(ctx)
            .expect("init_inodefile: lock");
        inner.typ = IType::from_disk(di.typ);
        inner.devid = di.devid;
        inner.size = di.size;
        inner.data = di.data;
        inner.valid = true;
    }

    /// Finds the inode with number `inum` on device `dev` and returns
    /// an in-memory reference to it. Does not read it from disk.
    pub fn iget(&self, dev: u32, inum: u32) -> Iref {
        let mut ctl = self.ctl.lock();

        // Is the inode already cached?
        let mut empty = None;
        for (idx, e) in ctl.iter_mut().enumerate() {
            if e.refcnt > 0 && e.dev == dev && e.inum == inum {
                e.refcnt += 1;
                return Iref { idx, dev, inum };
            }
            if empty.is_none() && e.refcnt == 0 {
                empty = Some(idx);
            }
        }

        // Recycle a cache entry.
        let idx = empty.expect("iget: no inodes");
        ctl[idx] = Ictl {
            dev,
            inum,
            refcnt: 1,
        };
        // SAFETY: refcnt was 0, so no holder of this slot's sleep-lock
        // exists.
        unsafe { (*self.inodes[idx].inner.get_mut_raw()).valid = false };
        Iref { idx, dev, inum }
    }

    /// Increments the reference count of `ip`.
    pub fn idup(&self, ip: &Iref) -> Iref {
        let mut ctl = self.ctl.lock();
        ctl[ip.idx].refcnt += 1;
        Iref {
            idx: ip.idx,
            dev: ip.dev,
            inum: ip.inum,
        }
    }

    /// Drops a reference to an in-memory inode. If that was the last
    /// reference, the cache entry can be recycled.
    pub fn irelease(&self, ip: Iref) {
        let mut ctl = self.ctl.lock();
        assert!(ctl[ip.idx].refcnt > 0, "irelease");
        ctl[ip.idx].refcnt -= 1;
    }

    /// Locks the given inode, reading it from disk if it has not been
    /// loaded yet.
    pub fn lock<'s>(&'s self, ip: &Iref, ctx: &KernelCtx<'s>) -> Result<InodeGuard<'s>> {
        let mut guard = self.inodes[ip.idx].inner.lock(ctx)?;
        if !guard.valid {
            let di = self.read_dinode(ip.inum, ctx)?;
            guard.typ = IType::from_disk(di.typ);
            guard.devid = di.devid;
            guard.size = di.size;
            guard.data = di.data;
            guard.valid = true;
            assert!(guard.typ != IType::None, "iget: no type");
        }
        Ok(InodeGuard {
            dev: ip.dev,
            inum: ip.inum,
            guard,
        })
    }

    /// Locks the inode file.
    pub fn lock_inodefile<'s>(&'s self, ctx: &KernelCtx<'s>) -> Result<InodeGuard<'s>> {
        let guard = self.inodefile.inner.lock(ctx)?;
        assert!(guard.valid, "inodefile not initialized");
        Ok(InodeGuard {
            dev: ctx.kernel().fs().dev(),
            inum: INODEFILEINO,
            guard,
        })
    }

    /// Reads the on-disk inode `inum` out of the inode file.
    fn read_dinode(&self, inum: u32, ctx: &KernelCtx<'_>) -> Result<Dinode> {
        let mut ifile = self.lock_inodefile(ctx)?;
        let mut di = Dinode::default();
        let n = ifile.readi(di.as_bytes_mut(), inum * INODE_SIZE as u32, ctx)?;
        if n != INODE_SIZE {
            return Err(KernelError::NoSuchEntry);
        }
        Ok(di)
    }

    /// Reference count for `(dev, inum)`, for invariant checks in
    /// tests.
    pub fn refcnt(&self, dev: u32, inum: u32) -> u32 {
        let ctl = self.ctl.lock();
        ctl.iter()
            .filter(|e| e.refcnt > 0 && e.dev == dev && e.inum == inum)
            .map(|e| e.refcnt)
            .sum()
    }

    /// Number of cache slots holding `(dev, inum)`; the cache invariant
    /// says this never exceeds one.
    pub fn cached_copies(&self, dev: u32, inum: u32) -> usize {
        let ctl = self.ctl.lock();
        ctl.iter()
            .filter(|e| e.refcnt > 0 && e.dev == dev && e.inum == inum)
            .count()
    }
}


impl InodeGuard<'_> {
    /// Allocates a fresh extent in the first empty slot.
    fn grow(&mut self, tx: &mut Tx<'_>, ctx: &KernelCtx<'_>) -> Result<()> {
        let slot = self
            .data
            .iter()
            .position(|e| e.nblocks == 0)
            .ok_or(KernelError::NoSpace)?;
        let startblkno = tx.balloc(ctx);
        self.data[slot] = Extent {
            startblkno,
            nblocks: EXTENTBLOCKS,
        };
        Ok(())
    }

    /// Reads data from the inode into `dst`, starting at byte `off`.
    /// Returns the number of bytes read: reads past the end are
    /// clipped, reads starting beyond the end are an error. Device
    /// inodes dispatch to the device's read operation.
    pub fn readi(&mut self, dst: &mut [u8], off: u32, ctx: &KernelCtx<'_>) -> Result<usize> {
        if self.typ == IType::Device {
            let read = ctx
                .kernel()
                .devsw(self.devid)
                .and_then(|d| d.read)
                .ok_or(KernelError::InvalidArgument)?;
            return read(ctx, dst);
        }

        let size = self.size;
        let n = dst.len() as u32;
        if off > size || off.checked_add(n).is_none() {
            return Err(KernelError::InvalidArgument);
        }
        let n = cmp::min(n, size - off);

        let mut tot = 0usize;
        while tot < n as usize {
            let foff = off as usize + tot;
            let blockno = self
                .block_of((foff / BSIZE) as u32)
                .expect("readi: hole inside file size");
            let buf = ctx
                .kernel()
                .bcache()
                .bread(self.dev, blockno, ctx)?;
            let boff = foff % BSIZE;
            let m = cmp::min(n as usize - tot, BSIZE - boff);
            dst[tot..tot + m].copy_from_slice(&buf.data()[boff..boff + m]);
            tot += m;
        }
        Ok(n as usize)
    }

    /// Writes data to the inode at byte `off`, which must lie within
    /// `[0, size]` (appends are extent-granular: reaching past the
    /// allocated extents claims a fresh 32-block extent). Every
    /// modified block goes through the transaction, and the cached
    /// on-disk image — including the updated size — is written back to
    /// the inode file as the write advances. Device inodes dispatch to
    /// the device's write operation.
    pub fn writei(
        &mut self,
        src: &[u8],
        off: u32,
        tx: &mut Tx<'_>,
        ctx: &KernelCtx<'_>,
    ) -> Result<usize> {
        if self.typ == IType::Device {
            let write = ctx
                .kernel()
                .devsw(self.devid)
                .and_then(|d| d.write)
                .ok_or(KernelError::InvalidArgument)?;
            return write(ctx, src);
        }

        let n = src.len() as u32;
        if off > self.size || off.checked_add(n).is_none() {
            return Err(KernelError::InvalidArgument);
        }

        let mut tot = 0usize;
        while tot < n as usize {
            let foff = off as usize + tot;
            let fb = (foff / BSIZE) as u32;
            let blockno = loop {
                match self.block_of(fb) {
                    Some(b) => break b,
                    None => self.grow(tx, ctx)?,
                }
            };

            let mut buf = ctx
                .kernel()
                .bcache()
                .bread(self.dev, blockno, ctx)?;
            let boff = foff % BSIZE;
            let m = cmp::min(n as usize - tot, BSIZE - boff);
            buf.data_mut()[boff..boff + m].copy_from_slice(&src[tot..tot + m]);
            tx.write(&mut buf, ctx);
            drop(buf);
            tot += m;

            if off + tot as u32 > self.size {
                self.size = off + tot as u32;
            }
            self.update_dinode(tx, ctx)?;
        }
        Ok(n as usize)
    }

    /// Writes the cached on-disk image back into the inode file.
    fn update_dinode(&mut self, tx: &mut Tx<'_>, ctx: &KernelCtx<'_>) -> Result<()> {
        let di = Dinode {
            typ: self.typ as i16,
            devid: self.devid,
            size: self.size,
            data: self.data,
            pad: [0; 8],
        };
        if self.inum == INODEFILEINO {
            // The inode file's own inode is the first entry of its
            // first block.
            let sb = *ctx.kernel().fs().superblock();
            let mut buf = ctx
                .kernel()
                .bcache()
                .bread(self.dev, sb.inodestart, ctx)?;
            buf.data_mut()[..INODE_SIZE].copy_from_slice(di.as_bytes());
            tx.write(&mut buf, ctx);
        } else {
            let mut ifile = ctx.kernel().fs().itable().lock_inodefile(ctx)?;
            ifile.writei(di.as_bytes(), self.inum * INODE_SIZE as u32, tx, ctx)?;
        }
        Ok(())
    }

    /// Copies stat information out of the inode.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev,
            ino: self.inum,
            size: self.size,
            typ: self.typ as i16,
            pad: 0,
        }
    }

    /// Looks for a directory entry by name. Returns the entry's inum
    /// and byte offset.
    pub fn dirlookup(&mut self, name: &FileName, ctx: &KernelCtx<'_>) -> Result<(u16, u32)> {
        assert_eq!(self.typ, IType::Dir, "dirlookup not DIR");

        let size = self.size;
        let mut off = 0u32;
        while off < size {
            let mut de = Dirent::default();
            let n = self.readi(de.as_bytes_mut(), off, ctx)?;
            assert_eq!(n, DIRENT_SIZE, "dirlookup read");
            if de.inum != 0 && de.name() == name {
                return Ok((de.inum, off));
            }
            off += DIRENT_SIZE as u32;
        }
        Err(KernelError::NoSuchEntry)
    }

    /// Lists the live entries of a directory.
    pub fn dirents(&mut self, ctx: &KernelCtx<'_>) -> Result<alloc::vec::Vec<Dirent>> {
        assert_eq!(self.typ, IType::Dir, "dirents not DIR");
        let mut out = alloc::vec::Vec::new();
        let size = self.size;
        let mut off = 0u32;
        while off < size {
            let mut de = Dirent::default();
            self.readi(de.as_bytes_mut(), off, ctx)?;
            if de.inum != 0 {
                out.push(de);
            }
            off += DIRENT_SIZE as u32;
        }
        Ok(out)
    }
}
