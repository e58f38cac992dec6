//! File system implementation. Five layers:
//! * Blocks: allocator for raw disk blocks (whole 32-block extents).
//! * Log: crash recovery for multi-block updates.
//! * Files: inode allocator, reading, writing, metadata.
//! * Directories: the flat root, an inode whose content is dirents.
//! * Names: slash-separated paths for convenient naming.
//!
//! This module owns the superblock, the transaction lock and the inode
//! cache; path resolution and directory operations live in `path`,
//! inodes in `inode`, and the log in `log`.

use crate::error::Result;
use crate::kernel::Kernel;
use crate::lock::Sleeplock;
use crate::param::EXTENTBLOCKS;
use crate::proc::KernelCtx;

mod inode;
mod log;
mod path;
mod stat;
mod superblock;

pub use inode::{
    Dinode, Dirent, Extent, IType, InodeGuard, Iref, Itable, DIRENT_SIZE, DIRSIZ, INODE_SIZE,
};
pub use log::{recover, Log, Tx};
pub use path::{FileName, Path};
pub use stat::Stat;
pub use superblock::{read_u32, write_u32, Superblock, BPB, SUPERBLOCK_NO};

pub struct FileSystem {
    dev: u32,
    superblock: Superblock,
    log: Sleeplock<Log>,
    itable: Itable,
}

impl FileSystem {
    pub fn new(dev: u32, superblock: Superblock) -> Self {
        let logstart = superblock.logstart;
        Self {
            dev,
            superblock,
            log: Log::new(dev, logstart),
            itable: Itable::new(),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn itable(&self) -> &Itable {
        &self.itable
    }

    /// Boot-time initialization: replay the log if a committed
    /// transaction is pending, then load the inode file's inode.
    /// Must run before any other file-system I/O.
    pub fn init(&self, kernel: &Kernel, ctx: &KernelCtx<'_>) {
        log::recover(kernel, self.dev, self.superblock.logstart, ctx);
        self.itable.init_inodefile(self.dev, &self.superblock, ctx);
        ::log::info!(
            "fs: size {} nblocks {} bmapstart {} inodestart {}",
            self.superblock.size,
            self.superblock.nblocks,
            self.superblock.bmapstart,
            self.superblock.inodestart
        );
    }

    /// Opens a transaction (see `log`).
    pub fn begin_tx<'s>(&'s self, ctx: &KernelCtx<'s>) -> Result<Tx<'s>> {
        self.log.begin_tx(ctx)
    }
}

impl Tx<'_> {
    /// Allocates a whole 32-block extent: scans the free bitmap for a
    /// clear word and claims all of its blocks at once. The bitmap
    /// update is logged. Frees are not supported.
    pub fn balloc(&mut self, ctx: &KernelCtx<'_>) -> u32 {
        let kernel = self.kernel();
        let sb = *kernel.fs().superblock();
        for blockno in sb.bmapstart..sb.inodestart {
            let mut buf = kernel
                .bcache()
                .bread(kernel.fs().dev(), blockno, ctx)
                .expect("balloc: bitmap read");
            for word in 0..(crate::param::BSIZE / 4) {
                if read_u32(&buf.data()[..], word * 4) == 0 {
                    // 32 clear bits: claim the whole extent.
                    write_u32(&mut buf.data_mut()[..], word * 4, u32::MAX);
                    self.write(&mut buf, ctx);
                    let addr = (blockno - sb.bmapstart) * BPB + (word as u32) * EXTENTBLOCKS;
                    assert!(addr > sb.inodestart, "balloc: inside metadata");
                    assert!(addr < sb.size, "balloc: past end of disk");
                    return addr;
                }
            }
        }
        panic!("balloc: no more free space in extent region");
    }
}
