//! Kernel tunables.

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files per system.
pub const NFILE: usize = 100;

/// Maximum number of active i-nodes.
pub const NINODE: usize = 50;

/// Maximum major device number.
pub const NDEV: usize = 10;

/// Device number of file system root disk.
pub const ROOTDEV: u32 = 1;

/// Root directory i-number.
pub const ROOTINO: u32 = 1;

/// Inode file i-number.
pub const INODEFILEINO: u32 = 0;

/// Max exec arguments.
pub const MAXARG: usize = 32;

/// Max length of a single exec argument, including the terminator.
pub const MAXARGLEN: usize = 128;

/// Block size.
pub const BSIZE: usize = 512;

/// Page size.
pub const PGSIZE: usize = 4096;

/// Disk blocks per page.
pub const BLKS_PER_PAGE: usize = PGSIZE / BSIZE;

/// Max shadow blocks in the on-disk log.
pub const LOGSIZE: usize = 19;

/// Max data blocks any single FS transaction writes.
pub const MAXOPBLOCKS: usize = 10;

/// Size of disk block cache.
pub const NBUF: usize = 30;

/// Number of swap pages on disk.
pub const SWAPPAGES: usize = 32;

/// Maximum file path name.
pub const MAXPATH: usize = 128;

/// Maximum length of process name.
pub const MAXPROCNAME: usize = 16;

/// Blocks claimed by one extent allocation.
pub const EXTENTBLOCKS: u32 = 32;

/// Extents per on-disk inode.
pub const NEXTENT: usize = 6;

/// Top of the user address space (2 GiB).
pub const USERTOP: usize = 0x8000_0000;

/// Base of the user code region.
pub const CODEBASE: usize = 0x10000;

/// Pages the user stack may grow to.
pub const STACKPAGES: usize = 10;
