//! The superblock describes the disk layout:
//!
//! ```text
//! [ boot | super | free bitmap | inode file | log | swap | data ]
//! ```
//!
//! mkfs computes the superblock and builds the initial file system.

use core::convert::TryInto;
use core::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::hal::MemDisk;
use crate::param::BSIZE;

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct Superblock {
    /// Size of file system image (blocks).
    pub size: u32,

    /// Number of data blocks.
    pub nblocks: u32,

    /// Block number of first free map block.
    pub bmapstart: u32,

    /// Block number of the start of the inode file.
    pub inodestart: u32,

    /// Block number of the start of the swap region.
    pub swapstart: u32,

    /// Block number of the start of the log region.
    pub logstart: u32,
}

const_assert!(mem::size_of::<Superblock>() <= BSIZE);

/// Bitmap bits per block.
pub const BPB: u32 = (BSIZE * 8) as u32;

/// The superblock lives in block 1.
pub const SUPERBLOCK_NO: u32 = 1;

impl Superblock {
    /// Reads the superblock straight off the device. Runs before the
    /// block cache exists, so this is a raw read.
    pub fn read(disk: &MemDisk) -> Self {
        let mut block = [0u8; BSIZE];
        disk.read(SUPERBLOCK_NO, &mut block);
        let mut sb = Superblock::default();
        sb.as_bytes_mut()
            .copy_from_slice(&block[..mem::size_of::<Superblock>()]);
        sb
    }

    pub fn write(&self, block: &mut [u8; BSIZE]) {
        block[..mem::size_of::<Superblock>()].copy_from_slice(self.as_bytes());
    }
}

/// Reads a little-endian u32 out of block bytes.
pub fn read_u32(block: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(block[off..off + 4].try_into().unwrap())
}

/// Writes a little-endian u32 into block bytes.
pub fn write_u32(block: &mut [u8], off: usize, value: u32) {
    block[off..off + 4].copy_from_slice(&value.to_le_bytes());
}
