//! mkfs: builds an initial file system image in memory.
//!
//! Disk layout:
//!
//! ```text
//! [ boot | super | bitmap | inode file | root dir | log | swap | data ]
//!   0      1       2        3..35       35..67     67..87  ..    ..
//! ```
//!
//! The inode file's first entry describes the inode file itself; the
//! root directory is inum 1, and a console device file is created as
//! inum 2. Extra regular files can be added before `finish` (exec
//! images, test fixtures); their extents come from the data region the
//! same 32-block units the kernel's allocator claims.

use alloc::vec::Vec;

use zerocopy::AsBytes;

use crate::console::CONSOLE;
use crate::fs::{Dinode, Dirent, Extent, FileName, IType, Superblock, DIRENT_SIZE, INODE_SIZE};
use crate::hal::MemDisk;
use crate::param::{BSIZE, EXTENTBLOCKS, LOGSIZE, NEXTENT, ROOTDEV, SWAPPAGES};

const BMAPSTART: u32 = 2;
const INODESTART: u32 = 3;
const ROOTSTART: u32 = INODESTART + EXTENTBLOCKS;
const LOGSTART: u32 = ROOTSTART + EXTENTBLOCKS;
const SWAPSTART: u32 = LOGSTART + 1 + LOGSIZE as u32;
const SWAPEND: u32 = SWAPSTART + (SWAPPAGES * 8) as u32;

/// Inode capacity of the inode file's single extent.
const MAXINODES: usize = (EXTENTBLOCKS as usize * BSIZE) / INODE_SIZE;

/// Dirent capacity of the root directory's single extent.
const MAXDIRENTS: usize = (EXTENTBLOCKS as usize * BSIZE) / DIRENT_SIZE;

pub struct FsImage {
    disk: MemDisk,
    sb: Superblock,
    dinodes: Vec<Dinode>,
    dirents: Vec<Dirent>,

    /// Next free bitmap word; one word is one 32-block extent.
    next_word: u32,
}

impl FsImage {
    /// An image of `size` blocks. One bitmap block bounds the size.
    pub fn new(size: u32) -> Self {
        let datastart = (SWAPEND + EXTENTBLOCKS - 1) / EXTENTBLOCKS * EXTENTBLOCKS;
        assert!(size as usize <= BSIZE * 8, "mkfs: more blocks than bitmap bits");
        assert!(size > datastart + EXTENTBLOCKS, "mkfs: no room for data");

        let sb = Superblock {
            size,
            nblocks: size - datastart,
            bmapstart: BMAPSTART,
            inodestart: INODESTART,
            swapstart: SWAPSTART,
            logstart: LOGSTART,
        };

        let mut img = Self {
            disk: MemDisk::new(size as usize),
            sb,
            dinodes: Vec::new(),
            dirents: Vec::new(),
            next_word: datastart / EXTENTBLOCKS,
        };

        // inum 0: the inode file itself.
        img.push_dinode(IType::File, 0, &[Extent {
            startblkno: INODESTART,
            nblocks: EXTENTBLOCKS,
        }]);
        // inum 1: the root directory.
        img.push_dinode(IType::Dir, 0, &[Extent {
            startblkno: ROOTSTART,
            nblocks: EXTENTBLOCKS,
        }]);
        // inum 2: the console device.
        let console = img.push_dinode(IType::Device, CONSOLE, &[]);
        img.push_dirent(console, b"console");
        img
    }

    fn push_dinode(&mut self, typ: IType, devid: i16, extents: &[Extent]) -> u16 {
        let mut di = Dinode::default();
        di.typ = typ as i16;
        di.devid = if typ == IType::Device { devid } else { ROOTDEV as i16 };
        di.size = 0;
        di.data[..extents.len()].copy_from_slice(extents);
        let inum = self.dinodes.len() as u16;
        self.dinodes.push(di);
        inum
    }

    fn push_dirent(&mut self, inum: u16, name: &[u8]) {
        let mut de = Dirent::default();
        de.inum = inum;
        // SAFETY: mkfs names are static identifiers without NUL.
        de.set_name(unsafe { FileName::from_bytes(name) });
        self.dirents.push(de);
    }

    /// Claims the next 32-block extent of the data region.
    fn alloc_extent(&mut self) -> u32 {
        let start = self.next_word * EXTENTBLOCKS;
        assert!(
            start + EXTENTBLOCKS <= self.sb.size,
            "mkfs: out of data blocks"
        );
        self.next_word += 1;
        start
    }

    /// Adds a regular file under the root directory.
    pub fn add_file(&mut self, name: &str, data: &[u8]) {
        let extent_bytes = EXTENTBLOCKS as usize * BSIZE;
        let nextents = core::cmp::max(1, (data.len() + extent_bytes - 1) / extent_bytes);
        assert!(nextents <= NEXTENT, "mkfs: file too large");

        let mut extents = Vec::with_capacity(nextents);
        for chunk in 0..nextents {
            let start = self.alloc_extent();
            extents.push(Extent {
                startblkno: start,
                nblocks: EXTENTBLOCKS,
            });
            let lo = chunk * extent_bytes;
            let hi = core::cmp::min(data.len(), lo + extent_bytes);
            self.write_region(start, &data[lo..hi]);
        }

        let inum = self.push_dinode(IType::File, 0, &extents);
        self.dinodes[inum as usize].size = data.len() as u32;
        self.push_dirent(inum, name.as_bytes());
    }

    /// Writes `bytes` into consecutive blocks starting at `start`.
    fn write_region(&mut self, start: u32, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(BSIZE).enumerate() {
            let mut block = [0u8; BSIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            self.disk.write(start + i as u32, &block);
        }
    }

    /// Serializes the metadata and hands the image over.
    pub fn finish(mut self) -> MemDisk {
        assert!(self.dinodes.len() <= MAXINODES, "mkfs: too many inodes");
        assert!(self.dirents.len() <= MAXDIRENTS, "mkfs: too many dirents");

        self.dinodes[0].size = (self.dinodes.len() * INODE_SIZE) as u32;
        self.dinodes[1].size = (self.dirents.len() * DIRENT_SIZE) as u32;

        // Superblock.
        let mut block = [0u8; BSIZE];
        self.sb.write(&mut block);
        self.disk.write(1, &block);

        // Inode file and root directory contents.
        let mut ibytes = Vec::new();
        for di in &self.dinodes {
            ibytes.extend_from_slice(di.as_bytes());
        }
        let mut dbytes = Vec::new();
        for de in &self.dirents {
            dbytes.extend_from_slice(de.as_bytes());
        }
        let (inodestart, rootstart) = (INODESTART, ROOTSTART);
        self.write_region(inodestart, &ibytes);
        self.write_region(rootstart, &dbytes);

        // Free bitmap: everything below the data watermark is in use.
        let used = (self.next_word * EXTENTBLOCKS) as usize;
        let mut bitmap = [0u8; BSIZE];
        for bit in 0..used {
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
        self.disk.write(BMAPSTART, &bitmap);

        self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_has_self_describing_inode_file() {
        let disk = FsImage::new(2048).finish();
        let sb = Superblock::read(&disk);
        assert_eq!(sb.inodestart, INODESTART);

        let mut block = [0u8; BSIZE];
        disk.read(sb.inodestart, &mut block);
        let mut di = Dinode::default();
        di.as_bytes_mut()
            .copy_from_slice(&block[..INODE_SIZE]);
        assert_eq!(di.typ, IType::File as i16);
        assert_eq!(di.data[0].startblkno, sb.inodestart);
        assert_eq!(di.size as usize % INODE_SIZE, 0);
    }
}
