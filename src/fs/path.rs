//! Paths.
//!
//! Slash-separated names resolved against the flat root directory.
//! Absolute paths start from the root inode; relative paths do too,
//! since there is no per-process current directory.

use zerocopy::AsBytes;

use super::{Dinode, Dirent, Extent, FileSystem, IType, Iref, INODE_SIZE};
use crate::error::{KernelError, Result};
use crate::param::{EXTENTBLOCKS, NEXTENT, ROOTINO};
use crate::proc::KernelCtx;

use super::DIRSIZ;

/// One path component, at most `DIRSIZ` bytes, no NUL and no slash.
#[derive(PartialEq, Eq)]
#[repr(transparent)]
pub struct FileName {
    inner: [u8],
}

impl FileName {
    /// Truncates `bytes` to the first `DIRSIZ` bytes.
    ///
    /// # Safety
    ///
    /// `bytes` must not contain any NUL characters.
    pub unsafe fn from_bytes(bytes: &[u8]) -> &Self {
        debug_assert!(!bytes.contains(&0));
        // SAFETY: `&FileName` is layout-compatible with `[u8]` due to
        // `#[repr(transparent)]`, and the truncated slice satisfies the
        // invariant.
        &*(&bytes[..core::cmp::min(DIRSIZ, bytes.len())] as *const [u8] as *const Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

/// A user-supplied path: bytes with no NUL.
#[repr(transparent)]
pub struct Path {
    inner: [u8],
}

impl Path {
    /// # Safety
    ///
    /// `bytes` must not contain any NUL bytes.
    pub unsafe fn from_bytes(bytes: &[u8]) -> &Self {
        // SAFETY: `&Path` is layout-compatible with `[u8]` due to
        // `#[repr(transparent)]`.
        &*(bytes as *const [u8] as *const Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn is_empty_string(&self) -> bool {
        self.inner.is_empty()
    }

    /// Peels the next path element off the front.
    ///
    /// Returns `Some((rest, name))` where `name` is the next element
    /// and `rest` is the remainder with no leading slashes, so the
    /// caller can check `rest.is_empty_string()` to see whether `name`
    /// is the last one. Returns `None` when there is no element left.
    ///
    /// ```text
    /// skipelem("a/bb/c") = Some(("bb/c", "a"))
    /// skipelem("///a//bb") = Some(("bb", "a"))
    /// skipelem("a") = Some(("", "a"))
    /// skipelem("") = skipelem("////") = None
    /// ```
    pub fn skipelem(&self) -> Option<(&Self, &FileName)> {
        let mut bytes = &self.inner;

        let name_start = bytes.iter().position(|ch| *ch != b'/')?;
        bytes = &bytes[name_start..];

        let len = bytes
            .iter()
            .position(|ch| *ch == b'/')
            .unwrap_or_else(|| bytes.len());

        // SAFETY: a subslice of `self.inner`, which contains no NUL.
        let name = unsafe { FileName::from_bytes(&bytes[..len]) };

        bytes = &bytes[len..];
        let next_start = bytes
            .iter()
            .position(|ch| *ch != b'/')
            .unwrap_or_else(|| bytes.len());

        // SAFETY: a subslice of `self.inner`, which contains no NUL.
        let rest = unsafe { Self::from_bytes(&bytes[next_start..]) };
        Some((rest, name))
    }

    /// The final path element, if any.
    pub fn final_name(&self) -> Option<&FileName> {
        let mut rest = self;
        let mut last = None;
        while let Some((next, name)) = rest.skipelem() {
            rest = next;
            last = Some(name);
        }
        last
    }
}

impl FileSystem {
    /// Walks `path` component by component from the root, locking each
    /// directory inode and scanning its entries. With `parent` set,
    /// stops one level early and returns the directory holding the
    /// final element.
    fn namex(&self, path: &Path, parent: bool, ctx: &KernelCtx<'_>) -> Result<Iref> {
        let mut ip = self.itable().iget(self.dev(), ROOTINO);
        let mut rest = path;

        while let Some((next_path, name)) = rest.skipelem() {
            let mut guard = match self.itable().lock(&ip, ctx) {
                Ok(guard) => guard,
                Err(e) => {
                    self.itable().irelease(ip);
                    return Err(e);
                }
            };
            if guard.typ != IType::Dir {
                drop(guard);
                self.itable().irelease(ip);
                return Err(KernelError::NoSuchEntry);
            }

            // Stop one level early.
            if parent && next_path.is_empty_string() {
                return Ok(ip);
            }

            let inum = match guard.dirlookup(name, ctx) {
                Ok((inum, _off)) => inum,
                Err(e) => {
                    drop(guard);
                    self.itable().irelease(ip);
                    return Err(e);
                }
            };
            drop(guard);

            let next = self.itable().iget(self.dev(), inum as u32);
            self.itable().irelease(ip);
            ip = next;
            rest = next_path;
        }

        if parent {
            self.itable().irelease(ip);
            return Err(KernelError::NoSuchEntry);
        }
        Ok(ip)
    }

    /// Looks up and returns the inode for a path name.
    pub fn namei(&self, path: &Path, ctx: &KernelCtx<'_>) -> Result<Iref> {
        self.namex(path, false, ctx)
    }

    /// Returns the inode of the directory containing the final path
    /// element.
    pub fn nameiparent(&self, path: &Path, ctx: &KernelCtx<'_>) -> Result<Iref> {
        self.namex(path, true, ctx)
    }

    /// Creates a regular file: appends a fresh on-disk inode (with its
    /// first 32-block extent) to the inode file, then appends a dirent
    /// for the final path element to the root directory. Both
    /// mutations happen inside one transaction. Names longer than
    /// `DIRSIZ` are truncated; duplicate checking is the caller's
    /// business (create-on-open resolves the name first).
    pub fn addfile(&self, path: &Path, ctx: &KernelCtx<'_>) -> Result<()> {
        let name = path.final_name().ok_or(KernelError::InvalidArgument)?;

        let mut tx = self.begin_tx(ctx)?;

        let mut di = Dinode::default();
        di.typ = IType::File as i16;
        di.devid = self.dev() as i16;
        di.size = 0;
        di.data[0] = Extent {
            startblkno: tx.balloc(ctx),
            nblocks: EXTENTBLOCKS,
        };
        for ext in di.data[1..NEXTENT].iter_mut() {
            *ext = Extent::default();
        }

        // Append the dinode to the end of the inode file.
        let inum = {
            let mut ifile = self.itable().lock_inodefile(ctx)?;
            let off = ifile.size;
            let n = ifile.writei(di.as_bytes(), off, &mut tx, ctx)?;
            assert_eq!(n, INODE_SIZE, "addfile: short dinode write");
            (ifile.size / INODE_SIZE as u32 - 1) as u16
        };

        // Append a dirent to the root directory.
        let root = self.itable().iget(self.dev(), ROOTINO);
        let res: Result<()> = (|| {
            let mut guard = self.itable().lock(&root, ctx)?;
            let mut de = Dirent::default();
            de.inum = inum;
            de.set_name(name);
            let off = guard.size;
            guard.writei(de.as_bytes(), off, &mut tx, ctx)?;
            Ok(())
        })();
        self.itable().irelease(root);
        res?;

        tx.commit(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(bytes: &[u8]) -> &Path {
        unsafe { Path::from_bytes(bytes) }
    }

    fn name(bytes: &[u8]) -> &FileName {
        unsafe { FileName::from_bytes(bytes) }
    }

    #[test]
    fn skipelem_examples() {
        let (rest, n) = path(b"a/bb/c").skipelem().unwrap();
        assert_eq!(rest.as_bytes(), b"bb/c");
        assert_eq!(n.as_bytes(), b"a");

        let (rest, n) = path(b"///a//bb").skipelem().unwrap();
        assert_eq!(rest.as_bytes(), b"bb");
        assert_eq!(n.as_bytes(), b"a");

        let (rest, n) = path(b"a").skipelem().unwrap();
        assert!(rest.is_empty_string());
        assert_eq!(n.as_bytes(), b"a");

        assert!(path(b"").skipelem().is_none());
        assert!(path(b"////").skipelem().is_none());
    }

    #[test]
    fn names_truncate_to_dirsiz() {
        let long = name(b"a-very-long-file-name");
        assert_eq!(long.as_bytes().len(), DIRSIZ);
    }

    #[test]
    fn final_name_walks_to_the_end() {
        assert_eq!(path(b"/x/y/z").final_name().unwrap().as_bytes(), b"z");
        assert!(path(b"///").final_name().is_none());
    }
}
