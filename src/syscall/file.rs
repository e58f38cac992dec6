//! File-system system calls. Mostly argument checking, since user
//! code is not trusted; the real work happens in `file` and `fs`.

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use zerocopy::AsBytes;

use super::PATHMAX;
use crate::error::{KernelError, Result};
use crate::file::{FileRef, OMode};
use crate::fs::Path;
use crate::kernel::Kernel;
use crate::param::{MAXARG, MAXARGLEN, NOFILE};
use crate::proc::KernelCtx;

impl KernelCtx<'_> {
    /// Fetch the nth argument as a file descriptor owned by the
    /// calling process.
    fn argfd(&self, n: usize) -> Result<(usize, FileRef)> {
        let fd = self.argint(n)?;
        if fd < 0 || fd as usize >= NOFILE {
            return Err(KernelError::InvalidArgument);
        }
        let fd = fd as usize;
        let f = self.data().files[fd].ok_or(KernelError::InvalidArgument)?;
        Ok((fd, f))
    }

    /// Installs a file in the first free descriptor slot.
    fn fdalloc(&self, f: FileRef) -> Result<usize> {
        let mut data = self.data_mut();
        for (fd, slot) in data.files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(f);
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFile)
    }
}

impl Kernel {
    pub(crate) fn sys_read(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let (_, f) = ctx.argfd(0)?;
        let n = ctx.argint(2)?;
        if n <= 0 {
            return Err(KernelError::InvalidArgument);
        }
        let va = ctx.argptr(1, n as usize)?;
        self.ftable().read(f, va, n as usize, ctx)
    }

    pub(crate) fn sys_write(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let (_, f) = ctx.argfd(0)?;
        let n = ctx.argint(2)?;
        if n <= 0 {
            return Err(KernelError::InvalidArgument);
        }
        let va = ctx.argptr(1, n as usize)?;
        self.ftable().write(f, va, n as usize, ctx)
    }

    pub(crate) fn sys_open(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let path = ctx.argstr(0, PATHMAX)?;
        let mode = ctx.argint(1)?;
        let mode = OMode::from_bits(mode as u32).ok_or(KernelError::InvalidArgument)?;
        if !mode.valid_access() {
            return Err(KernelError::InvalidArgument);
        }

        // SAFETY: copy_in_str strips the terminator and admits no NUL.
        let path = unsafe { Path::from_bytes(&path) };
        let f = self.fileopen(path, mode, ctx)?;
        match ctx.fdalloc(f) {
            Ok(fd) => Ok(fd),
            Err(e) => {
                self.ftable().close(f, ctx);
                Err(e)
            }
        }
    }

    pub(crate) fn sys_close(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let (fd, f) = ctx.argfd(0)?;
        ctx.data_mut().files[fd] = None;
        self.ftable().close(f, ctx);
        Ok(0)
    }

    pub(crate) fn sys_dup(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let (_, f) = ctx.argfd(0)?;
        let fd = ctx.fdalloc(f)?;
        if let Err(e) = self.ftable().dup(f, ctx) {
            ctx.data_mut().files[fd] = None;
            return Err(e);
        }
        Ok(fd)
    }

    pub(crate) fn sys_fstat(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let (_, f) = ctx.argfd(0)?;
        let va = ctx.argptr(1, core::mem::size_of::<crate::fs::Stat>())?;
        let stat = self.ftable().stat(f, ctx)?;
        self.copy_out(va, stat.as_bytes(), ctx)?;
        Ok(0)
    }

    pub(crate) fn sys_pipe(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let va = ctx.argptr(0, 2 * core::mem::size_of::<i32>())?;

        let (f0, f1) = self.allocate_pipe(ctx)?;
        let rfd = match ctx.fdalloc(f0) {
            Ok(fd) => fd,
            Err(e) => {
                self.ftable().close(f0, ctx);
                self.ftable().close(f1, ctx);
                return Err(e);
            }
        };
        let wfd = match ctx.fdalloc(f1) {
            Ok(fd) => fd,
            Err(e) => {
                ctx.data_mut().files[rfd] = None;
                self.ftable().close(f0, ctx);
                self.ftable().close(f1, ctx);
                return Err(e);
            }
        };

        let mut fds = [0u8; 8];
        fds[..4].copy_from_slice(&(rfd as i32).to_le_bytes());
        fds[4..].copy_from_slice(&(wfd as i32).to_le_bytes());
        if let Err(e) = self.copy_out(va, &fds, ctx) {
            ctx.data_mut().files[rfd] = None;
            ctx.data_mut().files[wfd] = None;
            self.ftable().close(f0, ctx);
            self.ftable().close(f1, ctx);
            return Err(e);
        }
        Ok(0)
    }

    pub(crate) fn sys_exec(&self, ctx: &KernelCtx<'_>) -> Result<usize> {
        let path = ctx.argstr(0, PATHMAX)?;
        let argv_addr = ctx.argaddr(1)?;

        let mut argv: ArrayVec<Vec<u8>, MAXARG> = ArrayVec::new();
        loop {
            let ptr = ctx.fetchaddr(argv_addr + 8 * argv.len())?;
            if ptr == 0 {
                break;
            }
            if argv.is_full() {
                return Err(KernelError::InvalidArgument);
            }
            argv.push(ctx.fetchstr(ptr as usize, MAXARGLEN)?);
        }

        // SAFETY: copy_in_str strips the terminator and admits no NUL.
        let path = unsafe { Path::from_bytes(&path) };
        crate::exec::exec(path, &argv, ctx)
    }
}
