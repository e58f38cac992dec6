//! System call dispatch and argument fetch.
//!
//! Arguments arrive in the trap frame (`rdi`, `rsi`, `rdx`; the call
//! number in `rax`). Pointer arguments are validated against the user
//! regions before use and buffers must span their claimed length; any
//! failure turns into -1 at the boundary.

use alloc::vec::Vec;

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::param::MAXPATH;
use crate::proc::KernelCtx;

mod file;
mod proc;

/// System call numbers.
pub mod number {
    pub const FORK: u64 = 1;
    pub const EXIT: u64 = 2;
    pub const WAIT: u64 = 3;
    pub const PIPE: u64 = 4;
    pub const READ: u64 = 5;
    pub const KILL: u64 = 6;
    pub const EXEC: u64 = 7;
    pub const FSTAT: u64 = 8;
    pub const DUP: u64 = 10;
    pub const GETPID: u64 = 11;
    pub const SBRK: u64 = 12;
    pub const SLEEP: u64 = 13;
    pub const UPTIME: u64 = 14;
    pub const OPEN: u64 = 15;
    pub const WRITE: u64 = 16;
    pub const CLOSE: u64 = 21;
    pub const CRASHN: u64 = 23;
}

impl Kernel {
    /// Decodes and runs one system call on behalf of `ctx`'s process.
    pub(crate) fn dispatch(&self, num: u64, ctx: &KernelCtx<'_>) -> Result<usize> {
        match num {
            number::FORK => self.sys_fork(ctx),
            number::EXIT => self.sys_exit(ctx),
            number::WAIT => self.sys_wait(ctx),
            number::PIPE => self.sys_pipe(ctx),
            number::READ => self.sys_read(ctx),
            number::KILL => self.sys_kill(ctx),
            number::EXEC => self.sys_exec(ctx),
            number::FSTAT => self.sys_fstat(ctx),
            number::DUP => self.sys_dup(ctx),
            number::GETPID => self.sys_getpid(ctx),
            number::SBRK => self.sys_sbrk(ctx),
            number::SLEEP => self.sys_sleep(ctx),
            number::UPTIME => self.sys_uptime(ctx),
            number::OPEN => self.sys_open(ctx),
            number::WRITE => self.sys_write(ctx),
            number::CLOSE => self.sys_close(ctx),
            number::CRASHN => self.sys_crashn(ctx),
            _ => {
                log::warn!("pid {}: unknown sys call {}", ctx.pid(), num);
                Err(KernelError::InvalidArgument)
            }
        }
    }
}

impl KernelCtx<'_> {
    fn argraw(&self, n: usize) -> u64 {
        let data = self.data();
        match n {
            0 => data.tf.rdi,
            1 => data.tf.rsi,
            2 => data.tf.rdx,
            _ => panic!("argraw"),
        }
    }

    /// Fetch the nth 32-bit system call argument.
    pub fn argint(&self, n: usize) -> Result<i32> {
        Ok(self.argraw(n) as i32)
    }

    /// Retrieve an argument as an address, without validation; copyin
    /// and copyout do their own.
    pub fn argaddr(&self, n: usize) -> Result<usize> {
        Ok(self.argraw(n) as usize)
    }

    /// Retrieve an argument as a pointer to a buffer of `len` bytes,
    /// checking that the whole buffer lies inside one user region.
    pub fn argptr(&self, n: usize, len: usize) -> Result<usize> {
        let addr = self.argaddr(n)?;
        let vspace = self.proc().vspace.borrow();
        let kind = vspace.va2region(addr).ok_or(KernelError::BadAddress)?;
        let region = vspace.region(kind);
        if !region.contains(addr) {
            return Err(KernelError::BadAddress);
        }
        if len > 0 && !region.contains(addr + len - 1) {
            return Err(KernelError::BadAddress);
        }
        Ok(addr)
    }

    /// Fetch the nth argument as a NUL-terminated string.
    pub fn argstr(&self, n: usize, max: usize) -> Result<Vec<u8>> {
        let addr = self.argaddr(n)?;
        self.kernel().copy_in_str(addr, max, self)
    }

    /// Fetch the u64 at `addr` in user memory.
    pub fn fetchaddr(&self, addr: usize) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.kernel().copy_in(&mut bytes, addr, self)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Fetch the NUL-terminated string at `addr`.
    pub fn fetchstr(&self, addr: usize, max: usize) -> Result<Vec<u8>> {
        self.kernel().copy_in_str(addr, max, self)
    }
}

/// Shared bound for path arguments.
pub(crate) const PATHMAX: usize = MAXPATH;
