//! Console device.
//!
//! The machine's teletype is out of scope; what the kernel carries is
//! the device-inode surface: device id 1 dispatches here through the
//! `devsw` table. Input arrives from the embedder via
//! `Kernel::console_input` and readers park until some shows up;
//! output accumulates in a buffer the embedder can drain.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::error::Result;
use crate::kernel::Kernel;
use crate::lock::Spinlock;
use crate::proc::{KernelCtx, WaitChannel};

/// Device id of the console.
pub const CONSOLE: i16 = 1;

struct ConsoleInner {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

pub struct Console {
    inner: Spinlock<ConsoleInner>,
    read_chan: WaitChannel,
}

impl Console {
    pub fn new() -> Self {
        Self {
            inner: Spinlock::new("cons", ConsoleInner {
                input: VecDeque::new(),
                output: Vec::new(),
            }),
            read_chan: WaitChannel::new(),
        }
    }
}

/// devsw read operation: drains buffered input, parking the caller
/// while none is available.
pub fn consoleread(ctx: &KernelCtx<'_>, dst: &mut [u8]) -> Result<usize> {
    let cons = ctx.kernel().console();
    let mut inner = cons.inner.lock();
    if inner.input.is_empty() {
        return Err(cons.read_chan.sleep(&mut inner, ctx));
    }
    let mut count = 0;
    while count < dst.len() {
        match inner.input.pop_front() {
            Some(byte) => {
                dst[count] = byte;
                count += 1;
            }
            None => break,
        }
    }
    Ok(count)
}

/// devsw write operation.
pub fn consolewrite(ctx: &KernelCtx<'_>, src: &[u8]) -> Result<usize> {
    let cons = ctx.kernel().console();
    let mut inner = cons.inner.lock();
    inner.output.extend_from_slice(src);
    Ok(src.len())
}

impl Kernel {
    /// Feeds bytes to the console input, waking any parked reader.
    pub fn console_input(&self, bytes: &[u8]) {
        let cons = self.console();
        let mut inner = cons.inner.lock();
        inner.input.extend(bytes.iter().copied());
        drop(inner);
        cons.read_chan.wakeup(self);
    }

    /// Snapshot of everything written to the console so far.
    pub fn console_output(&self) -> Vec<u8> {
        self.console().inner.lock().output.clone()
    }
}
