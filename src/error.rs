//! Kernel error values.
//!
//! Kernel internals propagate these with `?`; the system call boundary
//! folds every error into `-1` except `Sleeping`, which parks the
//! calling process until a wakeup re-dispatches the call.

/// Errors a kernel operation can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed argument: bad fd, unknown mode, negative length.
    InvalidArgument,
    /// User pointer outside the user region, or an unmapped page.
    BadAddress,
    /// Path resolution miss.
    NoSuchEntry,
    /// Out of frames and swap, or an allocation the caller may retry.
    NoMemory,
    /// No free open-file slot or file descriptor.
    TooManyOpenFile,
    /// All six extents of an inode are in use.
    NoSpace,
    /// Write to a pipe whose read end is closed.
    BrokenPipe,
    /// wait() with no children.
    NoChild,
    /// The process was killed while inside the call.
    Killed,
    /// The process went to sleep on a wait channel; the call will be
    /// re-dispatched from its trap frame once a wakeup arrives.
    Sleeping,
}

pub type Result<T> = core::result::Result<T, KernelError>;
