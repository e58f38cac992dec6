//! The xv64 kernel core.
//!
//! A small teaching operating system for x86-64: preemptive processes
//! with copy-on-write virtual memory and page eviction to disk, an
//! extent-based file system behind a physical redo log, and the system
//! call boundary that ties them together.
//!
//! The machine-dependent surface (block device, MMU, trap entry) is
//! provided by the `hal` and `arch` modules; everything above it is
//! machine-independent kernel code. `Kernel::new` boots a kernel over a
//! disk image (see `mkfs`) and the trap entry points drive it.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate bitflags;

mod arch;
mod bio;
mod console;
mod error;
mod exec;
mod file;
mod fs;
mod hal;
mod kalloc;
mod kernel;
mod lock;
mod mkfs;
mod pipe;
mod proc;
mod static_refcell;
mod swap;
mod syscall;
mod trap;
mod vm;

pub mod param;

pub use arch::TrapFrame;
pub use console::CONSOLE;
pub use error::{KernelError, Result};
pub use file::OMode;
pub use fs::{IType, Stat};
pub use hal::MemDisk;
pub use kalloc::MemStats;
pub use kernel::Kernel;
pub use mkfs::FsImage;
pub use proc::{Pid, Procstate};
pub use syscall::number;
pub use vm::{RegionKind, VPageInfo};
