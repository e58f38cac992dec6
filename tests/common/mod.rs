//! Shared harness for the integration tests: boots a kernel over a
//! fresh mkfs image and drives it the way user code would, with small
//! helpers that stage buffers in a process's memory before issuing the
//! system call that consumes them.
#![allow(dead_code)]

use std::convert::TryInto;

use xv64::{number, FsImage, Kernel, MemDisk, Pid};

pub const NPAGES: usize = 64;
pub const FSBLOCKS: u32 = 2048;

pub fn image() -> MemDisk {
    FsImage::new(FSBLOCKS).finish()
}

/// Boots a kernel with the default machine size and the first process.
pub fn boot() -> (Box<Kernel>, Pid) {
    boot_with(image(), NPAGES)
}

pub fn boot_with(disk: MemDisk, npages: usize) -> (Box<Kernel>, Pid) {
    let kernel = Kernel::new(disk, npages);
    let pid = kernel.userinit();
    (kernel, pid)
}

/// Stages `bytes` in the process's heap and returns their address.
pub fn push_bytes(kernel: &Kernel, pid: Pid, bytes: &[u8]) -> usize {
    let va = sbrk(kernel, pid, bytes.len().max(1) as i64);
    kernel.user_write(pid, va, bytes).expect("push_bytes");
    va
}

/// Stages a NUL-terminated string.
pub fn push_str(kernel: &Kernel, pid: Pid, s: &str) -> usize {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    push_bytes(kernel, pid, &bytes)
}

pub fn sbrk(kernel: &Kernel, pid: Pid, n: i64) -> usize {
    kernel
        .syscall(pid, number::SBRK, [n as u64, 0, 0])
        .expect("sbrk blocked") as usize
}

pub fn open(kernel: &Kernel, pid: Pid, path: &str, mode: u32) -> i64 {
    let va = push_str(kernel, pid, path);
    kernel
        .syscall(pid, number::OPEN, [va as u64, mode as u64, 0])
        .expect("open blocked")
}

pub fn close(kernel: &Kernel, pid: Pid, fd: i64) -> i64 {
    kernel
        .syscall(pid, number::CLOSE, [fd as u64, 0, 0])
        .expect("close blocked")
}

/// Writes `bytes` to `fd`, staging them in the process first.
pub fn write(kernel: &Kernel, pid: Pid, fd: i64, bytes: &[u8]) -> i64 {
    let va = push_bytes(kernel, pid, bytes);
    kernel
        .syscall(pid, number::WRITE, [fd as u64, va as u64, bytes.len() as u64])
        .expect("write blocked")
}

/// Reads up to `n` bytes from `fd` into fresh memory; returns the
/// count and the bytes.
pub fn read(kernel: &Kernel, pid: Pid, fd: i64, n: usize) -> (i64, Vec<u8>) {
    let va = sbrk(kernel, pid, n as i64);
    let ret = kernel
        .syscall(pid, number::READ, [fd as u64, va as u64, n as u64])
        .expect("read blocked");
    let mut buf = vec![0u8; if ret > 0 { ret as usize } else { 0 }];
    kernel.user_read(pid, va, &mut buf).expect("read buffer");
    (ret, buf)
}

pub fn fork(kernel: &Kernel, pid: Pid) -> Pid {
    let child = kernel
        .syscall(pid, number::FORK, [0, 0, 0])
        .expect("fork blocked");
    assert!(child > 0, "fork failed");
    child as Pid
}

/// Parses the `size` field out of an fstat result.
pub fn fstat_size(kernel: &Kernel, pid: Pid, fd: i64) -> u32 {
    let va = sbrk(kernel, pid, 16);
    let ret = kernel
        .syscall(pid, number::FSTAT, [fd as u64, va as u64, 0])
        .expect("fstat blocked");
    assert_eq!(ret, 0, "fstat failed");
    let mut stat = [0u8; 16];
    kernel.user_read(pid, va, &mut stat).expect("fstat buffer");
    u32::from_le_bytes(stat[8..12].try_into().unwrap())
}

/// Parses the `typ` field out of an fstat result.
pub fn fstat_type(kernel: &Kernel, pid: Pid, fd: i64) -> i16 {
    let va = sbrk(kernel, pid, 16);
    let ret = kernel
        .syscall(pid, number::FSTAT, [fd as u64, va as u64, 0])
        .expect("fstat blocked");
    assert_eq!(ret, 0, "fstat failed");
    let mut stat = [0u8; 16];
    kernel.user_read(pid, va, &mut stat).expect("fstat buffer");
    i16::from_le_bytes(stat[12..14].try_into().unwrap())
}

/// Parses the `ino` field out of an fstat result.
pub fn fstat_ino(kernel: &Kernel, pid: Pid, fd: i64) -> u32 {
    let va = sbrk(kernel, pid, 16);
    let ret = kernel
        .syscall(pid, number::FSTAT, [fd as u64, va as u64, 0])
        .expect("fstat blocked");
    assert_eq!(ret, 0, "fstat failed");
    let mut stat = [0u8; 16];
    kernel.user_read(pid, va, &mut stat).expect("fstat buffer");
    u32::from_le_bytes(stat[4..8].try_into().unwrap())
}

/// Creates a pipe; returns `(read_fd, write_fd)`.
pub fn pipe(kernel: &Kernel, pid: Pid) -> (i64, i64) {
    let va = sbrk(kernel, pid, 8);
    let ret = kernel
        .syscall(pid, number::PIPE, [va as u64, 0, 0])
        .expect("pipe blocked");
    assert_eq!(ret, 0, "pipe failed");
    let mut fds = [0u8; 8];
    kernel.user_read(pid, va, &mut fds).expect("pipe fds");
    (
        i32::from_le_bytes(fds[..4].try_into().unwrap()) as i64,
        i32::from_le_bytes(fds[4..].try_into().unwrap()) as i64,
    )
}
