//! Syscall-boundary tests: argument validation, descriptor lifetime,
//! dup semantics, and the file-table reference invariant.

mod common;

use common::*;
use xv64::number;

const RDONLY: u32 = 0;
const RDWR: u32 = 0x2;
const CREATE: u32 = 0x200;

#[test]
fn bad_descriptors_are_rejected() {
    let (kernel, pid) = boot();
    let va = sbrk(&kernel, pid, 64);

    for fd in [-1i64, 7, 200] {
        assert_eq!(
            kernel.syscall(pid, number::READ, [fd as u64, va as u64, 8]),
            Some(-1)
        );
        assert_eq!(
            kernel.syscall(pid, number::WRITE, [fd as u64, va as u64, 8]),
            Some(-1)
        );
        assert_eq!(
            kernel.syscall(pid, number::CLOSE, [fd as u64, 0, 0]),
            Some(-1)
        );
    }
}

#[test]
fn bad_pointers_are_rejected() {
    let (kernel, pid) = boot();
    let fd = open(&kernel, pid, "/f", CREATE | RDWR);
    assert!(fd >= 0);

    // Far outside every region.
    assert_eq!(
        kernel.syscall(pid, number::READ, [fd as u64, 0xdead_0000, 8]),
        Some(-1)
    );

    // A buffer that runs off the end of the heap.
    let heap_end = sbrk(&kernel, pid, 0);
    assert_eq!(
        kernel.syscall(pid, number::READ, [fd as u64, (heap_end - 4) as u64, 64]),
        Some(-1)
    );

    // Negative and zero lengths.
    let va = sbrk(&kernel, pid, 64);
    assert_eq!(
        kernel.syscall(pid, number::READ, [fd as u64, va as u64, 0]),
        Some(-1)
    );
    assert_eq!(
        kernel.syscall(pid, number::READ, [fd as u64, va as u64, (-5i64) as u64]),
        Some(-1)
    );
}

#[test]
fn unknown_syscall_number_fails() {
    let (kernel, pid) = boot();
    assert_eq!(kernel.syscall(pid, 999, [0, 0, 0]), Some(-1));
}

#[test]
fn dup_shares_the_offset() {
    let (kernel, pid) = boot();
    let fd = open(&kernel, pid, "/dup", CREATE | RDWR);
    assert_eq!(write(&kernel, pid, fd, b"abcd"), 4);

    let fd2 = kernel
        .syscall(pid, number::DUP, [fd as u64, 0, 0])
        .unwrap();
    assert!(fd2 >= 0);
    assert_ne!(fd, fd2);

    // Both descriptors sit at the end of the file.
    let (n, _) = read(&kernel, pid, fd2, 8);
    assert_eq!(n, 0);

    // A fresh open has its own offset.
    let fd3 = open(&kernel, pid, "/dup", RDONLY);
    let (n, data) = read(&kernel, pid, fd3, 8);
    assert_eq!(n, 4);
    assert_eq!(&data, b"abcd");
}

#[test]
fn file_table_references_add_up() {
    let (kernel, parent) = boot();
    let fd = open(&kernel, parent, "/refs", CREATE | RDWR);
    assert_eq!(kernel.fd_refcnt(parent, fd as usize), Some(1));

    let fd2 = kernel
        .syscall(parent, number::DUP, [fd as u64, 0, 0])
        .unwrap();
    assert_eq!(kernel.fd_refcnt(parent, fd as usize), Some(2));

    let child = fork(&kernel, parent);
    // Two descriptors in each of two processes point at the slot.
    assert_eq!(kernel.fd_refcnt(parent, fd as usize), Some(4));

    assert_eq!(close(&kernel, child, fd), 0);
    assert_eq!(close(&kernel, child, fd2), 0);
    assert_eq!(kernel.fd_refcnt(parent, fd as usize), Some(2));
    assert_eq!(close(&kernel, parent, fd2), 0);
    assert_eq!(kernel.fd_refcnt(parent, fd as usize), Some(1));

    // Closing the last reference releases the inode.
    let ino = fstat_ino(&kernel, parent, fd);
    assert!(kernel.fs().itable().refcnt(1, ino) >= 1);
    assert_eq!(close(&kernel, parent, fd), 0);
    assert_eq!(kernel.fs().itable().refcnt(1, ino), 0);
}

#[test]
fn descriptors_are_per_process_after_close() {
    let (kernel, parent) = boot();
    let fd = open(&kernel, parent, "/pp", CREATE | RDWR);
    let child = fork(&kernel, parent);

    // The child closing its copy leaves the parent's working.
    assert_eq!(close(&kernel, child, fd), 0);
    assert_eq!(write(&kernel, parent, fd, b"still"), 5);
    // And the child's descriptor really is gone.
    let va = push_bytes(&kernel, child, b"gone");
    assert_eq!(
        kernel.syscall(child, number::WRITE, [fd as u64, va as u64, 4]),
        Some(-1)
    );
}

#[test]
fn open_exhausts_descriptors_gracefully() {
    let (kernel, pid) = boot();
    let mut opened = Vec::new();
    loop {
        let fd = open(&kernel, pid, "/many", CREATE | RDWR);
        if fd < 0 {
            break;
        }
        opened.push(fd);
    }
    // 16 per-process slots.
    assert_eq!(opened.len(), 16);

    // Closing one frees a slot for the next open.
    assert_eq!(close(&kernel, pid, opened[3]), 0);
    let fd = open(&kernel, pid, "/many", RDONLY);
    assert!(fd >= 0);
}
