//! Pipe integration tests: blocking rendezvous, end-of-file, the
//! wrap-around path of the ring, and the head/tail ordering invariant.

mod common;

use common::*;
use xv64::number;

/// head <= tail <= head + bufsize, at every observation point.
fn check_pipe_invariant(kernel: &xv64::Kernel, pid: xv64::Pid, fd: i64) {
    let (head, tail) = kernel.pipe_counters(pid, fd as usize).expect("not a pipe");
    assert!(head <= tail, "pipe head passed tail");
    assert!(tail - head <= 4096, "pipe overfilled");
}

#[test]
fn reader_blocks_until_writer_delivers() {
    let (kernel, parent) = boot();
    let (rfd, wfd) = pipe(&kernel, parent);
    let child = fork(&kernel, parent);

    // The parent reads; the child writes. Drop the parent's write end
    // first so end-of-file can arrive later.
    assert_eq!(close(&kernel, parent, wfd), 0);

    let dst = sbrk(&kernel, parent, 16);
    let parked = kernel.syscall(parent, number::READ, [rfd as u64, dst as u64, 16]);
    assert!(parked.is_none(), "read from an empty pipe did not block");
    assert_eq!(kernel.proc_state(parent), Some(xv64::Procstate::SLEEPING));

    assert_eq!(write(&kernel, child, wfd, b"hello"), 5);

    // The wakeup made the parent runnable; a scheduling round finishes
    // its read.
    assert_eq!(kernel.schedule(), Some(parent));
    assert_eq!(kernel.trapframe(parent).unwrap().rax as i64, 5);
    let mut buf = [0u8; 5];
    kernel.user_read(parent, dst, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    check_pipe_invariant(&kernel, parent, rfd);

    // Writer closes: the next read is end-of-file.
    assert_eq!(close(&kernel, child, wfd), 0);
    assert_eq!(close(&kernel, child, rfd), 0);
    let (n, _) = read(&kernel, parent, rfd, 16);
    assert_eq!(n, 0);
}

#[test]
fn ring_wraps_without_clobbering() {
    let (kernel, pid) = boot();
    let (rfd, wfd) = pipe(&kernel, pid);

    // Cycle more than a full buffer through the ring so writes wrap.
    let mut expected = Vec::new();
    let mut received = Vec::new();
    for round in 0..5u32 {
        let chunk: Vec<u8> = (0..3000u32)
            .map(|i| ((i * 7 + round * 13) % 251) as u8)
            .collect();
        let n = write(&kernel, pid, wfd, &chunk);
        assert!(n > 0);
        expected.extend_from_slice(&chunk[..n as usize]);
        check_pipe_invariant(&kernel, pid, rfd);

        let (m, data) = read(&kernel, pid, rfd, 4096);
        assert!(m > 0);
        received.extend_from_slice(&data);
        check_pipe_invariant(&kernel, pid, rfd);
    }
    // Drain what's left.
    loop {
        let (head, tail) = kernel.pipe_counters(pid, rfd as usize).unwrap();
        if head == tail {
            break;
        }
        let (m, data) = read(&kernel, pid, rfd, 4096);
        assert!(m > 0);
        received.extend_from_slice(&data);
    }
    assert_eq!(received, expected, "ring corrupted bytes across the wrap");
}

#[test]
fn short_write_when_nearly_full_blocks_when_full() {
    let (kernel, pid) = boot();
    let (rfd, wfd) = pipe(&kernel, pid);

    // Fill the buffer exactly.
    assert_eq!(write(&kernel, pid, wfd, &[1u8; 4096]), 4096);
    check_pipe_invariant(&kernel, pid, rfd);

    // A full pipe parks the writer (another process keeps the story
    // honest: this process must stay free to drain).
    let child = fork(&kernel, pid);
    let src = push_bytes(&kernel, child, &[2u8; 8]);
    let parked = kernel.syscall(child, number::WRITE, [wfd as u64, src as u64, 8]);
    assert!(parked.is_none(), "write into a full pipe did not block");

    // Draining wakes the writer; its whole payload lands.
    let (n, _) = read(&kernel, pid, rfd, 100);
    assert_eq!(n, 100);
    assert_eq!(kernel.schedule(), Some(child));
    assert_eq!(kernel.trapframe(child).unwrap().rax as i64, 8);
    check_pipe_invariant(&kernel, pid, rfd);

    // A write larger than the free space returns a short count.
    let n = write(&kernel, pid, wfd, &[3u8; 4096]);
    assert_eq!(n, 100 - 8);
    check_pipe_invariant(&kernel, pid, rfd);
}

#[test]
fn write_without_reader_fails() {
    let (kernel, pid) = boot();
    let (rfd, wfd) = pipe(&kernel, pid);
    assert_eq!(close(&kernel, pid, rfd), 0);
    assert_eq!(write(&kernel, pid, wfd, b"x"), -1);
}

#[test]
fn fork_shares_pipe_slots() {
    let (kernel, parent) = boot();
    let (rfd, wfd) = pipe(&kernel, parent);
    assert_eq!(kernel.fd_refcnt(parent, rfd as usize), Some(1));

    let child = fork(&kernel, parent);
    assert_eq!(kernel.fd_refcnt(parent, rfd as usize), Some(2));
    assert_eq!(kernel.fd_refcnt(child, wfd as usize), Some(2));

    assert_eq!(close(&kernel, child, rfd), 0);
    assert_eq!(kernel.fd_refcnt(parent, rfd as usize), Some(1));
}
