//! Log crash safety: a simulated power cut at every block-write
//! boundary of a transaction must leave the file system in either the
//! pre-transaction or the post-transaction state, never a mixture.

mod common;

use common::*;
use xv64::{number, Kernel, MemDisk};

const RDONLY: u32 = 0;
const RDWR: u32 = 0x2;
const CREATE: u32 = 0x200;

const LEN: usize = 1024;

/// A disk holding "/target" filled with `LEN` bytes of 'A', committed.
fn prepared_image() -> MemDisk {
    let (kernel, pid) = boot();
    let fd = open(&kernel, pid, "/target", CREATE | RDWR);
    assert_eq!(write(&kernel, pid, fd, &[b'A'; LEN]), LEN as i64);
    kernel.into_disk()
}

fn read_target(kernel: &Kernel, pid: xv64::Pid) -> Vec<u8> {
    let fd = open(kernel, pid, "/target", RDONLY);
    assert!(fd >= 0);
    let (n, data) = read(kernel, pid, fd, LEN);
    assert_eq!(n, LEN as i64);
    data
}

/// Overwrites the file with 'B's, crashing after `crash_at` block
/// writes; returns the surviving disk image.
fn overwrite_and_crash(image: MemDisk, crash_at: u32) -> MemDisk {
    let (kernel, pid) = boot_with(image, NPAGES);
    let fd = open(&kernel, pid, "/target", RDWR);
    assert!(fd >= 0);

    let va = push_bytes(&kernel, pid, &[b'B'; LEN]);
    kernel.arm_crash(crash_at);
    // The write may "fail" mid-transaction once the disk dies; either
    // way the medium now holds the crash state.
    let _ = kernel.syscall(pid, number::WRITE, [fd as u64, va as u64, LEN as u64]);
    let mut disk = kernel.into_disk();
    disk.reset_crash();
    disk
}

#[test]
fn every_crash_point_recovers_to_old_or_new() {
    let base = prepared_image();

    // How many block writes the overwrite costs when nothing crashes.
    let total = {
        let (kernel, pid) = boot_with(base.clone(), NPAGES);
        let fd = open(&kernel, pid, "/target", RDWR);
        let before = kernel.disk_writes();
        assert_eq!(write(&kernel, pid, fd, &[b'B'; LEN]), LEN as i64);
        (kernel.disk_writes() - before) as u32
    };
    assert!(total > 0);

    let mut saw_old = false;
    let mut saw_new = false;
    for crash_at in 0..=total {
        let survivor = overwrite_and_crash(base.clone(), crash_at);

        // Reboot: recovery replays a committed transaction and
        // discards an uncommitted one.
        let (kernel, pid) = boot_with(survivor, NPAGES);
        let data = read_target(&kernel, pid);
        if data.iter().all(|b| *b == b'A') {
            saw_old = true;
        } else if data.iter().all(|b| *b == b'B') {
            saw_new = true;
        } else {
            panic!("crash at write {}: mixed file contents", crash_at);
        }
    }

    // The sweep must cross the commit record: early crashes keep the
    // old contents, late ones land the new.
    assert!(saw_old, "no crash point preserved the old state");
    assert!(saw_new, "no crash point reached the committed state");
}

#[test]
fn recovery_replays_a_committed_log() {
    // The first crash point that recovers to the new contents is the
    // one right after the commit record — with the home copies and the
    // metadata clear still pending. Recovery, not the home writes,
    // must supply the data (scenario: crash after the commit write,
    // before the first home-block copy).
    let base = prepared_image();
    let total = {
        let (kernel, pid) = boot_with(base.clone(), NPAGES);
        let fd = open(&kernel, pid, "/target", RDWR);
        let before = kernel.disk_writes();
        assert_eq!(write(&kernel, pid, fd, &[b'B'; LEN]), LEN as i64);
        (kernel.disk_writes() - before) as u32
    };

    let mut first_new = None;
    for crash_at in 0..=total {
        let survivor = overwrite_and_crash(base.clone(), crash_at);
        let (kernel, pid) = boot_with(survivor, NPAGES);
        let data = read_target(&kernel, pid);
        if data.iter().all(|b| *b == b'B') {
            first_new = Some(crash_at);
            break;
        }
    }
    let first_new = first_new.expect("no crash point recovered the new state");
    // At least the home copies and the clear were outstanding.
    assert!(first_new + 2 <= total, "commit record was not the turning point");
}

#[test]
fn crashn_syscall_arms_the_disk() {
    let (kernel, pid) = boot();
    assert_eq!(
        kernel.syscall(pid, number::CRASHN, [3, 0, 0]).unwrap(),
        0
    );
    assert!(!kernel.crashed());
    let fd = open(&kernel, pid, "/f", CREATE | RDWR);
    // Any transaction performs more than three block writes.
    let _ = write(&kernel, pid, fd, b"x");
    assert!(kernel.crashed());
}

#[test]
fn uncommitted_log_is_discarded_on_boot() {
    // Crash immediately: nothing of the new write may survive.
    let base = prepared_image();
    let survivor = overwrite_and_crash(base, 0);
    let (kernel, pid) = boot_with(survivor, NPAGES);
    let data = read_target(&kernel, pid);
    assert!(data.iter().all(|b| *b == b'A'));
}
