//! Process lifecycle integration tests: fork/exit/wait, kill,
//! reparenting, sleep/uptime, and the zombie reap path.

mod common;

use common::*;
use xv64::{number, Procstate};

#[test]
fn fork_returns_child_pid_and_child_zero() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);
    assert!(child > parent);
    // The child's saved frame carries fork's zero return.
    assert_eq!(kernel.trapframe(child).unwrap().rax, 0);
    assert_eq!(kernel.proc_state(child), Some(Procstate::RUNNABLE));
}

#[test]
fn wait_reaps_a_zombie_child() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);

    assert_eq!(kernel.syscall(child, number::EXIT, [0, 0, 0]), Some(0));
    assert_eq!(kernel.proc_state(child), Some(Procstate::ZOMBIE));

    let reaped = kernel.syscall(parent, number::WAIT, [0, 0, 0]).unwrap();
    assert_eq!(reaped, child as i64);
    // The slot is free again.
    assert_eq!(kernel.proc_state(child), None);
}

#[test]
fn wait_blocks_until_a_child_dies() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);

    let parked = kernel.syscall(parent, number::WAIT, [0, 0, 0]);
    assert!(parked.is_none(), "wait with a live child did not block");
    assert_eq!(kernel.proc_state(parent), Some(Procstate::SLEEPING));

    assert_eq!(kernel.syscall(child, number::EXIT, [0, 0, 0]), Some(0));
    assert_eq!(kernel.schedule(), Some(parent));
    assert_eq!(kernel.trapframe(parent).unwrap().rax as i64, child as i64);
}

#[test]
fn wait_without_children_fails() {
    let (kernel, parent) = boot();
    assert_eq!(kernel.syscall(parent, number::WAIT, [0, 0, 0]), Some(-1));
}

#[test]
fn exit_reparents_children_to_init() {
    let (kernel, init) = boot();
    let middle = fork(&kernel, init);
    let orphan = fork(&kernel, middle);

    assert_eq!(kernel.syscall(middle, number::EXIT, [0, 0, 0]), Some(0));
    assert_eq!(kernel.syscall(init, number::WAIT, [0, 0, 0]), Some(middle as i64));

    // The orphan now belongs to init.
    assert_eq!(kernel.syscall(orphan, number::EXIT, [0, 0, 0]), Some(0));
    assert_eq!(kernel.syscall(init, number::WAIT, [0, 0, 0]), Some(orphan as i64));
}

#[test]
fn kill_marks_and_the_victim_exits_on_return() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);

    assert_eq!(
        kernel.syscall(parent, number::KILL, [child as u64, 0, 0]),
        Some(0)
    );
    // The victim dies on its next pass through the trap path.
    kernel.run();
    assert_eq!(kernel.proc_state(child), Some(Procstate::ZOMBIE));
    assert_eq!(
        kernel.syscall(parent, number::WAIT, [0, 0, 0]),
        Some(child as i64)
    );

    // Killing a nonexistent pid fails.
    assert_eq!(kernel.syscall(parent, number::KILL, [9999, 0, 0]), Some(-1));
}

#[test]
fn kill_wakes_a_sleeping_victim() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);

    let parked = kernel.syscall(child, number::SLEEP, [1000, 0, 0]);
    assert!(parked.is_none());
    assert_eq!(kernel.proc_state(child), Some(Procstate::SLEEPING));

    assert_eq!(
        kernel.syscall(parent, number::KILL, [child as u64, 0, 0]),
        Some(0)
    );
    assert_eq!(kernel.proc_state(child), Some(Procstate::RUNNABLE));
    kernel.run();
    assert_eq!(kernel.proc_state(child), Some(Procstate::ZOMBIE));
}

#[test]
fn sleep_wakes_after_enough_ticks() {
    let (kernel, pid) = boot();
    assert_eq!(kernel.syscall(pid, number::UPTIME, [0, 0, 0]), Some(0));

    let parked = kernel.syscall(pid, number::SLEEP, [3, 0, 0]);
    assert!(parked.is_none());

    // Each tick wakes the sleeper; it re-checks its deadline and
    // parks again until enough time has passed.
    for _ in 0..2 {
        kernel.tick();
        kernel.run();
        assert_eq!(kernel.proc_state(pid), Some(Procstate::SLEEPING));
    }
    kernel.tick();
    assert_eq!(kernel.schedule(), Some(pid));
    assert_eq!(kernel.trapframe(pid).unwrap().rax as i64, 0);

    assert_eq!(kernel.syscall(pid, number::UPTIME, [0, 0, 0]), Some(3));
}

#[test]
fn getpid_reports_identity() {
    let (kernel, parent) = boot();
    assert_eq!(
        kernel.syscall(parent, number::GETPID, [0, 0, 0]),
        Some(parent as i64)
    );
    let child = fork(&kernel, parent);
    assert_eq!(
        kernel.syscall(child, number::GETPID, [0, 0, 0]),
        Some(child as i64)
    );
}

#[test]
fn exit_closes_descriptors() {
    let (kernel, parent) = boot();
    let (rfd, wfd) = pipe(&kernel, parent);
    let child = fork(&kernel, parent);
    assert_eq!(kernel.fd_refcnt(parent, rfd as usize), Some(2));

    assert_eq!(kernel.syscall(child, number::EXIT, [0, 0, 0]), Some(0));
    assert_eq!(kernel.fd_refcnt(parent, rfd as usize), Some(1));
    assert_eq!(kernel.fd_refcnt(parent, wfd as usize), Some(1));
}

#[test]
fn procdump_smoke() {
    let (kernel, parent) = boot();
    let _child = fork(&kernel, parent);
    kernel.procdump();
}
