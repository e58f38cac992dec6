//! Virtual memory integration tests: copy-on-write fork sharing,
//! eviction to swap and back, heap growth, stack growth, and the
//! ref-count invariants that tie the core map, the swap map and the
//! address spaces together.

mod common;

use std::collections::HashMap;

use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use xv64::{Kernel, Pid};

/// (CoW) For every frame mapped by anyone, the frame's ref count
/// equals the number of (process, va) mappings pointing at it, and a
/// CoW mapping is never writable. (Swap) For every used slot, the ref
/// count equals the number of swapped mappings naming it.
fn check_memory_invariants(kernel: &Kernel, pids: &[Pid]) {
    let mut frame_refs: HashMap<usize, u32> = HashMap::new();
    let mut slot_refs: HashMap<usize, u32> = HashMap::new();

    for &pid in pids {
        for (_va, page) in kernel.mapped_pages(pid) {
            if page.present {
                *frame_refs.entry(page.ppn).or_insert(0) += 1;
                if page.cow {
                    assert!(!page.writable, "cow page writable");
                }
            } else if page.swapped {
                *slot_refs.entry(page.swap_index).or_insert(0) += 1;
            }
        }
    }

    for (&ppn, &count) in &frame_refs {
        let entry = kernel.frame_entry(ppn);
        assert!(!entry.available, "mapped frame on the free list");
        assert_eq!(entry.refcnt, count, "frame {} ref count", ppn);
        if count > 1 {
            // Shared frames must be read-only everywhere.
            for &pid in pids {
                for (_va, page) in kernel.mapped_pages(pid) {
                    if page.present && page.ppn == ppn {
                        assert!(page.cow && !page.writable, "shared frame writable");
                    }
                }
            }
        }
    }

    for (&idx, &count) in &slot_refs {
        let slot = kernel.swap_slot(idx);
        assert!(slot.used, "referenced swap slot is free");
        assert_eq!(slot.refcnt, count, "swap slot {} ref count", idx);
    }
}

#[test]
fn fork_shares_read_only_and_copies_on_write() {
    let (kernel, parent) = boot();

    let a = sbrk(&kernel, parent, 4096);
    kernel.user_write(parent, a, &[0xAA]).unwrap();

    let child = fork(&kernel, parent);
    check_memory_invariants(&kernel, &[parent, child]);

    // The child observes the parent's byte through the shared frame.
    let mut byte = [0u8; 1];
    kernel.user_read(child, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0xAA);

    let shared = kernel
        .with_vspace(parent, |vs| vs.page_at(a).unwrap())
        .unwrap();
    assert!(shared.cow && !shared.writable);
    assert_eq!(kernel.frame_entry(shared.ppn).refcnt, 2);

    // A parent write faults into a private copy; the child keeps the
    // old contents.
    kernel.user_write(parent, a, &[0xBB]).unwrap();
    kernel.user_read(child, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0xAA);
    kernel.user_read(parent, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0xBB);

    check_memory_invariants(&kernel, &[parent, child]);
}

#[test]
fn eviction_roundtrip_restores_contents() {
    // A machine small enough that allocations must evict.
    let (kernel, parent) = boot_with(image(), 10);

    let a = sbrk(&kernel, parent, 4096);
    kernel.user_write(parent, a, &[0x11]).unwrap();

    let child = fork(&kernel, parent);
    let b = sbrk(&kernel, child, 4096);
    // The child's heap page is CoW-shared; break it first, then write
    // the second value.
    kernel.user_write(child, b, &[0x22]).unwrap();

    // Allocate in the child until the parent's page lands in swap.
    let mut evicted = false;
    for _ in 0..32 {
        let page = kernel
            .with_vspace(parent, |vs| vs.page_at(a).unwrap())
            .unwrap();
        if page.swapped {
            evicted = true;
            break;
        }
        let va = sbrk(&kernel, child, 4096);
        kernel.user_write(child, va, &[0x33]).unwrap();
    }
    assert!(evicted, "the parent's page never reached swap");
    check_memory_invariants(&kernel, &[parent, child]);
    assert!(kernel.mem_stats().pages_in_swap > 0);

    // Touching the page faults it back in with its old contents.
    let mut byte = [0u8; 1];
    kernel.user_read(parent, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0x11);
    kernel.user_read(child, b, &mut byte).unwrap();
    assert_eq!(byte[0], 0x22);
    check_memory_invariants(&kernel, &[parent, child]);
}

#[test]
fn cow_pages_evict_and_return_shared() {
    let (kernel, parent) = boot_with(image(), 10);

    let a = sbrk(&kernel, parent, 4096);
    kernel.user_write(parent, a, &[0x77]).unwrap();
    let child = fork(&kernel, parent);

    // Force the shared frame out: its swap slot inherits both
    // references.
    let mut slot = None;
    for _ in 0..32 {
        let page = kernel
            .with_vspace(parent, |vs| vs.page_at(a).unwrap())
            .unwrap();
        if page.swapped {
            slot = Some(page.swap_index);
            break;
        }
        let va = sbrk(&kernel, child, 4096);
        kernel.user_write(child, va, &[0x33]).unwrap();
    }
    let slot = slot.expect("shared page never reached swap");
    assert_eq!(kernel.swap_slot(slot).refcnt, 2);
    let child_page = kernel
        .with_vspace(child, |vs| vs.page_at(a).unwrap())
        .unwrap();
    assert!(child_page.swapped && child_page.swap_index == slot);

    // One fault brings it back for both processes, still shared.
    let mut byte = [0u8; 1];
    kernel.user_read(parent, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0x77);
    let parent_page = kernel
        .with_vspace(parent, |vs| vs.page_at(a).unwrap())
        .unwrap();
    let child_page = kernel
        .with_vspace(child, |vs| vs.page_at(a).unwrap())
        .unwrap();
    assert!(parent_page.present && child_page.present);
    assert_eq!(parent_page.ppn, child_page.ppn);
    assert_eq!(kernel.frame_entry(parent_page.ppn).refcnt, 2);
    check_memory_invariants(&kernel, &[parent, child]);

    // The CoW semantics survived the round trip.
    kernel.user_write(child, a, &[0x78]).unwrap();
    kernel.user_read(parent, a, &mut byte).unwrap();
    assert_eq!(byte[0], 0x77);
    check_memory_invariants(&kernel, &[parent, child]);
}

#[test]
fn sbrk_maps_writable_pages() {
    let (kernel, pid) = boot();

    let old = sbrk(&kernel, pid, 4096);
    // sbrk(0) reports the new break without growing.
    assert_eq!(sbrk(&kernel, pid, 0), old + 4096);
    // No shrinking: a negative size reports the break unchanged.
    assert_eq!(sbrk(&kernel, pid, -4096), old + 4096);

    kernel.user_write(pid, old, b"heap").unwrap();
    let mut buf = [0u8; 4];
    kernel.user_read(pid, old, &mut buf).unwrap();
    assert_eq!(&buf, b"heap");
}

#[test]
fn stack_grows_on_write_fault_within_the_window() {
    let (kernel, parent) = boot();
    let child = fork(&kernel, parent);

    let low = kernel
        .with_vspace(child, |vs| {
            let stack = vs.region(xv64::RegionKind::Stack);
            stack.base - stack.size
        })
        .unwrap();

    // A write a few pages below the stack grows it down to that page.
    let target = low - 3 * 4096 + 16;
    kernel.user_write(child, target, &[0x5A]).unwrap();
    let mut byte = [0u8; 1];
    kernel.user_read(child, target, &mut byte).unwrap();
    assert_eq!(byte[0], 0x5A);

    let grown = kernel
        .with_vspace(child, |vs| vs.region(xv64::RegionKind::Stack).size)
        .unwrap();
    assert!(grown >= 4 * 4096);

    // Far below the growth window the fault is fatal.
    let way_out = low - 64 * 4096;
    assert!(kernel.user_write(child, way_out, &[1]).is_err());
    assert_eq!(kernel.proc_state(child), Some(xv64::Procstate::ZOMBIE));
}

#[test]
fn random_fork_write_sequences_keep_invariants() {
    let (kernel, root) = boot_with(image(), 24);
    let mut rng = StdRng::seed_from_u64(7);

    let base = sbrk(&kernel, root, 4 * 4096);
    kernel.user_write(root, base, &[1]).unwrap();

    let mut pids = vec![root];
    for round in 0..40 {
        let actor = pids[rng.gen_range(0..pids.len())];
        match rng.gen_range(0..3) {
            0 if pids.len() < 6 => {
                pids.push(fork(&kernel, actor));
            }
            1 => {
                let page = rng.gen_range(0..4);
                let va = base + page * 4096 + rng.gen_range(0..4096);
                kernel
                    .user_write(actor, va, &[round as u8])
                    .expect("store failed");
            }
            _ => {
                let page = rng.gen_range(0..4);
                let va = base + page * 4096 + rng.gen_range(0..4096);
                let mut byte = [0u8; 1];
                kernel.user_read(actor, va, &mut byte).expect("load failed");
            }
        }
        check_memory_invariants(&kernel, &pids);
    }
}
