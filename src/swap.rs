//! Swap manager: fixed disk slots of 8 consecutive blocks, one page
//! each, in the region starting at `swapstart`.
//!
//! Slot ref counts mirror the core map so CoW pages that were evicted
//! can later fault in and share a single replacement frame. A slot is
//! allocated on eviction and freed when its count reaches zero on
//! swap-in or process teardown.

use alloc::vec::Vec;

use crate::error::Result;
use crate::kalloc::Ppn;
use crate::kernel::Kernel;
use crate::param::{BLKS_PER_PAGE, BSIZE};
use crate::proc::KernelCtx;

#[derive(Clone, Copy)]
pub struct SwapSlot {
    pub used: bool,

    /// How many virtual pages reference the slot.
    pub refcnt: u32,

    /// The user virtual address the eviction captured.
    pub va: usize,
}

/// One entry per swap page; guarded by the allocator spinlock along
/// with the core map it mirrors.
pub struct SwapMap {
    slots: Vec<SwapSlot>,
}

impl SwapMap {
    pub fn new(n: usize) -> Self {
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push(SwapSlot {
                used: false,
                refcnt: 0,
                va: 0,
            });
        }
        Self { slots }
    }

    /// Linearly scans for a free slot and claims it.
    pub fn alloc(&mut self, refcnt: u32, va: usize) -> Option<usize> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.used {
                *slot = SwapSlot {
                    used: true,
                    refcnt,
                    va,
                };
                return Some(idx);
            }
        }
        None
    }

    pub fn slot(&self, idx: usize) -> &SwapSlot {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut SwapSlot {
        &mut self.slots[idx]
    }
}

impl Kernel {
    /// Transfers one page from frame `ppn` into swap slot `idx`,
    /// through the block cache.
    pub(crate) fn swap_write(&self, idx: usize, ppn: Ppn, ctx: &KernelCtx<'_>) -> Result<()> {
        let start = self.fs().superblock().swapstart + (idx * BLKS_PER_PAGE) as u32;
        let mut chunk = [0u8; BSIZE];
        for i in 0..BLKS_PER_PAGE {
            self.frames().read(ppn, i * BSIZE, &mut chunk);
            let mut buf = self.bcache().bread(self.fs().dev(), start + i as u32, ctx)?;
            buf.data_mut().copy_from_slice(&chunk);
            buf.bwrite(self);
        }
        Ok(())
    }

    /// Transfers swap slot `idx` into frame `ppn`, through the block
    /// cache.
    pub(crate) fn swap_read(&self, idx: usize, ppn: Ppn, ctx: &KernelCtx<'_>) -> Result<()> {
        let start = self.fs().superblock().swapstart + (idx * BLKS_PER_PAGE) as u32;
        for i in 0..BLKS_PER_PAGE {
            let buf = self.bcache().bread(self.fs().dev(), start + i as u32, ctx)?;
            self.frames().write(ppn, i * BSIZE, &buf.data()[..]);
        }
        Ok(())
    }

    /// Adds one reference to a used swap slot.
    pub(crate) fn swap_ref_inc(&self, idx: usize) {
        let mut kmem = self.kmem().lock();
        let slot = kmem.swap.slot_mut(idx);
        assert!(slot.used && slot.refcnt > 0, "swap_ref_inc");
        slot.refcnt += 1;
    }

    /// Drops one reference to a used swap slot, freeing it at zero.
    pub(crate) fn swap_free(&self, idx: usize) {
        let mut guard = self.kmem().lock();
        let kmem = &mut *guard;
        let slot = kmem.swap.slot_mut(idx);
        assert!(slot.used && slot.refcnt > 0, "swap_free");
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            slot.used = false;
            kmem.pages_in_swap -= 1;
        }
    }

    /// Materializes swap slot `idx` in a fresh frame, retargeting every
    /// address space that referenced the slot (CoW pages that were
    /// evicted together come back sharing the one frame). The slot is
    /// released.
    pub(crate) fn swappage_in(&self, idx: usize, ctx: &KernelCtx<'_>) -> Result<Ppn> {
        let ppn = self.kalloc(ctx)?;

        let (refs, va) = {
            let mut guard = self.kmem().lock();
            let kmem = &mut *guard;
            let slot = *kmem.swap.slot(idx);
            assert!(slot.used && slot.refcnt > 0 && slot.va != 0, "swappage_in");
            let e = &mut kmem.core_map[ppn];
            e.user = true;
            e.refcnt = slot.refcnt;
            e.va = slot.va;
            let s = kmem.swap.slot_mut(idx);
            s.used = false;
            s.refcnt = 0;
            kmem.pages_in_swap -= 1;
            (slot.refcnt, slot.va)
        };
        log::debug!("swap in: slot {} -> frame {} (va {:#x})", idx, ppn, va);

        self.swap_read(idx, ppn, ctx)?;
        let count = self.procs().update_cow_refs(self, ppn, idx, va);
        debug_assert_eq!(count as u32, refs, "swappage_in: mapping count");
        Ok(ppn)
    }

    /// Swap-slot snapshot, for invariant checks in tests.
    pub fn swap_slot(&self, idx: usize) -> SwapSlot {
        *self.kmem().lock().swap.slot(idx)
    }
}
