//! Per-process address spaces.
//!
//! A vspace holds exactly four contiguous regions — code, data, heap
//! (growing up) and the user stack (growing down) — with one
//! `VPageInfo` per page. Exactly one of `present`/`swapped` is true
//! for any mapped page, and a `cow` page is never writable in the
//! hardware table. `invalidate` rebuilds the hardware page table from
//! the per-page metadata; `install` loads it into the MMU. Both must
//! run after any mapping change.

use alloc::vec::Vec;
use itertools::izip;
use num_iter::range_step;

use crate::arch::{pgrounddown, pgroundup, PageTable, Pte};
use crate::error::{KernelError, Result};
use crate::kalloc::Ppn;
use crate::kernel::Kernel;
use crate::param::{CODEBASE, PGSIZE, USERTOP};
use crate::proc::KernelCtx;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Code = 0,
    Data = 1,
    Heap = 2,
    Stack = 3,
}

pub const NREGION: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Per-page metadata of a virtual region.
#[derive(Copy, Clone, Default, Debug)]
pub struct VPageInfo {
    pub present: bool,
    pub writable: bool,
    pub cow: bool,
    pub swapped: bool,

    /// Physical frame, when present.
    pub ppn: Ppn,

    /// Swap slot, when swapped.
    pub swap_index: usize,
}

impl VPageInfo {
    fn mapped(&self) -> bool {
        self.present || self.swapped
    }
}

/// A contiguous range of user address space growing in a single
/// direction. `size` counts bytes handed to the process; page slots
/// cover the pages backing them.
pub struct Vregion {
    dir: Direction,
    pub base: usize,
    pub size: usize,
    pages: Vec<VPageInfo>,
}

impl Vregion {
    fn new(dir: Direction, base: usize) -> Self {
        Self {
            dir,
            base,
            size: 0,
            pages: Vec::new(),
        }
    }

    /// Page-slot index backing `va`, if the slot exists.
    fn page_index(&self, va: usize) -> Option<usize> {
        let idx = match self.dir {
            Direction::Up => {
                if va < self.base {
                    return None;
                }
                (va - self.base) / PGSIZE
            }
            Direction::Down => {
                if va >= self.base {
                    return None;
                }
                (self.base - 1 - va) / PGSIZE
            }
        };
        if idx < self.pages.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// Start address of page slot `idx`.
    fn page_va(&self, idx: usize) -> usize {
        match self.dir {
            Direction::Up => self.base + idx * PGSIZE,
            Direction::Down => self.base - (idx + 1) * PGSIZE,
        }
    }

    /// Whether `va` falls inside the byte extent handed to the process.
    pub fn contains(&self, va: usize) -> bool {
        match self.dir {
            Direction::Up => va >= self.base && va < self.base + self.size,
            Direction::Down => va < self.base && va >= self.base - self.size,
        }
    }

    /// Lowest mapped address (stack) or first unmapped address (heap).
    pub fn end(&self) -> usize {
        match self.dir {
            Direction::Up => self.base + self.size,
            Direction::Down => self.base - self.size,
        }
    }
}

pub struct Vspace {
    pub regions: [Vregion; NREGION],
    pagetable: PageTable,
}

impl Vspace {
    pub fn new() -> Self {
        Self {
            regions: [
                Vregion::new(Direction::Up, CODEBASE),
                Vregion::new(Direction::Up, CODEBASE),
                Vregion::new(Direction::Up, CODEBASE),
                Vregion::new(Direction::Down, USERTOP),
            ],
            pagetable: PageTable::empty(),
        }
    }

    pub fn region(&self, kind: RegionKind) -> &Vregion {
        &self.regions[kind as usize]
    }

    pub fn region_mut(&mut self, kind: RegionKind) -> &mut Vregion {
        &mut self.regions[kind as usize]
    }

    /// The region whose page slots back `va`.
    pub fn va2region(&self, va: usize) -> Option<RegionKind> {
        const KINDS: [RegionKind; NREGION] = [
            RegionKind::Code,
            RegionKind::Data,
            RegionKind::Heap,
            RegionKind::Stack,
        ];
        KINDS
            .iter()
            .copied()
            .find(|kind| self.region(*kind).page_index(va).is_some())
    }

    /// Snapshot of the page metadata backing `va`.
    pub fn page_at(&self, va: usize) -> Option<VPageInfo> {
        let kind = self.va2region(va)?;
        let region = self.region(kind);
        let idx = region.page_index(va)?;
        Some(region.pages[idx])
    }

    fn page_at_mut(&mut self, va: usize) -> Option<&mut VPageInfo> {
        let kind = self.va2region(va)?;
        let region = self.region_mut(kind);
        let idx = region.page_index(va)?;
        Some(&mut region.pages[idx])
    }

    /// Allocates frames and installs mappings for `size` bytes starting
    /// at `base`. Returns the number of bytes mapped; a short return is
    /// failure. Pages already mapped are left alone. Callers must have
    /// reserved enough free frames (`ensure_free_pages`) beforehand:
    /// an eviction triggered here would revisit this very address
    /// space.
    pub fn add_map(
        &mut self,
        kind: RegionKind,
        base: usize,
        size: usize,
        writable: bool,
        ctx: &KernelCtx<'_>,
    ) -> Result<usize> {
        if size == 0 {
            return Ok(0);
        }
        let kernel = ctx.kernel();
        let region = self.region_mut(kind);
        let first = pgrounddown(base);
        let last = pgroundup(base + size);

        for va in range_step(first, last, PGSIZE) {
            // Extend the page-slot vector to cover this page.
            let idx = match region.dir {
                Direction::Up => {
                    if va < region.base {
                        return Err(KernelError::BadAddress);
                    }
                    (va - region.base) / PGSIZE
                }
                Direction::Down => {
                    if va >= region.base {
                        return Err(KernelError::BadAddress);
                    }
                    (region.base - 1 - va) / PGSIZE
                }
            };
            if idx >= region.pages.len() {
                region.pages.resize(idx + 1, VPageInfo::default());
            }
            if region.pages[idx].mapped() {
                continue;
            }
            let ppn = kernel.kalloc(ctx)?;
            kernel.frames().fill(ppn, 0);
            kernel.mark_user(ppn, va);
            region.pages[idx] = VPageInfo {
                present: true,
                writable,
                cow: false,
                swapped: false,
                ppn,
                swap_index: 0,
            };
        }
        Ok(size)
    }

    /// Copy-on-write clone for fork. Every present page of `src` is
    /// shared into `self` read-only with `cow` set, and the source
    /// mapping is downgraded the same way; swapped pages are copied by
    /// reference with the slot's count bumped. Both page tables are
    /// rebuilt.
    pub fn copy_cow(&mut self, src: &mut Vspace, kernel: &Kernel) {
        for (dst_r, src_r) in izip!(self.regions.iter_mut(), src.regions.iter_mut()) {
            dst_r.base = src_r.base;
            dst_r.size = src_r.size;
            for page in src_r.pages.iter_mut() {
                if page.present {
                    kernel.dup_page(page.ppn);
                    page.writable = false;
                    page.cow = true;
                } else if page.swapped {
                    kernel.swap_ref_inc(page.swap_index);
                }
            }
            // The clone carries the same downgraded mappings.
            dst_r.pages.clear();
            dst_r.pages.extend_from_slice(&src_r.pages);
        }
        self.invalidate();
        src.invalidate();
    }

    /// Retargets every page backed by frame `ppn` to swap slot
    /// `swap_index`. Returns how many mappings changed.
    pub fn mark_swapped(&mut self, ppn: Ppn, swap_index: usize, _va: usize) -> usize {
        let mut count = 0;
        for region in self.regions.iter_mut() {
            for page in region.pages.iter_mut() {
                if page.present && page.ppn == ppn {
                    page.present = false;
                    page.swapped = true;
                    page.swap_index = swap_index;
                    page.ppn = 0;
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.invalidate();
        }
        count
    }

    /// Re-points every page referencing swap slot `swap_index` at the
    /// freshly materialized frame `ppn`. Returns how many mappings
    /// changed.
    pub fn update_cow_refs(&mut self, ppn: Ppn, swap_index: usize, _va: usize) -> usize {
        let mut count = 0;
        for region in self.regions.iter_mut() {
            for page in region.pages.iter_mut() {
                if page.swapped && page.swap_index == swap_index {
                    page.swapped = false;
                    page.present = true;
                    page.ppn = ppn;
                    page.swap_index = 0;
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.invalidate();
        }
        count
    }

    /// Rebuilds the hardware page table from the per-page metadata.
    pub fn invalidate(&mut self) {
        self.pagetable.clear();
        for region in self.regions.iter() {
            for (idx, page) in region.pages.iter().enumerate() {
                if page.present {
                    self.pagetable.map(region.page_va(idx), Pte {
                        ppn: page.ppn,
                        writable: page.writable && !page.cow,
                        user: true,
                    });
                }
            }
        }
    }

    pub fn pagetable(&self) -> &PageTable {
        &self.pagetable
    }

    /// Releases every frame and swap slot and empties the regions.
    pub fn free(&mut self, kernel: &Kernel) {
        for region in self.regions.iter_mut() {
            for page in region.pages.iter() {
                if page.present {
                    kernel.kfree(page.ppn);
                } else if page.swapped {
                    kernel.swap_free(page.swap_index);
                }
            }
            region.pages.clear();
            region.size = 0;
        }
        self.pagetable.clear();
    }

    /// Writes bytes through the region mappings regardless of
    /// write protection. Loader-only: used by exec to fill freshly
    /// allocated pages before the vspace is installed.
    pub fn write_bytes(&self, kernel: &Kernel, va: usize, bytes: &[u8]) -> Result<()> {
        let mut off = 0;
        while off < bytes.len() {
            let a = va + off;
            let info = self.page_at(a).ok_or(KernelError::BadAddress)?;
            if !info.present {
                return Err(KernelError::BadAddress);
            }
            let boff = a % PGSIZE;
            let m = core::cmp::min(bytes.len() - off, PGSIZE - boff);
            kernel.frames().write(info.ppn, boff, &bytes[off..off + m]);
            off += m;
        }
        Ok(())
    }

    /// Every mapped page with its starting address, for invariant
    /// checks in tests.
    pub fn mapped_pages(&self) -> Vec<(usize, VPageInfo)> {
        let mut out = Vec::new();
        for region in self.regions.iter() {
            for (idx, page) in region.pages.iter().enumerate() {
                if page.mapped() {
                    out.push((region.page_va(idx), *page));
                }
            }
        }
        out
    }
}

impl Kernel {
    /// Resolves `va` for a kernel-mode read on behalf of the current
    /// process: swapped pages are brought in first.
    fn resolve_read(&self, va: usize, ctx: &KernelCtx<'_>) -> Result<Ppn> {
        loop {
            let info = ctx
                .proc()
                .vspace
                .borrow()
                .page_at(va)
                .ok_or(KernelError::BadAddress)?;
            if info.swapped {
                self.swappage_in(info.swap_index, ctx)?;
                self.reinstall_current(ctx);
                continue;
            }
            if !info.present {
                return Err(KernelError::BadAddress);
            }
            return Ok(info.ppn);
        }
    }

    /// Resolves `va` for a kernel-mode write on behalf of the current
    /// process, applying the same page-fault rules a user store would:
    /// swapped pages are brought in and CoW pages get a private copy,
    /// so a syscall writing through a shared mapping can never corrupt
    /// a sibling's frame.
    fn resolve_write(&self, va: usize, ctx: &KernelCtx<'_>) -> Result<Ppn> {
        loop {
            let info = ctx
                .proc()
                .vspace
                .borrow()
                .page_at(va)
                .ok_or(KernelError::BadAddress)?;
            if info.swapped {
                self.swappage_in(info.swap_index, ctx)?;
                self.reinstall_current(ctx);
                continue;
            }
            if !info.present {
                return Err(KernelError::BadAddress);
            }
            if info.cow {
                self.cow_break(va, ctx)?;
                continue;
            }
            if !info.writable {
                return Err(KernelError::BadAddress);
            }
            return Ok(info.ppn);
        }
    }

    /// Resolves a write fault on a CoW page: private copy (or flip of a
    /// sole mapping) and page-table rebuild.
    pub(crate) fn cow_break(&self, va: usize, ctx: &KernelCtx<'_>) -> Result<()> {
        let info = ctx
            .proc()
            .vspace
            .borrow()
            .page_at(va)
            .ok_or(KernelError::BadAddress)?;
        if !info.present || !info.cow {
            return Err(KernelError::BadAddress);
        }
        let new = self.ppage_copy(info.ppn, ctx)?;
        let mut vspace = ctx.proc().vspace.borrow_mut();
        if let Some(page) = vspace.page_at_mut(va) {
            if page.present && page.cow {
                if new != page.ppn {
                    page.ppn = new;
                    self.mark_user(new, pgrounddown(va));
                }
                page.writable = true;
                page.cow = false;
            }
            vspace.invalidate();
        }
        drop(vspace);
        self.reinstall_current(ctx);
        Ok(())
    }

    /// Copies kernel bytes into the current process's memory.
    pub(crate) fn copy_out(&self, va: usize, src: &[u8], ctx: &KernelCtx<'_>) -> Result<()> {
        let mut off = 0;
        while off < src.len() {
            let a = va + off;
            let ppn = self.resolve_write(a, ctx)?;
            let boff = a % PGSIZE;
            let m = core::cmp::min(src.len() - off, PGSIZE - boff);
            self.frames().write(ppn, boff, &src[off..off + m]);
            off += m;
        }
        Ok(())
    }

    /// Copies bytes from the current process's memory into the kernel.
    pub(crate) fn copy_in(&self, dst: &mut [u8], va: usize, ctx: &KernelCtx<'_>) -> Result<()> {
        let mut off = 0;
        while off < dst.len() {
            let a = va + off;
            let ppn = self.resolve_read(a, ctx)?;
            let boff = a % PGSIZE;
            let m = core::cmp::min(dst.len() - off, PGSIZE - boff);
            self.frames().read(ppn, boff, &mut dst[off..off + m]);
            off += m;
        }
        Ok(())
    }

    /// Copies a NUL-terminated string from user memory, excluding the
    /// terminator. Fails if no NUL appears within `max` bytes.
    pub(crate) fn copy_in_str(
        &self,
        va: usize,
        max: usize,
        ctx: &KernelCtx<'_>,
    ) -> Result<alloc::vec::Vec<u8>> {
        let mut out = alloc::vec::Vec::new();
        for off in 0..max {
            let mut byte = [0u8; 1];
            self.copy_in(&mut byte, va + off, ctx)?;
            if byte[0] == 0 {
                return Ok(out);
            }
            out.push(byte[0]);
        }
        Err(KernelError::BadAddress)
    }

    /// Reloads the current process's translation after a mapping
    /// change, the way the fault return path would.
    pub(crate) fn reinstall_current(&self, ctx: &KernelCtx<'_>) {
        if self.cpu().current() == Some(ctx.slot()) {
            self.cpu()
                .install(ctx.proc().vspace.borrow().pagetable().clone());
        }
    }
}
