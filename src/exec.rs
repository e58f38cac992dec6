//! exec: replace the current image with a program from the file
//! system.
//!
//! Programs are flat code images (loader formats are out of scope):
//! the file's bytes land at the code base, which is also the entry
//! point. The new user stack sits at the top of the 2 GiB user region,
//! laid out top-down as the argv strings, the argv pointer array, then
//! the return-address slot where `rsp` points; `rdi` carries argc and
//! `rsi` the array address.

use alloc::vec;
use alloc::vec::Vec;

use crate::arch::{pgroundup, TrapFrame};
use crate::error::{KernelError, Result};
use crate::fs::{IType, Path};
use crate::param::{CODEBASE, PGSIZE, USERTOP};
use crate::proc::KernelCtx;
use crate::vm::{RegionKind, Vspace};

pub fn exec(path: &Path, argv: &[Vec<u8>], ctx: &KernelCtx<'_>) -> Result<usize> {
    let kernel = ctx.kernel();

    // Pull the whole image into kernel memory.
    let ip = kernel.fs().namei(path, ctx)?;
    let code: Result<Vec<u8>> = (|| {
        let mut guard = kernel.fs().itable().lock(&ip, ctx)?;
        if guard.typ != IType::File {
            return Err(KernelError::InvalidArgument);
        }
        let size = guard.size as usize;
        let mut code = vec![0u8; size];
        let n = guard.readi(&mut code, 0, ctx)?;
        assert_eq!(n, size, "exec: short code read");
        Ok(code)
    })();
    kernel.fs().itable().irelease(ip);
    let code = code?;

    // Stack bytes the argument vector needs: strings, pointer array,
    // return slot, plus alignment slack.
    let argc = argv.len();
    let strings: usize = argv.iter().map(|a| a.len() + 1).sum();
    let argbytes = strings + 8 * argc + 8 + 8;
    let stack_pages = core::cmp::max(1, pgroundup(argbytes) / PGSIZE);
    let code_pages = pgroundup(code.len()) / PGSIZE;

    // Reserve every frame up front so nothing below can evict (the
    // fresh vspace is invisible to the evictor's sweep).
    kernel.ensure_free_pages(code_pages + stack_pages, ctx)?;

    let mut vs = Vspace::new();
    let built: Result<(usize, usize)> = (|| {
        // Code, read-only, loaded through the frame-level writer.
        vs.region_mut(RegionKind::Code).base = CODEBASE;
        vs.add_map(RegionKind::Code, CODEBASE, code.len(), false, ctx)?;
        vs.region_mut(RegionKind::Code).size = code.len();
        vs.write_bytes(kernel, CODEBASE, &code)?;

        // Data and heap sit above the code; both start empty.
        let data_base = pgroundup(CODEBASE + code.len());
        vs.region_mut(RegionKind::Data).base = data_base;
        vs.region_mut(RegionKind::Heap).base = data_base;

        // Stack.
        let low = USERTOP - stack_pages * PGSIZE;
        vs.add_map(RegionKind::Stack, low, stack_pages * PGSIZE, true, ctx)?;
        vs.region_mut(RegionKind::Stack).size = stack_pages * PGSIZE;

        // Argv strings at the very top.
        let mut sp = USERTOP;
        let mut addrs = Vec::with_capacity(argc);
        for arg in argv {
            sp -= arg.len() + 1;
            vs.write_bytes(kernel, sp, arg)?;
            vs.write_bytes(kernel, sp + arg.len(), &[0])?;
            addrs.push(sp as u64);
        }

        // The pointer array below the strings, 8-aligned.
        sp &= !7;
        sp -= 8 * argc;
        let argv_base = sp;
        for (i, addr) in addrs.iter().enumerate() {
            vs.write_bytes(kernel, argv_base + 8 * i, &addr.to_le_bytes())?;
        }

        // Room for a return address.
        sp -= 8;

        vs.invalidate();
        Ok((sp, argv_base))
    })();
    let (sp, argv_base) = match built {
        Ok(v) => v,
        Err(e) => {
            vs.free(kernel);
            return Err(e);
        }
    };

    // Commit: swap the address spaces and free the old one.
    let mut old = {
        let mut cell = ctx.proc().vspace.borrow_mut();
        core::mem::replace(&mut *cell, vs)
    };
    old.free(kernel);
    kernel.reinstall_current(ctx);

    let mut data = ctx.data_mut();
    if let Some(name) = path.final_name() {
        data.set_name(name.as_bytes());
    }
    let tf = &mut data.tf;
    *tf = TrapFrame {
        rip: CODEBASE as u64,
        rsp: sp as u64,
        rdi: argc as u64,
        rsi: argv_base as u64,
        ..TrapFrame::default()
    };
    Ok(0)
}
