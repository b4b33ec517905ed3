use iced_x86::code_asm::*;

use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::fastmem::PendingFastmemSite;
use crate::backend::x64::hostloc::{HOST_RAX, HOST_RCX};
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::ir::block::Block;
use crate::ir::value::Index;

/// Arena offsets of the out-of-line memory fallback thunks, one per
/// access width. Generated once after the dispatcher prelude; both the
/// page-table miss path and demoted fastmem sites call into them.
///
/// Thunk ABI: vaddr in RAX (and the store value in RCX for writes);
/// result in RAX. Every other caller-saved register is preserved.
#[derive(Debug, Clone, Copy)]
pub struct MemoryThunks {
    pub read: [usize; 4],
    pub write: [usize; 4],
}

fn width_index(bitsize: usize) -> usize {
    match bitsize {
        8 => 0,
        16 => 1,
        32 => 2,
        _ => 3,
    }
}

fn read_callback<'a>(
    ctx: &'a EmitContext,
    bitsize: usize,
) -> &'a dyn crate::backend::x64::callback::Callback {
    let cb = &ctx.config.callbacks;
    match bitsize {
        8 => &*cb.memory_read_8,
        16 => &*cb.memory_read_16,
        32 => &*cb.memory_read_32,
        _ => &*cb.memory_read_64,
    }
}

fn write_callback<'a>(
    ctx: &'a EmitContext,
    bitsize: usize,
) -> &'a dyn crate::backend::x64::callback::Callback {
    let cb = &ctx.config.callbacks;
    match bitsize {
        8 => &*cb.memory_write_8,
        16 => &*cb.memory_write_16,
        32 => &*cb.memory_write_32,
        _ => &*cb.memory_write_64,
    }
}

// ---------------------------------------------------------------------------
// Plain reads and writes
// ---------------------------------------------------------------------------

pub fn emit_read(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
) {
    if let (Some(fastmem), Some(thunks)) = (&ctx.config.fastmem, ctx.memory_thunks) {
        if !(ctx.do_not_fastmem)(ctx.location, inst.0) {
            emit_fastmem_read(ctx, ra, block, inst, bitsize, vaddr_is_64, fastmem.base, thunks);
            return;
        }
    }
    if let (Some(table), Some(thunks)) = (ctx.config.page_table, ctx.memory_thunks) {
        emit_page_table_read(ctx, ra, block, inst, bitsize, vaddr_is_64, table, thunks);
        return;
    }

    let mut args = ra.get_argument_info(block.get(inst).args());
    ra.host_call(Some(inst), &mut [Some(&mut args[0])]);
    read_callback(ctx, bitsize).emit_call_simple(ra.asm).expect("asm");
}

pub fn emit_write(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
) {
    if let (Some(fastmem), Some(thunks)) = (&ctx.config.fastmem, ctx.memory_thunks) {
        if !(ctx.do_not_fastmem)(ctx.location, inst.0) {
            emit_fastmem_write(ctx, ra, block, inst, bitsize, vaddr_is_64, fastmem.base, thunks);
            return;
        }
    }
    if let (Some(table), Some(thunks)) = (ctx.config.page_table, ctx.memory_thunks) {
        emit_page_table_write(ctx, ra, block, inst, bitsize, vaddr_is_64, table, thunks);
        return;
    }

    let mut args = ra.get_argument_info(block.get(inst).args());
    let (vaddr, rest) = args.split_at_mut(1);
    ra.host_call(None, &mut [Some(&mut vaddr[0]), Some(&mut rest[0])]);
    write_callback(ctx, bitsize).emit_call_simple(ra.asm).expect("asm");
}

// ---------------------------------------------------------------------------
// Fastmem
// ---------------------------------------------------------------------------

fn normalized_vaddr(
    ra: &mut RegAlloc,
    arg: &mut crate::backend::x64::reg_alloc::Argument,
    vaddr_is_64: bool,
) -> crate::backend::x64::hostloc::HostLoc {
    let vaddr = ra.use_scratch_gpr(arg);
    if !vaddr_is_64 {
        // A32 addresses are 32-bit; clear stale upper bits.
        ra.asm.mov(vaddr.r32(), vaddr.r32()).expect("asm");
    }
    vaddr
}

fn emit_fastmem_read(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
    fastmem_base: u64,
    thunks: MemoryThunks,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let vaddr = normalized_vaddr(ra, &mut args[0], vaddr_is_64);
    let result = ra.scratch_gpr_at(HOST_RAX);
    let base = ra.scratch_gpr();
    ra.asm.mov(base.r64(), fastmem_base).expect("asm");

    let mut site = ra.asm.create_label();
    let mut site_end = ra.asm.create_label();
    let mut fallback = ra.asm.create_label();
    let mut cont = ra.asm.create_label();

    ra.asm.set_label(&mut site).expect("asm");
    match bitsize {
        8 => ra.asm.movzx(result.r32(), byte_ptr(base.r64() + vaddr.r64())).expect("asm"),
        16 => ra.asm.movzx(result.r32(), word_ptr(base.r64() + vaddr.r64())).expect("asm"),
        32 => ra.asm.mov(result.r32(), dword_ptr(base.r64() + vaddr.r64())).expect("asm"),
        _ => ra.asm.mov(result.r64(), qword_ptr(base.r64() + vaddr.r64())).expect("asm"),
    }
    // Guarantee the patch site is at least jmp-rel32 sized.
    ra.asm.nop().expect("asm");
    ra.asm.nop().expect("asm");
    ra.asm.nop().expect("asm");
    ra.asm.set_label(&mut site_end).expect("asm");
    ra.asm.jmp(cont).expect("asm");

    ra.asm.set_label(&mut fallback).expect("asm");
    ra.asm.mov(rax, vaddr.r64()).expect("asm");
    let thunk = ctx.dispatcher_address(thunks.read[width_index(bitsize)]);
    ra.asm.call(thunk).expect("asm");
    ra.asm.set_label(&mut cont).expect("asm");
    ra.asm.nop().expect("asm");

    ctx.pending_fastmem.borrow_mut().push(PendingFastmemSite {
        site,
        site_end,
        fallback,
        location: ctx.location,
        inst_offset: inst.0,
    });

    ra.release(base);
    ra.define_value(inst, result);
}

fn emit_fastmem_write(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
    fastmem_base: u64,
    thunks: MemoryThunks,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let vaddr = normalized_vaddr(ra, &mut args[0], vaddr_is_64);
    // The fallback thunk takes the value in RCX.
    let value = ra.use_gpr_at(&mut args[1], HOST_RCX);
    let rax_guard = ra.scratch_gpr_at(HOST_RAX);
    let base = ra.scratch_gpr();
    ra.asm.mov(base.r64(), fastmem_base).expect("asm");

    let mut site = ra.asm.create_label();
    let mut site_end = ra.asm.create_label();
    let mut fallback = ra.asm.create_label();
    let mut cont = ra.asm.create_label();

    ra.asm.set_label(&mut site).expect("asm");
    match bitsize {
        8 => ra.asm.mov(byte_ptr(base.r64() + vaddr.r64()), value.r8()).expect("asm"),
        16 => ra.asm.mov(word_ptr(base.r64() + vaddr.r64()), value.r16()).expect("asm"),
        32 => ra.asm.mov(dword_ptr(base.r64() + vaddr.r64()), value.r32()).expect("asm"),
        _ => ra.asm.mov(qword_ptr(base.r64() + vaddr.r64()), value.r64()).expect("asm"),
    }
    ra.asm.nop().expect("asm");
    ra.asm.nop().expect("asm");
    ra.asm.nop().expect("asm");
    ra.asm.set_label(&mut site_end).expect("asm");
    ra.asm.jmp(cont).expect("asm");

    ra.asm.set_label(&mut fallback).expect("asm");
    ra.asm.mov(rax, vaddr.r64()).expect("asm");
    let thunk = ctx.dispatcher_address(thunks.write[width_index(bitsize)]);
    ra.asm.call(thunk).expect("asm");
    ra.asm.set_label(&mut cont).expect("asm");
    ra.asm.nop().expect("asm");

    ctx.pending_fastmem.borrow_mut().push(PendingFastmemSite {
        site,
        site_end,
        fallback,
        location: ctx.location,
        inst_offset: inst.0,
    });

    ra.release(base);
    ra.release(rax_guard);
}

// ---------------------------------------------------------------------------
// Inline page-table walk
// ---------------------------------------------------------------------------

fn emit_page_table_read(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
    table: u64,
    thunks: MemoryThunks,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let vaddr = normalized_vaddr(ra, &mut args[0], vaddr_is_64);
    let result = ra.scratch_gpr_at(HOST_RAX);
    let page = ra.scratch_gpr();
    let index = ra.scratch_gpr();

    let mut fallback = ra.asm.create_label();
    let mut cont = ra.asm.create_label();

    ra.asm.mov(index.r64(), vaddr.r64()).expect("asm");
    ra.asm.shr(index.r64(), 12).expect("asm");
    ra.asm.mov(page.r64(), table).expect("asm");
    ra.asm.mov(page.r64(), qword_ptr(page.r64() + index.r64() * 8)).expect("asm");
    ra.asm.test(page.r64(), page.r64()).expect("asm");
    ra.asm.je(fallback).expect("asm");

    ra.asm.mov(index.r64(), vaddr.r64()).expect("asm");
    ra.asm.and(index.r32(), 0xFFF).expect("asm");
    match bitsize {
        8 => ra.asm.movzx(result.r32(), byte_ptr(page.r64() + index.r64())).expect("asm"),
        16 => ra.asm.movzx(result.r32(), word_ptr(page.r64() + index.r64())).expect("asm"),
        32 => ra.asm.mov(result.r32(), dword_ptr(page.r64() + index.r64())).expect("asm"),
        _ => ra.asm.mov(result.r64(), qword_ptr(page.r64() + index.r64())).expect("asm"),
    }
    ra.asm.jmp(cont).expect("asm");

    ra.asm.set_label(&mut fallback).expect("asm");
    ra.asm.mov(rax, vaddr.r64()).expect("asm");
    let thunk = ctx.dispatcher_address(thunks.read[width_index(bitsize)]);
    ra.asm.call(thunk).expect("asm");
    ra.asm.set_label(&mut cont).expect("asm");
    ra.asm.nop().expect("asm");

    ra.release(page);
    ra.release(index);
    ra.define_value(inst, result);
}

fn emit_page_table_write(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
    vaddr_is_64: bool,
    table: u64,
    thunks: MemoryThunks,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let vaddr = normalized_vaddr(ra, &mut args[0], vaddr_is_64);
    let value = ra.use_gpr_at(&mut args[1], HOST_RCX);
    let rax_guard = ra.scratch_gpr_at(HOST_RAX);
    let page = ra.scratch_gpr();
    let index = ra.scratch_gpr();

    let mut fallback = ra.asm.create_label();
    let mut cont = ra.asm.create_label();

    ra.asm.mov(index.r64(), vaddr.r64()).expect("asm");
    ra.asm.shr(index.r64(), 12).expect("asm");
    ra.asm.mov(page.r64(), table).expect("asm");
    ra.asm.mov(page.r64(), qword_ptr(page.r64() + index.r64() * 8)).expect("asm");
    ra.asm.test(page.r64(), page.r64()).expect("asm");
    ra.asm.je(fallback).expect("asm");

    ra.asm.mov(index.r64(), vaddr.r64()).expect("asm");
    ra.asm.and(index.r32(), 0xFFF).expect("asm");
    match bitsize {
        8 => ra.asm.mov(byte_ptr(page.r64() + index.r64()), value.r8()).expect("asm"),
        16 => ra.asm.mov(word_ptr(page.r64() + index.r64()), value.r16()).expect("asm"),
        32 => ra.asm.mov(dword_ptr(page.r64() + index.r64()), value.r32()).expect("asm"),
        _ => ra.asm.mov(qword_ptr(page.r64() + index.r64()), value.r64()).expect("asm"),
    }
    ra.asm.jmp(cont).expect("asm");

    ra.asm.set_label(&mut fallback).expect("asm");
    ra.asm.mov(rax, vaddr.r64()).expect("asm");
    let thunk = ctx.dispatcher_address(thunks.write[width_index(bitsize)]);
    ra.asm.call(thunk).expect("asm");
    ra.asm.set_label(&mut cont).expect("asm");
    ra.asm.nop().expect("asm");

    ra.release(page);
    ra.release(index);
    ra.release(rax_guard);
}

// ---------------------------------------------------------------------------
// Exclusive access (always via the monitor-aware callbacks)
// ---------------------------------------------------------------------------

pub fn emit_exclusive_read(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    ra.host_call(Some(inst), &mut [Some(&mut args[0])]);
    let cb = &ctx.config.callbacks;
    let callback = match bitsize {
        8 => &*cb.exclusive_read_8,
        16 => &*cb.exclusive_read_16,
        32 => &*cb.exclusive_read_32,
        _ => &*cb.exclusive_read_64,
    };
    callback.emit_call_simple(ra.asm).expect("asm");
}

pub fn emit_exclusive_write(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    bitsize: usize,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let (vaddr, rest) = args.split_at_mut(1);
    ra.host_call(Some(inst), &mut [Some(&mut vaddr[0]), Some(&mut rest[0])]);
    let cb = &ctx.config.callbacks;
    let callback = match bitsize {
        8 => &*cb.exclusive_write_8,
        16 => &*cb.exclusive_write_16,
        32 => &*cb.exclusive_write_32,
        _ => &*cb.exclusive_write_64,
    };
    callback.emit_call_simple(ra.asm).expect("asm");
}

pub fn emit_clear_exclusive(ctx: &EmitContext, ra: &mut RegAlloc) {
    ra.host_call(None, &mut []);
    ctx.config.callbacks.exclusive_clear.emit_call_simple(ra.asm).expect("asm");
}

// ---------------------------------------------------------------------------
// Barriers
// ---------------------------------------------------------------------------

pub fn emit_data_memory_barrier(ra: &mut RegAlloc) {
    ra.asm.mfence().expect("asm");
}

pub fn emit_data_synchronization_barrier(ra: &mut RegAlloc) {
    ra.asm.mfence().expect("asm");
}

pub fn emit_instruction_synchronization_barrier(_ra: &mut RegAlloc) {
    // Nothing to emit: the pipeline refetch is handled by ending the block.
}
