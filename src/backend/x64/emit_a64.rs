//! Emission of the A64 guest-context opcodes.

use iced_x86::code_asm::*;

use crate::backend::x64::emit_a32::{emit_from_host_format, emit_to_host_format};
use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::hostloc::HOST_RAX;
use crate::backend::x64::jit_state::A64JitState;
use crate::backend::x64::nzcv;
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::ir::block::Block;
use crate::ir::value::Index;

fn reg_offset(block: &Block, inst: Index) -> i32 {
    A64JitState::reg_offset(block.get(inst).arg(0).a64_reg().number()) as i32
}

fn vec_offset(block: &Block, inst: Index) -> i32 {
    A64JitState::vec_offset(block.get(inst).arg(0).a64_vec().number()) as i32
}

pub fn emit_get_w(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst);
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_get_x(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst);
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r64(), qword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_w(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst);
    let mut args = ra.get_argument_info(block.get(inst).args());
    // Writes of W registers zero-extend into the X register.
    if args[1].is_immediate() {
        let imm = args[1].imm_u32() as u64;
        args[1].mark_allocated();
        if imm <= i32::MAX as u64 {
            ra.asm.mov(qword_ptr(r15 + off), imm as i32).expect("asm");
        } else {
            let tmp = ra.scratch_gpr();
            ra.asm.mov(tmp.r32(), imm as u32).expect("asm");
            ra.asm.mov(qword_ptr(r15 + off), tmp.r64()).expect("asm");
            ra.release(tmp);
        }
    } else {
        let value = ra.use_scratch_gpr(&mut args[1]);
        ra.asm.mov(value.r32(), value.r32()).expect("asm");
        ra.asm.mov(qword_ptr(r15 + off), value.r64()).expect("asm");
    }
}

pub fn emit_set_x(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst);
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[1].fits_in_imm_i32() {
        let imm = args[1].value.imm_i64() as i32;
        args[1].mark_allocated();
        ra.asm.mov(qword_ptr(r15 + off), imm).expect("asm");
    } else {
        let value = ra.use_gpr(&mut args[1]);
        ra.asm.mov(qword_ptr(r15 + off), value.r64()).expect("asm");
    }
}

pub fn emit_get_sp(ra: &mut RegAlloc, inst: Index) {
    let off = A64JitState::sp_offset() as i32;
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r64(), qword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_sp(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = A64JitState::sp_offset() as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_gpr(&mut args[0]);
    ra.asm.mov(qword_ptr(r15 + off), value.r64()).expect("asm");
}

pub fn emit_set_pc(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_pc as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[0].fits_in_imm_i32() {
        let imm = args[0].value.imm_i64() as i32;
        args[0].mark_allocated();
        ra.asm.mov(qword_ptr(r15 + off), imm).expect("asm");
    } else {
        let value = ra.use_gpr(&mut args[0]);
        ra.asm.mov(qword_ptr(r15 + off), value.r64()).expect("asm");
    }
}

pub fn emit_get_q(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = vec_offset(block, inst);
    let result = ra.scratch_xmm();
    ra.asm.movdqu(result.xmm(), xmmword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_q(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = vec_offset(block, inst);
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_xmm(&mut args[1]);
    ra.asm.movdqu(xmmword_ptr(r15 + off), value.xmm()).expect("asm");
}

pub fn emit_get_c_flag(ctx: &EmitContext, ra: &mut RegAlloc, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.asm.shr(result.r32(), nzcv::HOST_C_BIT).expect("asm");
    ra.asm.and(result.r32(), 1).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_get_nzcv_raw(ctx: &EmitContext, ra: &mut RegAlloc, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    emit_from_host_format(ra, result);
    ra.define_value(inst, result);
}

pub fn emit_set_nzcv_raw(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[0].is_immediate() {
        let host = nzcv::to_host(args[0].imm_u32());
        args[0].mark_allocated();
        ra.asm.mov(dword_ptr(r15 + off), host as i32).expect("asm");
    } else {
        let value = ra.use_scratch_gpr(&mut args[0]);
        emit_to_host_format(ra, value);
        ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
    }
}

pub fn emit_set_nzcv(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_scratch_gpr(&mut args[0]);
    ra.asm.and(value.r32(), nzcv::HOST_MASK as i32).expect("asm");
    ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
}

/// NZCVFromPackedFlags: architectural bits 31:28 into host layout.
pub fn emit_nzcv_from_packed_flags(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[0].is_immediate() {
        let host = nzcv::to_host(args[0].imm_u32());
        args[0].mark_allocated();
        let result = ra.scratch_gpr();
        ra.asm.mov(result.r32(), host as i32).expect("asm");
        ra.define_value(inst, result);
    } else {
        let result = ra.use_scratch_gpr(&mut args[0]);
        emit_to_host_format(ra, result);
        ra.define_value(inst, result);
    }
}

/// Standalone GetNZCVFromOp: the producer did not emit host flags (it
/// was a register read or similar), so derive N and Z from the value.
pub fn emit_get_nzcv_from_op(ra: &mut RegAlloc, block: &Block, inst: Index) {
    if ra.value_location(inst).is_some() {
        // Fused by the producer.
        return;
    }
    let producer = block.get(inst).arg(0);
    let width = match producer {
        crate::ir::value::Value::Inst(p) => block.get(p).return_type().bit_width(),
        imm => imm.get_type().bit_width(),
    };
    let mut args = ra.get_argument_info(block.get(inst).args());
    let rax_guard = ra.scratch_gpr_at(HOST_RAX);
    let value = ra.use_gpr(&mut args[0]);
    if width == 64 {
        ra.asm.test(value.r64(), value.r64()).expect("asm");
    } else {
        ra.asm.test(value.r32(), value.r32()).expect("asm");
    }
    ra.asm.lahf().expect("asm");
    ra.asm.seto(al).expect("asm");
    ra.asm.movzx(eax, ax).expect("asm");
    ra.define_value(inst, rax_guard);
}

/// Standalone carry/overflow pseudo-ops must have been fused; reaching
/// here un-fused is a translator bug.
pub fn emit_unfused_pseudo(ra: &mut RegAlloc, block: &Block, inst: Index) {
    if ra.value_location(inst).is_some() {
        return;
    }
    panic!(
        "pseudo-operation {:?} was not fused with its producer",
        block.get(inst).opcode
    );
}

pub fn emit_breakpoint(ra: &mut RegAlloc) {
    ra.asm.int3().expect("asm");
}

pub fn emit_identity(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let args = ra.get_argument_info(block.get(inst).args());
    ra.define_value_from_arg(inst, &args[0]);
}

/// Dispatch the CRC32 opcodes: hardware CRC32 when available, helper
/// routines otherwise.
pub fn emit_crc32(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    castagnoli: bool,
    bitsize: usize,
) {
    if castagnoli && ctx.config.host_has_sse42 {
        let mut args = ra.get_argument_info(block.get(inst).args());
        let crc = ra.use_scratch_gpr(&mut args[0]);
        let data = ra.use_gpr(&mut args[1]);
        match bitsize {
            8 => ra.asm.crc32(crc.r32(), data.r8()).expect("asm"),
            16 => ra.asm.crc32(crc.r32(), data.r16()).expect("asm"),
            32 => ra.asm.crc32(crc.r32(), data.r32()).expect("asm"),
            _ => ra.asm.crc32(crc.r64(), data.r64()).expect("asm"),
        }
        if bitsize == 64 {
            // The helper and instruction both leave a 32-bit CRC.
            ra.asm.mov(crc.r32(), crc.r32()).expect("asm");
        }
        ra.define_value(inst, crc);
        return;
    }

    // Software path through the shared helper.
    let mut args = ra.get_argument_info(block.get(inst).args());
    let (crc, rest) = args.split_at_mut(1);
    ra.host_call_simple(Some(inst), &mut [Some(&mut crc[0]), Some(&mut rest[0])]);
    let helper: u64 = match (castagnoli, bitsize) {
        (true, 8) => crc32c_shim_8 as usize as u64,
        (true, 16) => crc32c_shim_16 as usize as u64,
        (true, 32) => crc32c_shim_32 as usize as u64,
        (true, _) => crc32c_shim_64 as usize as u64,
        (false, 8) => crc32_shim_8 as usize as u64,
        (false, 16) => crc32_shim_16 as usize as u64,
        (false, 32) => crc32_shim_32 as usize as u64,
        (false, _) => crc32_shim_64 as usize as u64,
    };
    crate::backend::x64::callback::emit_call_to(ra.asm, helper).expect("asm");
}

macro_rules! crc_shim {
    ($name:ident, $fn:path, $len:expr) => {
        extern "C" fn $name(crc: u64, value: u64) -> u64 {
            $fn(crc as u32, value, $len) as u64
        }
    };
}

crc_shim!(crc32_shim_8, crate::common::crc32::compute_crc32_iso, 1);
crc_shim!(crc32_shim_16, crate::common::crc32::compute_crc32_iso, 2);
crc_shim!(crc32_shim_32, crate::common::crc32::compute_crc32_iso, 4);
crc_shim!(crc32_shim_64, crate::common::crc32::compute_crc32_iso, 8);
crc_shim!(crc32c_shim_8, crate::common::crc32::compute_crc32_castagnoli, 1);
crc_shim!(crc32c_shim_16, crate::common::crc32::compute_crc32_castagnoli, 2);
crc_shim!(crc32c_shim_32, crate::common::crc32::compute_crc32_castagnoli, 4);
crc_shim!(crc32c_shim_64, crate::common::crc32::compute_crc32_castagnoli, 8);

/// Shared CheckBit write (the A64 variant of `A32SetCheckBit`).
pub fn emit_set_check_bit(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    crate::backend::x64::emit_a32::emit_set_check_bit(ctx, ra, block, inst);
}

pub fn emit_call_supervisor(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    crate::backend::x64::emit_a32::emit_call_supervisor(ctx, ra, block, inst);
}

pub fn emit_exception_raised(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    crate::backend::x64::emit_a32::emit_exception_raised(ctx, ra, block, inst);
}

pub fn emit_push_rsb(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    crate::backend::x64::emit_a32::emit_push_rsb(ctx, ra, block, inst);
}
