//! Emission of the A32 guest-context opcodes.

use iced_x86::code_asm::*;

use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::jit_state::A32JitState;
use crate::backend::x64::nzcv;
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::frontend::a32::fpscr::FPSCR_MODE_MASK;
use crate::ir::block::Block;
use crate::ir::value::Index;

fn reg_offset(block: &Block, inst: Index, arg: usize) -> i32 {
    A32JitState::reg_offset(block.get(inst).arg(arg).a32_reg().number()) as i32
}

pub fn emit_get_register(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst, 0);
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_register(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = reg_offset(block, inst, 0);
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[1].fits_in_imm_i32() {
        let imm = args[1].imm_u32() as i32;
        args[1].mark_allocated();
        ra.asm.mov(dword_ptr(r15 + off), imm).expect("asm");
    } else {
        let value = ra.use_gpr(&mut args[1]);
        ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
    }
}

pub fn emit_get_c_flag(ctx: &EmitContext, ra: &mut RegAlloc, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.asm.shr(result.r32(), nzcv::HOST_C_BIT).expect("asm");
    ra.asm.and(result.r32(), 1).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_cpsr_nzcv(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_scratch_gpr(&mut args[0]);
    ra.asm.and(value.r32(), nzcv::HOST_MASK as i32).expect("asm");
    ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
}

pub fn emit_set_cpsr_nzcv_raw(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
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

/// Architectural NZCV (bits 31:28) to host layout, in place.
pub fn emit_to_host_format(ra: &mut RegAlloc, value: crate::backend::x64::hostloc::HostLoc) {
    ra.asm.shr(value.r32(), 28).expect("asm");
    ra.asm.imul_3(value.r32(), value.r32(), 0x1081).expect("asm");
    ra.asm.and(value.r32(), nzcv::HOST_MASK as i32).expect("asm");
}

/// Host layout back to architectural bits 31:28, in place.
pub fn emit_from_host_format(ra: &mut RegAlloc, value: crate::backend::x64::hostloc::HostLoc) {
    ra.asm.and(value.r32(), nzcv::HOST_MASK as i32).expect("asm");
    ra.asm
        .imul_3(value.r32(), value.r32(), 0x1021_0000u32 as i32)
        .expect("asm");
    ra.asm.and(value.r32(), 0xF000_0000u32 as i32).expect("asm");
}

pub fn emit_set_cpsr_nz(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_scratch_gpr(&mut args[0]);
    let old = ra.scratch_gpr();
    ra.asm.and(value.r32(), 0xC000).expect("asm");
    ra.asm.mov(old.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.asm.and(old.r32(), !0xC000u32 as i32).expect("asm");
    ra.asm.or(value.r32(), old.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
    ra.release(old);
}

pub fn emit_set_cpsr_nzc(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_scratch_gpr(&mut args[0]);
    ra.asm.and(value.r32(), 0xC000).expect("asm");

    if args[1].is_immediate() {
        let carry = args[1].imm_u1();
        args[1].mark_allocated();
        if carry {
            ra.asm.or(value.r32(), 1 << nzcv::HOST_C_BIT).expect("asm");
        }
    } else {
        let carry = ra.use_scratch_gpr(&mut args[1]);
        ra.asm.shl(carry.r32(), nzcv::HOST_C_BIT).expect("asm");
        ra.asm.or(value.r32(), carry.r32()).expect("asm");
        ra.release(carry);
    }

    let old = ra.scratch_gpr();
    ra.asm.mov(old.r32(), dword_ptr(r15 + off)).expect("asm");
    // Keep only V (bit 0) from the old flags.
    ra.asm.and(old.r32(), 1).expect("asm");
    ra.asm.or(value.r32(), old.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
    ra.release(old);
}

pub fn emit_or_q_flag(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = A32JitState::cpsr_q_offset() as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[0].is_immediate() {
        let v = args[0].imm_u1();
        args[0].mark_allocated();
        if v {
            ra.asm.or(dword_ptr(r15 + off), 1).expect("asm");
        }
    } else {
        let value = ra.use_gpr(&mut args[0]);
        ra.asm.or(dword_ptr(r15 + off), value.r32()).expect("asm");
    }
}

pub fn emit_get_ge_flags(ra: &mut RegAlloc, inst: Index) {
    let off = A32JitState::cpsr_ge_offset() as i32;
    let result = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + off)).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_set_ge_flags(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = A32JitState::cpsr_ge_offset() as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_gpr(&mut args[0]);
    ra.asm.mov(dword_ptr(r15 + off), value.r32()).expect("asm");
}

pub fn emit_get_cpsr(ctx: &EmitContext, ra: &mut RegAlloc, inst: Index) {
    let nzcv_off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;

    let result = ra.scratch_gpr();
    let tmp = ra.scratch_gpr();

    // Flags.
    ra.asm.mov(result.r32(), dword_ptr(r15 + nzcv_off)).expect("asm");
    emit_from_host_format(ra, result);
    // Q.
    ra.asm.mov(tmp.r32(), dword_ptr(r15 + A32JitState::cpsr_q_offset() as i32)).expect("asm");
    ra.asm.shl(tmp.r32(), 27).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    // GE.
    ra.asm.mov(tmp.r32(), dword_ptr(r15 + A32JitState::cpsr_ge_offset() as i32)).expect("asm");
    ra.asm.and(tmp.r32(), 0xF).expect("asm");
    ra.asm.shl(tmp.r32(), 16).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    // T (upper bit 0 -> CPSR bit 5).
    let upper = ra.scratch_gpr();
    ra.asm.mov(upper.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.mov(tmp.r32(), upper.r32()).expect("asm");
    ra.asm.and(tmp.r32(), 1).expect("asm");
    ra.asm.shl(tmp.r32(), 5).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    // E (upper bit 1 -> CPSR bit 9).
    ra.asm.mov(tmp.r32(), upper.r32()).expect("asm");
    ra.asm.and(tmp.r32(), 2).expect("asm");
    ra.asm.shl(tmp.r32(), 8).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    // IT (upper 15:8 -> CPSR 26:25 and 15:10).
    ra.asm.mov(tmp.r32(), upper.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 8).expect("asm");
    ra.asm.and(tmp.r32(), 0x3).expect("asm");
    ra.asm.shl(tmp.r32(), 25).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    ra.asm.mov(tmp.r32(), upper.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 10).expect("asm");
    ra.asm.and(tmp.r32(), 0x3F).expect("asm");
    ra.asm.shl(tmp.r32(), 10).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    // User mode.
    ra.asm.or(result.r32(), 0x10).expect("asm");

    ra.release(tmp);
    ra.release(upper);
    ra.define_value(inst, result);
}

pub fn emit_set_cpsr(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let nzcv_off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;

    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_gpr(&mut args[0]);
    let tmp = ra.scratch_gpr();

    // Flags.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    emit_to_host_format(ra, tmp);
    ra.asm.mov(dword_ptr(r15 + nzcv_off), tmp.r32()).expect("asm");
    // Q.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 27).expect("asm");
    ra.asm.and(tmp.r32(), 1).expect("asm");
    ra.asm.mov(dword_ptr(r15 + A32JitState::cpsr_q_offset() as i32), tmp.r32()).expect("asm");
    // GE.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 16).expect("asm");
    ra.asm.and(tmp.r32(), 0xF).expect("asm");
    ra.asm.mov(dword_ptr(r15 + A32JitState::cpsr_ge_offset() as i32), tmp.r32()).expect("asm");
    // Upper location descriptor: keep FPSCR mode and single-step, merge
    // T, E and IT back in.
    let upper = ra.scratch_gpr();
    ra.asm.mov(upper.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.and(upper.r32(), (FPSCR_MODE_MASK | 4) as i32).expect("asm");
    // T.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 5).expect("asm");
    ra.asm.and(tmp.r32(), 1).expect("asm");
    ra.asm.or(upper.r32(), tmp.r32()).expect("asm");
    // E.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 8).expect("asm");
    ra.asm.and(tmp.r32(), 2).expect("asm");
    ra.asm.or(upper.r32(), tmp.r32()).expect("asm");
    // IT low two bits (CPSR 26:25 -> upper 9:8).
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 25).expect("asm");
    ra.asm.and(tmp.r32(), 3).expect("asm");
    ra.asm.shl(tmp.r32(), 8).expect("asm");
    ra.asm.or(upper.r32(), tmp.r32()).expect("asm");
    // IT high six bits (CPSR 15:10 -> upper 15:10).
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.shr(tmp.r32(), 10).expect("asm");
    ra.asm.and(tmp.r32(), 0x3F).expect("asm");
    ra.asm.shl(tmp.r32(), 10).expect("asm");
    ra.asm.or(upper.r32(), tmp.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + upper_off), upper.r32()).expect("asm");

    ra.release(tmp);
    ra.release(upper);
}

pub fn emit_bx_write_pc(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let pc_off = ctx.jsi.offset_of_pc as i32;
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;

    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_scratch_gpr(&mut args[0]);
    let t_bit = ra.scratch_gpr();
    let mask = ra.scratch_gpr();

    ra.asm.mov(t_bit.r32(), value.r32()).expect("asm");
    ra.asm.and(t_bit.r32(), 1).expect("asm");
    // mask = 0xFFFFFFFC | (t << 1): clears bit 1 in ARM state only.
    ra.asm.mov(mask.r32(), t_bit.r32()).expect("asm");
    ra.asm.shl(mask.r32(), 1).expect("asm");
    ra.asm.or(mask.r32(), 0xFFFF_FFFCu32 as i32).expect("asm");
    ra.asm.and(value.r32(), mask.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + pc_off), value.r32()).expect("asm");

    ra.asm.mov(mask.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.and(mask.r32(), !1i32).expect("asm");
    ra.asm.or(mask.r32(), t_bit.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + upper_off), mask.r32()).expect("asm");

    ra.release(t_bit);
    ra.release(mask);
}

pub fn emit_update_upper_location_descriptor(
    ctx: &EmitContext,
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
) {
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;
    let new_upper = block.get(inst).arg(0).u32();
    let tmp = ra.scratch_gpr();
    // Preserve the single-step bit owned by the run loop.
    ra.asm.mov(tmp.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.and(tmp.r32(), 4).expect("asm");
    ra.asm.or(tmp.r32(), (new_upper & !4) as i32).expect("asm");
    ra.asm.mov(dword_ptr(r15 + upper_off), tmp.r32()).expect("asm");
    ra.release(tmp);
}

pub fn emit_get_fpscr(ra: &mut RegAlloc, ctx: &EmitContext, inst: Index) {
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;
    let fpscr_off = core::mem::offset_of!(A32JitState, fpscr) as i32;
    let result = ra.scratch_gpr();
    let tmp = ra.scratch_gpr();
    ra.asm.mov(result.r32(), dword_ptr(r15 + fpscr_off)).expect("asm");
    ra.asm.mov(tmp.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.and(tmp.r32(), FPSCR_MODE_MASK as i32).expect("asm");
    ra.asm.or(result.r32(), tmp.r32()).expect("asm");
    ra.release(tmp);
    ra.define_value(inst, result);
}

pub fn emit_set_fpscr(ra: &mut RegAlloc, ctx: &EmitContext, block: &Block, inst: Index) {
    let upper_off = ctx.jsi.offset_of_upper_location_descriptor.unwrap() as i32;
    let fpscr_off = core::mem::offset_of!(A32JitState, fpscr) as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    let value = ra.use_gpr(&mut args[0]);
    let tmp = ra.scratch_gpr();
    // Non-mode bits.
    ra.asm.mov(tmp.r32(), value.r32()).expect("asm");
    ra.asm.and(tmp.r32(), !FPSCR_MODE_MASK as i32).expect("asm");
    ra.asm.mov(dword_ptr(r15 + fpscr_off), tmp.r32()).expect("asm");
    // Mode bits into the upper location descriptor.
    ra.asm.mov(tmp.r32(), dword_ptr(r15 + upper_off)).expect("asm");
    ra.asm.and(tmp.r32(), !FPSCR_MODE_MASK as i32).expect("asm");
    let masked = ra.scratch_gpr();
    ra.asm.mov(masked.r32(), value.r32()).expect("asm");
    ra.asm.and(masked.r32(), FPSCR_MODE_MASK as i32).expect("asm");
    ra.asm.or(tmp.r32(), masked.r32()).expect("asm");
    ra.asm.mov(dword_ptr(r15 + upper_off), tmp.r32()).expect("asm");
    ra.release(masked);
    ra.release(tmp);
}

pub fn emit_set_check_bit(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let off = ctx.jsi.offset_of_check_bit as i32;
    let mut args = ra.get_argument_info(block.get(inst).args());
    if args[0].is_immediate() {
        let v = args[0].imm_u1() as i32;
        args[0].mark_allocated();
        ra.asm.mov(byte_ptr(r15 + off), v).expect("asm");
    } else {
        let value = ra.use_gpr(&mut args[0]);
        ra.asm.mov(byte_ptr(r15 + off), value.r8()).expect("asm");
    }
}

pub fn emit_call_supervisor(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    ra.host_call(None, &mut [Some(&mut args[0])]);
    ctx.config.callbacks.call_supervisor.emit_call_simple(ra.asm).expect("asm");
}

pub fn emit_exception_raised(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let (pc, rest) = args.split_at_mut(1);
    ra.host_call(None, &mut [Some(&mut pc[0]), Some(&mut rest[0])]);
    ctx.config.callbacks.exception_raised.emit_call_simple(ra.asm).expect("asm");
}

/// PushRSB: advance the ring pointer and store the descriptor plus the
/// (patched-in) code pointer for the predicted target.
pub fn emit_push_rsb(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    use crate::backend::x64::hostloc::HOST_RCX;
    use crate::backend::x64::jit_state::RSB_PTR_MASK;
    use crate::backend::x64::patch_info::{PatchType, PendingPatch};
    use crate::ir::location::LocationDescriptor;

    let descriptor = block.get(inst).arg(0).u64();
    let jsi = &ctx.jsi;

    let rcx_guard = ra.scratch_gpr_at(HOST_RCX);
    let index = ra.scratch_gpr();
    let tmp = ra.scratch_gpr();

    ra.asm
        .mov(index.r32(), dword_ptr(r15 + jsi.offset_of_rsb_ptr as i32))
        .expect("asm");
    ra.asm.inc(index.r32()).expect("asm");
    ra.asm.and(index.r32(), RSB_PTR_MASK as i32).expect("asm");
    ra.asm
        .mov(dword_ptr(r15 + jsi.offset_of_rsb_ptr as i32), index.r32())
        .expect("asm");

    ra.asm.mov(tmp.r64(), descriptor).expect("asm");
    ra.asm
        .mov(
            qword_ptr(r15 + index.r64() * 8 + jsi.offset_of_rsb_location_descriptors as i32),
            tmp.r64(),
        )
        .expect("asm");

    // Patchable `mov rcx, imm64` carrying the target's entrypoint; until
    // the target compiles it points at the dispatcher.
    let mut slot = ra.asm.create_label();
    ra.asm.set_label(&mut slot).expect("asm");
    let default = ctx.dispatcher_address(ctx.dispatcher.return_from_run_code);
    let mut bytes = [0x48u8, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0];
    bytes[2..].copy_from_slice(&default.to_le_bytes());
    ra.asm.db(&bytes).expect("asm");

    ctx.pending_patches.borrow_mut().push(PendingPatch {
        label: slot,
        target: LocationDescriptor::new(descriptor),
        patch_type: PatchType::MovRcx,
    });

    ra.asm
        .mov(
            qword_ptr(r15 + index.r64() * 8 + jsi.offset_of_rsb_codeptrs as i32),
            rcx,
        )
        .expect("asm");

    ra.release(rcx_guard);
    ra.release(index);
    ra.release(tmp);
}
