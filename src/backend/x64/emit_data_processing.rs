use iced_x86::code_asm::*;

use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::hostloc::{HostLoc, HOST_RAX, HOST_RCX, HOST_RDX};
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::ir::block::Block;
use crate::ir::cond::Cond;
use crate::ir::opcode::Opcode;
use crate::ir::value::Index;

/// The pseudo-operations attached to the instruction currently being
/// lowered. The producer's emission routine materializes each one right
/// after the operation while the host flags are still live.
pub struct FlagConsumers {
    pub carry: Option<Index>,
    pub overflow: Option<Index>,
    pub nzcv: Option<Index>,
}

pub fn flag_consumers(block: &Block, inst: Index) -> FlagConsumers {
    FlagConsumers {
        carry: block.associated_pseudo_operation(inst, Opcode::GetCarryFromOp),
        overflow: block.associated_pseudo_operation(inst, Opcode::GetOverflowFromOp),
        nzcv: block.associated_pseudo_operation(inst, Opcode::GetNZCVFromOp),
    }
}

/// Capture host flags into the pseudo-op results. The arithmetic flags
/// must be live; only flag-preserving instructions (moves) may have been
/// emitted since the producer.
pub fn capture_flags(ra: &mut RegAlloc, flags: &FlagConsumers, reserved_rax: Option<HostLoc>) {
    if let Some(nzcv_inst) = flags.nzcv {
        let loc = reserved_rax.expect("rax must be reserved for GetNZCVFromOp");
        debug_assert_eq!(loc, HOST_RAX);
        ra.asm.lahf().expect("asm");
        ra.asm.seto(al).expect("asm");
        ra.asm.movzx(eax, ax).expect("asm");
        ra.define_value(nzcv_inst, loc);
    } else if let Some(loc) = reserved_rax {
        ra.release(loc);
    }
    if let Some(carry_inst) = flags.carry {
        let loc = ra.scratch_gpr();
        ra.asm.setc(loc.r8()).expect("asm");
        ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
        ra.define_value(carry_inst, loc);
    }
    if let Some(overflow_inst) = flags.overflow {
        let loc = ra.scratch_gpr();
        ra.asm.seto(loc.r8()).expect("asm");
        ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
        ra.define_value(overflow_inst, loc);
    }
}

/// Reserve RAX ahead of the operation when an NZCV capture will follow.
pub fn reserve_rax_for_flags(ra: &mut RegAlloc, flags: &FlagConsumers) -> Option<HostLoc> {
    if flags.nzcv.is_some() {
        Some(ra.scratch_gpr_at(HOST_RAX))
    } else {
        None
    }
}

/// Load the guest NZCV into the host flags so a Jcc/CMOVcc can test it.
/// Clobbers RAX, which the caller must have scratched.
pub fn load_nzcv_into_flags(ra: &mut RegAlloc, jsi_nzcv_offset: usize) {
    let off = jsi_nzcv_offset as i32;
    ra.asm.mov(eax, dword_ptr(r15 + off)).expect("asm");
    // OF from bit 0: 0x7F + 1 overflows signed.
    ra.asm.add(al, 0x7F).expect("asm");
    ra.asm.sahf().expect("asm");
}

/// ARM HI/LS need the complemented host carry.
fn needs_cmc(cond: Cond) -> bool {
    matches!(cond, Cond::HI | Cond::LS)
}

/// Conditional jump matching an ARM condition against loaded host flags.
pub fn emit_jcc(a: &mut CodeAssembler, cond: Cond, label: CodeLabel) {
    if needs_cmc(cond) {
        a.cmc().expect("asm");
    }
    match cond {
        Cond::EQ => a.je(label),
        Cond::NE => a.jne(label),
        Cond::CS => a.jb(label),
        Cond::CC => a.jae(label),
        Cond::MI => a.js(label),
        Cond::PL => a.jns(label),
        Cond::VS => a.jo(label),
        Cond::VC => a.jno(label),
        Cond::HI => a.ja(label),
        Cond::LS => a.jbe(label),
        Cond::GE => a.jge(label),
        Cond::LT => a.jl(label),
        Cond::GT => a.jg(label),
        Cond::LE => a.jle(label),
        Cond::AL | Cond::NV => a.jmp(label),
    }
    .expect("asm");
}

fn emit_cmov64(a: &mut CodeAssembler, cond: Cond, dst: AsmRegister64, src: AsmRegister64) {
    if needs_cmc(cond) {
        a.cmc().expect("asm");
    }
    match cond {
        Cond::EQ => a.cmove(dst, src),
        Cond::NE => a.cmovne(dst, src),
        Cond::CS => a.cmovb(dst, src),
        Cond::CC => a.cmovae(dst, src),
        Cond::MI => a.cmovs(dst, src),
        Cond::PL => a.cmovns(dst, src),
        Cond::VS => a.cmovo(dst, src),
        Cond::VC => a.cmovno(dst, src),
        Cond::HI => a.cmova(dst, src),
        Cond::LS => a.cmovbe(dst, src),
        Cond::GE => a.cmovge(dst, src),
        Cond::LT => a.cmovl(dst, src),
        Cond::GT => a.cmovg(dst, src),
        Cond::LE => a.cmovle(dst, src),
        Cond::AL | Cond::NV => a.mov(dst, src),
    }
    .expect("asm");
}

// ---------------------------------------------------------------------------
// Addition / subtraction
// ---------------------------------------------------------------------------

pub fn emit_add(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let _ = ctx;
    let flags = flag_consumers(block, inst);
    let args = block.get(inst).args();
    let carry_in = args[2];
    let mut args = ra.get_argument_info(args);

    let rax_guard = reserve_rax_for_flags(ra, &flags);
    let result = ra.use_scratch_gpr(&mut args[0]);

    let use_imm_op2 = args[1].fits_in_imm_i32() && flags.nzcv.is_none() && flags.carry.is_none()
        && flags.overflow.is_none()
        && carry_in.is_immediate();

    if carry_in.is_immediate() && !carry_in.u1() {
        if use_imm_op2 {
            let imm = args[1].imm_u32() as i32;
            if bitsize == 64 {
                ra.asm.add(result.r64(), imm).expect("asm");
            } else {
                ra.asm.add(result.r32(), imm).expect("asm");
            }
        } else {
            let op2 = ra.use_gpr(&mut args[1]);
            if bitsize == 64 {
                ra.asm.add(result.r64(), op2.r64()).expect("asm");
            } else {
                ra.asm.add(result.r32(), op2.r32()).expect("asm");
            }
        }
    } else {
        let op2 = ra.use_gpr(&mut args[1]);
        if carry_in.is_immediate() {
            // Carry-in constant true.
            ra.asm.stc().expect("asm");
        } else {
            let carry = ra.use_gpr(&mut args[2]);
            ra.asm.bt(carry.r32(), 0).expect("asm");
        }
        if bitsize == 64 {
            ra.asm.adc(result.r64(), op2.r64()).expect("asm");
        } else {
            ra.asm.adc(result.r32(), op2.r32()).expect("asm");
        }
    }

    capture_flags(ra, &flags, rax_guard);
    ra.define_value(inst, result);
}

pub fn emit_sub(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let _ = ctx;
    let flags = flag_consumers(block, inst);
    let args = block.get(inst).args();
    let carry_in = args[2];
    let mut args = ra.get_argument_info(args);

    let rax_guard = reserve_rax_for_flags(ra, &flags);
    let result = ra.use_scratch_gpr(&mut args[0]);

    let plain = carry_in.is_immediate() && carry_in.u1();
    if plain {
        if args[1].fits_in_imm_i32()
            && flags.nzcv.is_none()
            && flags.carry.is_none()
            && flags.overflow.is_none()
        {
            let imm = args[1].imm_u32() as i32;
            if bitsize == 64 {
                ra.asm.sub(result.r64(), imm).expect("asm");
            } else {
                ra.asm.sub(result.r32(), imm).expect("asm");
            }
        } else {
            let op2 = ra.use_gpr(&mut args[1]);
            if bitsize == 64 {
                ra.asm.sub(result.r64(), op2.r64()).expect("asm");
            } else {
                ra.asm.sub(result.r32(), op2.r32()).expect("asm");
            }
            if flags.nzcv.is_some() || flags.carry.is_some() {
                // Host borrow to guest carry.
                ra.asm.cmc().expect("asm");
            }
        }
    } else {
        let op2 = ra.use_gpr(&mut args[1]);
        if carry_in.is_immediate() {
            // Constant false carry: subtract with borrow set.
            ra.asm.stc().expect("asm");
        } else {
            let carry = ra.use_gpr(&mut args[2]);
            ra.asm.bt(carry.r32(), 0).expect("asm");
            ra.asm.cmc().expect("asm");
        }
        if bitsize == 64 {
            ra.asm.sbb(result.r64(), op2.r64()).expect("asm");
        } else {
            ra.asm.sbb(result.r32(), op2.r32()).expect("asm");
        }
        if flags.nzcv.is_some() || flags.carry.is_some() {
            ra.asm.cmc().expect("asm");
        }
    }

    capture_flags(ra, &flags, rax_guard);
    ra.define_value(inst, result);
}

// ---------------------------------------------------------------------------
// Logical / bit ops
// ---------------------------------------------------------------------------

macro_rules! simple_binop {
    ($name:ident, $op32:ident, $op64:ident) => {
        pub fn $name(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
            let mut args = ra.get_argument_info(block.get(inst).args());
            let result = ra.use_scratch_gpr(&mut args[0]);
            if args[1].fits_in_imm_i32() {
                let imm = args[1].imm_u32() as i32;
                if bitsize == 64 {
                    ra.asm.$op64(result.r64(), imm).expect("asm");
                } else {
                    ra.asm.$op32(result.r32(), imm).expect("asm");
                }
            } else {
                let op2 = ra.use_gpr(&mut args[1]);
                if bitsize == 64 {
                    ra.asm.$op64(result.r64(), op2.r64()).expect("asm");
                } else {
                    ra.asm.$op32(result.r32(), op2.r32()).expect("asm");
                }
            }
            ra.define_value(inst, result);
        }
    };
}

simple_binop!(emit_and, and, and);
simple_binop!(emit_or, or, or);
simple_binop!(emit_eor, xor, xor);

pub fn emit_and_not(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let op2 = ra.use_scratch_gpr(&mut args[1]);
    if bitsize == 64 {
        ra.asm.not(op2.r64()).expect("asm");
    } else {
        ra.asm.not(op2.r32()).expect("asm");
    }
    let op1 = ra.use_gpr(&mut args[0]);
    if bitsize == 64 {
        ra.asm.and(op2.r64(), op1.r64()).expect("asm");
    } else {
        ra.asm.and(op2.r32(), op1.r32()).expect("asm");
    }
    ra.define_value(inst, op2);
}

pub fn emit_not(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    if bitsize == 64 {
        ra.asm.not(result.r64()).expect("asm");
    } else {
        ra.asm.not(result.r32()).expect("asm");
    }
    ra.define_value(inst, result);
}

// ---------------------------------------------------------------------------
// Shifts
// ---------------------------------------------------------------------------

/// A32 shift with defined semantics for amounts up to 255 and a carry
/// side channel. Immediate amounts lower branch-free; register amounts
/// use the clamped `dec cl` scheme.
pub fn emit_shift_a32(
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    kind: ShiftKind,
) {
    let flags = flag_consumers(block, inst);
    let raw_args = block.get(inst).args();
    let amount_is_imm = raw_args[1].is_immediate();
    let mut args = ra.get_argument_info(raw_args);

    if amount_is_imm {
        let n = args[1].imm_u8() as u32;
        args[1].mark_allocated();
        let result = ra.use_scratch_gpr(&mut args[0]);
        let carry_out = flags.carry.map(|carry_inst| {
            let loc = ra.scratch_gpr();
            (carry_inst, loc)
        });

        match kind {
            ShiftKind::Lsl => match n {
                0 => {
                    if let Some((_, loc)) = carry_out {
                        copy_carry_in(ra, &mut args[2], loc);
                    }
                }
                1..=32 => {
                    if let Some((_, loc)) = carry_out {
                        ra.asm.bt(result.r32(), 32 - n).expect("asm");
                        ra.asm.setc(loc.r8()).expect("asm");
                        ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
                    }
                    if n == 32 {
                        ra.asm.xor(result.r32(), result.r32()).expect("asm");
                    } else {
                        ra.asm.shl(result.r32(), n).expect("asm");
                    }
                }
                _ => {
                    ra.asm.xor(result.r32(), result.r32()).expect("asm");
                    if let Some((_, loc)) = carry_out {
                        ra.asm.xor(loc.r32(), loc.r32()).expect("asm");
                    }
                }
            },
            ShiftKind::Lsr => match n {
                0 => {
                    if let Some((_, loc)) = carry_out {
                        copy_carry_in(ra, &mut args[2], loc);
                    }
                }
                1..=32 => {
                    if let Some((_, loc)) = carry_out {
                        ra.asm.bt(result.r32(), n - 1).expect("asm");
                        ra.asm.setc(loc.r8()).expect("asm");
                        ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
                    }
                    if n == 32 {
                        ra.asm.xor(result.r32(), result.r32()).expect("asm");
                    } else {
                        ra.asm.shr(result.r32(), n).expect("asm");
                    }
                }
                _ => {
                    ra.asm.xor(result.r32(), result.r32()).expect("asm");
                    if let Some((_, loc)) = carry_out {
                        ra.asm.xor(loc.r32(), loc.r32()).expect("asm");
                    }
                }
            },
            ShiftKind::Asr => {
                let n = n.min(32);
                match n {
                    0 => {
                        if let Some((_, loc)) = carry_out {
                            copy_carry_in(ra, &mut args[2], loc);
                        }
                    }
                    _ => {
                        if let Some((_, loc)) = carry_out {
                            ra.asm.bt(result.r32(), n.min(32) - 1).expect("asm");
                            ra.asm.setc(loc.r8()).expect("asm");
                            ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
                        }
                        ra.asm.sar(result.r32(), n.min(31)).expect("asm");
                        if n == 32 {
                            ra.asm.sar(result.r32(), 1).expect("asm");
                        }
                    }
                }
            }
            ShiftKind::Ror => match n {
                0 => {
                    if let Some((_, loc)) = carry_out {
                        copy_carry_in(ra, &mut args[2], loc);
                    }
                }
                _ => {
                    ra.asm.ror(result.r32(), n & 31).expect("asm");
                    if let Some((_, loc)) = carry_out {
                        ra.asm.mov(loc.r32(), result.r32()).expect("asm");
                        ra.asm.shr(loc.r32(), 31).expect("asm");
                    }
                }
            },
        }

        if let Some((carry_inst, loc)) = carry_out {
            ra.define_value(carry_inst, loc);
        }
        ra.define_value(inst, result);
        return;
    }

    // Register-specified amount: pin the amount to CL.
    let amount = ra.use_scratch_gpr_at(&mut args[1], HOST_RCX);
    debug_assert_eq!(amount, HOST_RCX);
    let result = ra.use_scratch_gpr(&mut args[0]);
    let carry_out = flags.carry.map(|carry_inst| {
        let loc = ra.scratch_gpr();
        copy_carry_in(ra, &mut args[2], loc);
        (carry_inst, loc)
    });

    let mut done = ra.asm.create_label();
    match kind {
        ShiftKind::Lsl | ShiftKind::Lsr => {
            let mut oversize = ra.asm.create_label();
            ra.asm.test(cl, cl).expect("asm");
            ra.asm.je(done).expect("asm");
            ra.asm.cmp(cl, 32).expect("asm");
            ra.asm.ja(oversize).expect("asm");
            // 1..=32: shift by n-1, capture the edge bit, shift once more.
            ra.asm.dec(cl).expect("asm");
            match kind {
                ShiftKind::Lsl => ra.asm.shl(result.r32(), cl).expect("asm"),
                _ => ra.asm.shr(result.r32(), cl).expect("asm"),
            }
            if let Some((_, loc)) = carry_out {
                ra.asm.mov(loc.r32(), result.r32()).expect("asm");
                match kind {
                    ShiftKind::Lsl => ra.asm.shr(loc.r32(), 31).expect("asm"),
                    _ => ra.asm.and(loc.r32(), 1).expect("asm"),
                }
            }
            match kind {
                ShiftKind::Lsl => ra.asm.shl(result.r32(), 1).expect("asm"),
                _ => ra.asm.shr(result.r32(), 1).expect("asm"),
            }
            ra.asm.jmp(done).expect("asm");
            ra.asm.set_label(&mut oversize).expect("asm");
            ra.asm.xor(result.r32(), result.r32()).expect("asm");
            if let Some((_, loc)) = carry_out {
                ra.asm.xor(loc.r32(), loc.r32()).expect("asm");
            }
        }
        ShiftKind::Asr => {
            let mut in_range = ra.asm.create_label();
            ra.asm.test(cl, cl).expect("asm");
            ra.asm.je(done).expect("asm");
            ra.asm.cmp(cl, 32).expect("asm");
            ra.asm.jbe(in_range).expect("asm");
            ra.asm.mov(cl, 32).expect("asm");
            ra.asm.set_label(&mut in_range).expect("asm");
            ra.asm.dec(cl).expect("asm");
            ra.asm.sar(result.r32(), cl).expect("asm");
            if let Some((_, loc)) = carry_out {
                ra.asm.mov(loc.r32(), result.r32()).expect("asm");
                ra.asm.and(loc.r32(), 1).expect("asm");
            }
            ra.asm.sar(result.r32(), 1).expect("asm");
        }
        ShiftKind::Ror => {
            ra.asm.test(cl, cl).expect("asm");
            ra.asm.je(done).expect("asm");
            ra.asm.ror(result.r32(), cl).expect("asm");
            if let Some((_, loc)) = carry_out {
                ra.asm.mov(loc.r32(), result.r32()).expect("asm");
                ra.asm.shr(loc.r32(), 31).expect("asm");
            }
        }
    }
    ra.asm.set_label(&mut done).expect("asm");
    ra.asm.nop().expect("asm");

    if let Some((carry_inst, loc)) = carry_out {
        ra.define_value(carry_inst, loc);
    }
    ra.define_value(inst, result);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Copy the carry-in operand (arg 2 of the A32 shifts) into `loc`.
fn copy_carry_in(ra: &mut RegAlloc, arg: &mut crate::backend::x64::reg_alloc::Argument, loc: HostLoc) {
    if arg.is_immediate() {
        let v = arg.imm_u1() as u32;
        arg.mark_allocated();
        if v == 0 {
            ra.asm.xor(loc.r32(), loc.r32()).expect("asm");
        } else {
            ra.asm.mov(loc.r32(), 1i32).expect("asm");
        }
    } else {
        let carry = ra.use_gpr(arg);
        ra.asm.mov(loc.r32(), carry.r32()).expect("asm");
    }
}

pub fn emit_rotate_right_extended(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let flags = flag_consumers(block, inst);
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    // Load carry into CF, then rotate through it.
    if args[1].is_immediate() {
        let c = args[1].imm_u1();
        args[1].mark_allocated();
        if c {
            ra.asm.stc().expect("asm");
        } else {
            ra.asm.clc().expect("asm");
        }
    } else {
        let carry = ra.use_gpr(&mut args[1]);
        ra.asm.bt(carry.r32(), 0).expect("asm");
    }
    ra.asm.rcr(result.r32(), 1).expect("asm");
    if let Some(carry_inst) = flags.carry {
        let loc = ra.scratch_gpr();
        ra.asm.setc(loc.r8()).expect("asm");
        ra.asm.movzx(loc.r32(), loc.r8()).expect("asm");
        ra.define_value(carry_inst, loc);
    }
    ra.define_value(inst, result);
}

/// A64-style shifts: the amount is masked to the operand width.
pub fn emit_shift_masked(ra: &mut RegAlloc, block: &Block, inst: Index, kind: ShiftKind, bitsize: usize) {
    let raw_args = block.get(inst).args();
    let amount_is_imm = raw_args[1].is_immediate();
    let mut args = ra.get_argument_info(raw_args);

    if amount_is_imm {
        let n = (args[1].imm_u64() as u32) & (bitsize as u32 - 1);
        args[1].mark_allocated();
        let result = ra.use_scratch_gpr(&mut args[0]);
        if n != 0 {
            match (kind, bitsize) {
                (ShiftKind::Lsl, 64) => ra.asm.shl(result.r64(), n).expect("asm"),
                (ShiftKind::Lsl, _) => ra.asm.shl(result.r32(), n).expect("asm"),
                (ShiftKind::Lsr, 64) => ra.asm.shr(result.r64(), n).expect("asm"),
                (ShiftKind::Lsr, _) => ra.asm.shr(result.r32(), n).expect("asm"),
                (ShiftKind::Asr, 64) => ra.asm.sar(result.r64(), n).expect("asm"),
                (ShiftKind::Asr, _) => ra.asm.sar(result.r32(), n).expect("asm"),
                (ShiftKind::Ror, 64) => ra.asm.ror(result.r64(), n).expect("asm"),
                (ShiftKind::Ror, _) => ra.asm.ror(result.r32(), n).expect("asm"),
            }
        }
        ra.define_value(inst, result);
        return;
    }

    let amount = ra.use_gpr_at(&mut args[1], HOST_RCX);
    debug_assert_eq!(amount, HOST_RCX);
    let result = ra.use_scratch_gpr(&mut args[0]);
    match (kind, bitsize) {
        (ShiftKind::Lsl, 64) => ra.asm.shl(result.r64(), cl).expect("asm"),
        (ShiftKind::Lsl, _) => ra.asm.shl(result.r32(), cl).expect("asm"),
        (ShiftKind::Lsr, 64) => ra.asm.shr(result.r64(), cl).expect("asm"),
        (ShiftKind::Lsr, _) => ra.asm.shr(result.r32(), cl).expect("asm"),
        (ShiftKind::Asr, 64) => ra.asm.sar(result.r64(), cl).expect("asm"),
        (ShiftKind::Asr, _) => ra.asm.sar(result.r32(), cl).expect("asm"),
        (ShiftKind::Ror, 64) => ra.asm.ror(result.r64(), cl).expect("asm"),
        (ShiftKind::Ror, _) => ra.asm.ror(result.r32(), cl).expect("asm"),
    }
    ra.define_value(inst, result);
}

// ---------------------------------------------------------------------------
// Multiplication / division
// ---------------------------------------------------------------------------

pub fn emit_mul(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    let op2 = ra.use_gpr(&mut args[1]);
    if bitsize == 64 {
        ra.asm.imul_2(result.r64(), op2.r64()).expect("asm");
    } else {
        ra.asm.imul_2(result.r32(), op2.r32()).expect("asm");
    }
    ra.define_value(inst, result);
}

pub fn emit_mul_high(ra: &mut RegAlloc, block: &Block, inst: Index, signed: bool) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let lhs = ra.use_scratch_gpr_at(&mut args[0], HOST_RAX);
    debug_assert_eq!(lhs, HOST_RAX);
    let rdx_loc = ra.scratch_gpr_at(HOST_RDX);
    let op2 = ra.use_gpr(&mut args[1]);
    if signed {
        ra.asm.imul(op2.r64()).expect("asm");
    } else {
        ra.asm.mul(op2.r64()).expect("asm");
    }
    ra.release(lhs);
    ra.define_value(inst, rdx_loc);
}

pub fn emit_div(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize, signed: bool) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let dividend = ra.use_scratch_gpr_at(&mut args[0], HOST_RAX);
    debug_assert_eq!(dividend, HOST_RAX);
    let rdx_loc = ra.scratch_gpr_at(HOST_RDX);
    let divisor = ra.use_gpr(&mut args[1]);

    let mut done = ra.asm.create_label();
    let mut zero = ra.asm.create_label();

    if bitsize == 64 {
        ra.asm.test(divisor.r64(), divisor.r64()).expect("asm");
    } else {
        ra.asm.test(divisor.r32(), divisor.r32()).expect("asm");
    }
    ra.asm.je(zero).expect("asm");

    if signed {
        // INT_MIN / -1 yields INT_MIN without trapping.
        let mut do_divide = ra.asm.create_label();
        if bitsize == 64 {
            ra.asm.mov(rdx_loc.r64(), 0x8000_0000_0000_0000u64).expect("asm");
            ra.asm.cmp(rax, rdx_loc.r64()).expect("asm");
            ra.asm.jne(do_divide).expect("asm");
            ra.asm.cmp(divisor.r64(), -1).expect("asm");
            ra.asm.je(done).expect("asm");
            ra.asm.set_label(&mut do_divide).expect("asm");
            ra.asm.cqo().expect("asm");
            ra.asm.idiv(divisor.r64()).expect("asm");
        } else {
            ra.asm.cmp(eax, 0x8000_0000u32 as i32).expect("asm");
            ra.asm.jne(do_divide).expect("asm");
            ra.asm.cmp(divisor.r32(), -1).expect("asm");
            ra.asm.je(done).expect("asm");
            ra.asm.set_label(&mut do_divide).expect("asm");
            ra.asm.cdq().expect("asm");
            ra.asm.idiv(divisor.r32()).expect("asm");
        }
    } else if bitsize == 64 {
        ra.asm.xor(edx, edx).expect("asm");
        ra.asm.div(divisor.r64()).expect("asm");
    } else {
        ra.asm.xor(edx, edx).expect("asm");
        ra.asm.div(divisor.r32()).expect("asm");
    }
    ra.asm.jmp(done).expect("asm");

    ra.asm.set_label(&mut zero).expect("asm");
    ra.asm.xor(eax, eax).expect("asm");
    ra.asm.set_label(&mut done).expect("asm");
    ra.asm.nop().expect("asm");

    ra.release(rdx_loc);
    ra.define_value(inst, dividend);
}

// ---------------------------------------------------------------------------
// Extension / packing / bit ops
// ---------------------------------------------------------------------------

pub enum ExtendKind {
    SignByteToWord,
    SignHalfToWord,
    SignByteToLong,
    SignHalfToLong,
    SignWordToLong,
    ZeroByteToWord,
    ZeroHalfToWord,
    ZeroByteToLong,
    ZeroHalfToLong,
    ZeroWordToLong,
}

pub fn emit_extend(ra: &mut RegAlloc, block: &Block, inst: Index, kind: ExtendKind) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    match kind {
        ExtendKind::SignByteToWord => ra.asm.movsx(result.r32(), result.r8()).expect("asm"),
        ExtendKind::SignHalfToWord => ra.asm.movsx(result.r32(), result.r16()).expect("asm"),
        ExtendKind::SignByteToLong => ra.asm.movsx(result.r64(), result.r8()).expect("asm"),
        ExtendKind::SignHalfToLong => ra.asm.movsx(result.r64(), result.r16()).expect("asm"),
        ExtendKind::SignWordToLong => ra.asm.movsxd(result.r64(), result.r32()).expect("asm"),
        ExtendKind::ZeroByteToWord | ExtendKind::ZeroByteToLong => {
            ra.asm.movzx(result.r32(), result.r8()).expect("asm")
        }
        ExtendKind::ZeroHalfToWord | ExtendKind::ZeroHalfToLong => {
            ra.asm.movzx(result.r32(), result.r16()).expect("asm")
        }
        ExtendKind::ZeroWordToLong => ra.asm.mov(result.r32(), result.r32()).expect("asm"),
    }
    ra.define_value(inst, result);
}

pub fn emit_pack_2x32(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let lo = ra.use_scratch_gpr(&mut args[0]);
    let hi = ra.use_scratch_gpr(&mut args[1]);
    ra.asm.shl(hi.r64(), 32).expect("asm");
    ra.asm.mov(lo.r32(), lo.r32()).expect("asm");
    ra.asm.or(lo.r64(), hi.r64()).expect("asm");
    ra.release(hi);
    ra.define_value(inst, lo);
}

pub fn emit_least_significant_word(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let args = ra.get_argument_info(block.get(inst).args());
    ra.define_value_from_arg(inst, &args[0]);
}

pub fn emit_most_significant_word(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    ra.asm.shr(result.r64(), 32).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_most_significant_bit(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    ra.asm.shr(result.r32(), 31).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_is_zero(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    if bitsize == 64 {
        ra.asm.test(result.r64(), result.r64()).expect("asm");
    } else {
        ra.asm.test(result.r32(), result.r32()).expect("asm");
    }
    ra.asm.sete(result.r8()).expect("asm");
    ra.asm.movzx(result.r32(), result.r8()).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_test_bit(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    let bit = args[1].imm_u8();
    args[1].mark_allocated();
    ra.asm.bt(result.r64(), bit as u32).expect("asm");
    ra.asm.setc(result.r8()).expect("asm");
    ra.asm.movzx(result.r32(), result.r8()).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_conditional_select(
    ra: &mut RegAlloc,
    block: &Block,
    inst: Index,
    nzcv_offset: usize,
    bitsize: usize,
) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let cond = args[0].cond();
    args[0].mark_allocated();
    let rax_guard = ra.scratch_gpr_at(HOST_RAX);
    let else_ = ra.use_scratch_gpr(&mut args[2]);
    let then_ = ra.use_gpr(&mut args[1]);
    load_nzcv_into_flags(ra, nzcv_offset);
    // Select `then_` into the else register when the condition passes.
    let _ = bitsize;
    emit_cmov64(ra.asm, cond, else_.r64(), then_.r64());
    ra.release(rax_guard);
    ra.define_value(inst, else_);
}

pub fn emit_byte_reverse(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    match bitsize {
        16 => ra.asm.ror(result.r16(), 8).expect("asm"),
        32 => ra.asm.bswap(result.r32()).expect("asm"),
        _ => ra.asm.bswap(result.r64()).expect("asm"),
    }
    ra.define_value(inst, result);
}

pub fn emit_count_leading_zeros(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_gpr(&mut args[0]);
    let tmp = ra.scratch_gpr();
    if bitsize == 64 {
        // clz(x) = 63 - bsr(x), with bsr undefined for zero.
        ra.asm.bsr(tmp.r64(), result.r64()).expect("asm");
        ra.asm.mov(result.r64(), 128u64).expect("asm");
        ra.asm.cmove(tmp.r64(), result.r64()).expect("asm");
        ra.asm.mov(result.r32(), 63).expect("asm");
        ra.asm.sub(result.r64(), tmp.r64()).expect("asm");
        // Zero input: 63 - 128 would be wrong; patch to 64.
        ra.asm.mov(tmp.r32(), 64).expect("asm");
        ra.asm.cmovs(result.r64(), tmp.r64()).expect("asm");
    } else {
        ra.asm.bsr(tmp.r32(), result.r32()).expect("asm");
        ra.asm.mov(result.r32(), 63).expect("asm");
        ra.asm.cmove(tmp.r32(), result.r32()).expect("asm");
        ra.asm.mov(result.r32(), 31).expect("asm");
        ra.asm.sub(result.r32(), tmp.r32()).expect("asm");
        ra.asm.mov(tmp.r32(), 32).expect("asm");
        ra.asm.cmovs(result.r32(), tmp.r32()).expect("asm");
    }
    ra.release(tmp);
    ra.define_value(inst, result);
}

pub fn emit_extract_register(ra: &mut RegAlloc, block: &Block, inst: Index, bitsize: usize) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let shift = args[2].imm_u8() as u32;
    args[2].mark_allocated();
    let result = ra.use_scratch_gpr(&mut args[0]);
    let hi = ra.use_gpr(&mut args[1]);
    if shift == 0 {
        // Result is the low register unchanged.
    } else if bitsize == 64 {
        ra.asm.shrd(result.r64(), hi.r64(), shift).expect("asm");
    } else {
        ra.asm.shrd(result.r32(), hi.r32(), shift).expect("asm");
    }
    ra.define_value(inst, result);
}

// ---------------------------------------------------------------------------
// Narrowing identities
// ---------------------------------------------------------------------------

/// LeastSignificantHalf / LeastSignificantByte and friends are pure
/// reinterpretations; the consumer reads the narrow register view.
pub fn emit_identity_narrow(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let args = ra.get_argument_info(block.get(inst).args());
    ra.define_value_from_arg(inst, &args[0]);
}
