use crate::config::Exception;
use crate::frontend::a32::decode::{self, Thumb16Inst};
use crate::frontend::a32::it_state::ItState;
use crate::frontend::a32::translate::helpers::{emit_imm_shift, emit_reg_shift, sign_extend};
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::{Reg, ShiftType};
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::acc_type::AccType;
use crate::ir::cond::Cond;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

fn low_reg(bits: u32) -> Reg {
    Reg::from_bits(bits & 7)
}

/// Flag writes are suppressed inside an IT block.
fn sets_flags(e: &A32IrEmitter) -> bool {
    !e.current_location.it().is_in_it_block()
}

fn set_nz(e: &mut A32IrEmitter, result: Value) {
    let nzcv = e.ir.get_nzcv_from_op(result);
    e.set_cpsr_nz(nzcv);
}

fn set_nzc(e: &mut A32IrEmitter, result: Value, carry: Value) {
    let nzcv = e.ir.get_nzcv_from_op(result);
    e.set_cpsr_nzc(nzcv, carry);
}

fn set_nzcv(e: &mut A32IrEmitter, result: Value) {
    let nzcv = e.ir.get_nzcv_from_op(result);
    e.set_cpsr_nzcv(nzcv);
}

pub fn translate(e: &mut A32IrEmitter, hw: u16) -> Step {
    let Some(matcher) = decode::decode_thumb16(hw) else {
        return super::raise_undefined(e);
    };
    let w = hw as u32;

    use Thumb16Inst::*;
    match matcher.inst {
        LslImm | LsrImm | AsrImm => {
            let shift_type = match matcher.inst {
                LslImm => ShiftType::LSL,
                LsrImm => ShiftType::LSR,
                _ => ShiftType::ASR,
            };
            let imm5 = (w >> 6) & 0x1F;
            let m = e.get_register(low_reg(w >> 3));
            let carry_in = e.get_c_flag();
            let shifted = emit_imm_shift(e, m, shift_type, imm5, carry_in);
            if sets_flags(e) {
                set_nzc(e, shifted.value, shifted.carry);
            }
            e.set_register(low_reg(w), shifted.value);
            Step::Continue
        }
        AddReg | SubReg => {
            let n = e.get_register(low_reg(w >> 3));
            let m = e.get_register(low_reg(w >> 6));
            let result = if matcher.inst == AddReg {
                e.ir.add_32(n, m, Value::ImmU1(false))
            } else {
                e.ir.sub_32(n, m, Value::ImmU1(true))
            };
            if sets_flags(e) {
                set_nzcv(e, result);
            }
            e.set_register(low_reg(w), result);
            Step::Continue
        }
        AddImm3 | SubImm3 => {
            let n = e.get_register(low_reg(w >> 3));
            let imm = Value::ImmU32((w >> 6) & 7);
            let result = if matcher.inst == AddImm3 {
                e.ir.add_32(n, imm, Value::ImmU1(false))
            } else {
                e.ir.sub_32(n, imm, Value::ImmU1(true))
            };
            if sets_flags(e) {
                set_nzcv(e, result);
            }
            e.set_register(low_reg(w), result);
            Step::Continue
        }
        MovImm => {
            let result = Value::ImmU32(w & 0xFF);
            if sets_flags(e) {
                set_nz(e, result);
            }
            e.set_register(low_reg(w >> 8), result);
            Step::Continue
        }
        CmpImm => {
            let n = e.get_register(low_reg(w >> 8));
            let result = e.ir.sub_32(n, Value::ImmU32(w & 0xFF), Value::ImmU1(true));
            set_nzcv(e, result);
            Step::Continue
        }
        AddImm8 | SubImm8 => {
            let rdn = low_reg(w >> 8);
            let n = e.get_register(rdn);
            let imm = Value::ImmU32(w & 0xFF);
            let result = if matcher.inst == AddImm8 {
                e.ir.add_32(n, imm, Value::ImmU1(false))
            } else {
                e.ir.sub_32(n, imm, Value::ImmU1(true))
            };
            if sets_flags(e) {
                set_nzcv(e, result);
            }
            e.set_register(rdn, result);
            Step::Continue
        }
        DataProcessing => dp(e, w),
        AddHi => {
            let d = Reg::from_bits(((w >> 4) & 8) | (w & 7));
            let m = Reg::from_bits((w >> 3) & 0xF);
            let dv = e.get_register(d);
            let mv = e.get_register(m);
            let result = e.ir.add_32(dv, mv, Value::ImmU1(false));
            if d == Reg::R15 {
                e.alu_write_pc(result);
                e.set_term(Terminal::FastDispatchHint);
                return Step::Stop;
            }
            e.set_register(d, result);
            Step::Continue
        }
        CmpHi => {
            let n = Reg::from_bits(((w >> 4) & 8) | (w & 7));
            let m = Reg::from_bits((w >> 3) & 0xF);
            let nv = e.get_register(n);
            let mv = e.get_register(m);
            let result = e.ir.sub_32(nv, mv, Value::ImmU1(true));
            set_nzcv(e, result);
            Step::Continue
        }
        MovHi => {
            let d = Reg::from_bits(((w >> 4) & 8) | (w & 7));
            let m = Reg::from_bits((w >> 3) & 0xF);
            let mv = e.get_register(m);
            if d == Reg::R15 {
                e.alu_write_pc(mv);
                e.set_term(if m == Reg::R14 {
                    Terminal::PopRSBHint
                } else {
                    Terminal::FastDispatchHint
                });
                return Step::Stop;
            }
            e.set_register(d, mv);
            Step::Continue
        }
        Bx => {
            let m = Reg::from_bits((w >> 3) & 0xF);
            let target = e.get_register(m);
            e.bx_write_pc(target);
            e.set_term(if m == Reg::R14 { Terminal::PopRSBHint } else { Terminal::FastDispatchHint });
            Step::Stop
        }
        BlxReg => {
            let m = Reg::from_bits((w >> 3) & 0xF);
            let target = e.get_register(m);
            let lr = e.pc().wrapping_add(2) | 1;
            e.set_register(Reg::R14, Value::ImmU32(lr));
            let ret = e.current_location.advance_pc(2);
            e.ir.push_rsb(ret.to_location().value());
            e.bx_write_pc(target);
            e.set_term(Terminal::FastDispatchHint);
            Step::Stop
        }
        LdrLiteral => {
            let base = (e.pc().wrapping_add(4)) & !3;
            let address = base.wrapping_add((w & 0xFF) * 4);
            let value = e.read_memory_32(Value::ImmU32(address), AccType::Normal);
            e.set_register(low_reg(w >> 8), value);
            Step::Continue
        }
        LdrStrReg => ldr_str_reg(e, w),
        StrImm5 | LdrImm5 | StrbImm5 | LdrbImm5 | StrhImm5 | LdrhImm5 => {
            ldr_str_imm5(e, matcher.inst, w)
        }
        StrSp | LdrSp => {
            let sp = e.get_register(Reg::R13);
            let offset = Value::ImmU32((w & 0xFF) * 4);
            let address = e.ir.add_32(sp, offset, Value::ImmU1(false));
            let rt = low_reg(w >> 8);
            if matcher.inst == LdrSp {
                let value = e.read_memory_32(address, AccType::Normal);
                e.set_register(rt, value);
            } else {
                let value = e.get_register(rt);
                e.write_memory_32(address, value, AccType::Normal);
            }
            Step::Continue
        }
        Adr => {
            let base = (e.pc().wrapping_add(4)) & !3;
            let result = base.wrapping_add((w & 0xFF) * 4);
            e.set_register(low_reg(w >> 8), Value::ImmU32(result));
            Step::Continue
        }
        AddSpT1 => {
            let sp = e.get_register(Reg::R13);
            let result = e.ir.add_32(sp, Value::ImmU32((w & 0xFF) * 4), Value::ImmU1(false));
            e.set_register(low_reg(w >> 8), result);
            Step::Continue
        }
        AddSpImm7 | SubSpImm7 => {
            let sp = e.get_register(Reg::R13);
            let imm = Value::ImmU32((w & 0x7F) * 4);
            let result = if matcher.inst == AddSpImm7 {
                e.ir.add_32(sp, imm, Value::ImmU1(false))
            } else {
                e.ir.sub_32(sp, imm, Value::ImmU1(true))
            };
            e.set_register(Reg::R13, result);
            Step::Continue
        }
        Sxth => extend(e, w, true, false),
        Sxtb => extend(e, w, true, true),
        Uxth => extend(e, w, false, false),
        Uxtb => extend(e, w, false, true),
        Cbz | Cbnz => {
            let n = e.get_register(low_reg(w));
            let imm = (((w >> 9) & 1) << 6) | (((w >> 3) & 0x1F) << 1);
            let target = e.pc().wrapping_add(4).wrapping_add(imm);
            let is_zero = e.ir.is_zero_32(n);
            e.set_check_bit(is_zero);
            let taken = e.current_location.set_pc(target).to_location();
            let not_taken = e.current_location.advance_pc(2).to_location();
            let (then_, else_) = if matcher.inst == Cbz {
                (Terminal::LinkBlock { next: taken }, Terminal::LinkBlock { next: not_taken })
            } else {
                (Terminal::LinkBlock { next: not_taken }, Terminal::LinkBlock { next: taken })
            };
            e.set_term(Terminal::check_bit(then_, else_));
            Step::Stop
        }
        Push => {
            let mut list = (w & 0xFF) as u16;
            if w & 0x100 != 0 {
                list |= 1 << 14; // LR
            }
            push_pop(e, list, true)
        }
        Pop => {
            let mut list = (w & 0xFF) as u16;
            if w & 0x100 != 0 {
                list |= 1 << 15; // PC
            }
            push_pop(e, list, false)
        }
        Rev => {
            let m = e.get_register(low_reg(w >> 3));
            let result = e.ir.byte_reverse_word(m);
            e.set_register(low_reg(w), result);
            Step::Continue
        }
        Rev16 => {
            let m = e.get_register(low_reg(w >> 3));
            let lo = e.ir.and_32(m, Value::ImmU32(0x00FF_00FF));
            let lo = e.ir.logical_shift_left_masked_32(lo, Value::ImmU32(8));
            let hi = e.ir.logical_shift_right_masked_32(m, Value::ImmU32(8));
            let hi = e.ir.and_32(hi, Value::ImmU32(0x00FF_00FF));
            let result = e.ir.or_32(lo, hi);
            e.set_register(low_reg(w), result);
            Step::Continue
        }
        Revsh => {
            let m = e.get_register(low_reg(w >> 3));
            let half = e.ir.least_significant_half(m);
            let swapped = e.ir.byte_reverse_half(half);
            let result = e.ir.sign_extend_half_to_word(swapped);
            e.set_register(low_reg(w), result);
            Step::Continue
        }
        Bkpt => {
            e.exception_raised(Exception::Breakpoint);
            e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
            Step::Stop
        }
        Nop | Sev => Step::Continue,
        Yield => super::status_register::hint_exception(e, Exception::Yield),
        Wfe => super::status_register::hint_exception(e, Exception::WaitForEvent),
        Wfi => super::status_register::hint_exception(e, Exception::WaitForInterrupt),
        It => {
            let new_it = ItState::new((w & 0xFF) as u8);
            let next = e.current_location.advance_pc(2).set_it(new_it);
            e.update_upper_location_descriptor(next.upper_location_descriptor());
            e.set_term(Terminal::LinkBlock { next: next.to_location() });
            Step::Stop
        }
        Stm => {
            let rn = low_reg(w >> 8);
            let list = (w & 0xFF) as u16;
            if list == 0 {
                return super::raise_undefined(e);
            }
            let mut address = e.get_register(rn);
            for bit in 0..8u32 {
                if list & (1 << bit) == 0 {
                    continue;
                }
                let value = e.get_register(low_reg(bit));
                e.write_memory_32(address, value, AccType::Normal);
                address = e.ir.add_32(address, Value::ImmU32(4), Value::ImmU1(false));
            }
            e.set_register(rn, address);
            Step::Continue
        }
        Ldm => {
            let rn = low_reg(w >> 8);
            let list = (w & 0xFF) as u16;
            if list == 0 {
                return super::raise_undefined(e);
            }
            let mut address = e.get_register(rn);
            for bit in 0..8u32 {
                if list & (1 << bit) == 0 {
                    continue;
                }
                let value = e.read_memory_32(address, AccType::Normal);
                e.set_register(low_reg(bit), value);
                address = e.ir.add_32(address, Value::ImmU32(4), Value::ImmU1(false));
            }
            if list & (1 << rn.number()) == 0 {
                e.set_register(rn, address);
            }
            Step::Continue
        }
        Udf => super::raise_undefined(e),
        Svc => {
            let next_pc = e.pc().wrapping_add(2);
            e.branch_write_pc(Value::ImmU32(next_pc | 1));
            let ret = e.current_location.set_pc(next_pc);
            e.ir.push_rsb(ret.to_location().value());
            e.call_supervisor(Value::ImmU32(w & 0xFF));
            e.set_term(Terminal::check_halt(Terminal::PopRSBHint));
            Step::Stop
        }
        BCond => {
            // The block-level condition mechanism has already admitted
            // this instruction; emit the branch body unconditionally.
            let _cond = Cond::from_bits(w >> 8);
            let offset = sign_extend(w & 0xFF, 8) << 1;
            let target = e.pc().wrapping_add(4).wrapping_add(offset as u32);
            let next = e.current_location.set_pc(target).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
        B => {
            let offset = sign_extend(w & 0x7FF, 11) << 1;
            let target = e.pc().wrapping_add(4).wrapping_add(offset as u32);
            let next = e.current_location.set_pc(target).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
    }
}

fn dp(e: &mut A32IrEmitter, w: u32) -> Step {
    let op = (w >> 6) & 0xF;
    let rd = low_reg(w);
    let rm = low_reg(w >> 3);
    let d = e.get_register(rd);
    let m = e.get_register(rm);
    let s = sets_flags(e);

    match op {
        0b0000 => {
            let result = e.ir.and_32(d, m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
        0b0001 => {
            let result = e.ir.eor_32(d, m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
        0b0010 | 0b0011 | 0b0100 | 0b0111 => {
            let shift_type = match op {
                0b0010 => ShiftType::LSL,
                0b0011 => ShiftType::LSR,
                0b0100 => ShiftType::ASR,
                _ => ShiftType::ROR,
            };
            let carry_in = e.get_c_flag();
            let shifted = emit_reg_shift(e, d, shift_type, m, carry_in);
            if s {
                set_nzc(e, shifted.value, shifted.carry);
            }
            e.set_register(rd, shifted.value);
        }
        0b0101 => {
            let c = e.get_c_flag();
            let result = e.ir.add_32(d, m, c);
            if s {
                set_nzcv(e, result);
            }
            e.set_register(rd, result);
        }
        0b0110 => {
            let c = e.get_c_flag();
            let result = e.ir.sub_32(d, m, c);
            if s {
                set_nzcv(e, result);
            }
            e.set_register(rd, result);
        }
        0b1000 => {
            let result = e.ir.and_32(d, m);
            set_nz(e, result);
        }
        0b1001 => {
            let neg = e.ir.sub_32(Value::ImmU32(0), m, Value::ImmU1(true));
            if s {
                set_nzcv(e, neg);
            }
            e.set_register(rd, neg);
        }
        0b1010 => {
            let result = e.ir.sub_32(d, m, Value::ImmU1(true));
            set_nzcv(e, result);
        }
        0b1011 => {
            let result = e.ir.add_32(d, m, Value::ImmU1(false));
            set_nzcv(e, result);
        }
        0b1100 => {
            let result = e.ir.or_32(d, m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
        0b1101 => {
            let result = e.ir.mul_32(d, m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
        0b1110 => {
            let result = e.ir.and_not_32(d, m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
        _ => {
            let result = e.ir.not_32(m);
            if s {
                set_nz(e, result);
            }
            e.set_register(rd, result);
        }
    }
    Step::Continue
}

fn ldr_str_reg(e: &mut A32IrEmitter, w: u32) -> Step {
    let op = (w >> 9) & 7;
    let rm = e.get_register(low_reg(w >> 6));
    let rn = e.get_register(low_reg(w >> 3));
    let rt = low_reg(w);
    let address = e.ir.add_32(rn, rm, Value::ImmU1(false));
    match op {
        0b000 => {
            let value = e.get_register(rt);
            e.write_memory_32(address, value, AccType::Normal);
        }
        0b001 => {
            let value = e.get_register(rt);
            let half = e.ir.least_significant_half(value);
            e.write_memory_16(address, half, AccType::Normal);
        }
        0b010 => {
            let value = e.get_register(rt);
            let byte = e.ir.least_significant_byte(value);
            e.write_memory_8(address, byte, AccType::Normal);
        }
        0b011 => {
            let byte = e.read_memory_8(address, AccType::Normal);
            let value = e.ir.sign_extend_byte_to_word(byte);
            e.set_register(rt, value);
        }
        0b100 => {
            let value = e.read_memory_32(address, AccType::Normal);
            e.set_register(rt, value);
        }
        0b101 => {
            let half = e.read_memory_16(address, AccType::Normal);
            let value = e.ir.zero_extend_half_to_word(half);
            e.set_register(rt, value);
        }
        0b110 => {
            let byte = e.read_memory_8(address, AccType::Normal);
            let value = e.ir.zero_extend_byte_to_word(byte);
            e.set_register(rt, value);
        }
        _ => {
            let half = e.read_memory_16(address, AccType::Normal);
            let value = e.ir.sign_extend_half_to_word(half);
            e.set_register(rt, value);
        }
    }
    Step::Continue
}

fn ldr_str_imm5(e: &mut A32IrEmitter, inst: Thumb16Inst, w: u32) -> Step {
    use Thumb16Inst::*;
    let imm5 = (w >> 6) & 0x1F;
    let scale = match inst {
        StrImm5 | LdrImm5 => 4,
        StrhImm5 | LdrhImm5 => 2,
        _ => 1,
    };
    let rn = e.get_register(low_reg(w >> 3));
    let rt = low_reg(w);
    let address = e.ir.add_32(rn, Value::ImmU32(imm5 * scale), Value::ImmU1(false));
    match inst {
        StrImm5 => {
            let value = e.get_register(rt);
            e.write_memory_32(address, value, AccType::Normal);
        }
        LdrImm5 => {
            let value = e.read_memory_32(address, AccType::Normal);
            e.set_register(rt, value);
        }
        StrbImm5 => {
            let value = e.get_register(rt);
            let byte = e.ir.least_significant_byte(value);
            e.write_memory_8(address, byte, AccType::Normal);
        }
        LdrbImm5 => {
            let byte = e.read_memory_8(address, AccType::Normal);
            let value = e.ir.zero_extend_byte_to_word(byte);
            e.set_register(rt, value);
        }
        StrhImm5 => {
            let value = e.get_register(rt);
            let half = e.ir.least_significant_half(value);
            e.write_memory_16(address, half, AccType::Normal);
        }
        _ => {
            let half = e.read_memory_16(address, AccType::Normal);
            let value = e.ir.zero_extend_half_to_word(half);
            e.set_register(rt, value);
        }
    }
    Step::Continue
}

fn extend(e: &mut A32IrEmitter, w: u32, signed: bool, byte: bool) -> Step {
    let m = e.get_register(low_reg(w >> 3));
    let result = match (signed, byte) {
        (true, true) => {
            let b = e.ir.least_significant_byte(m);
            e.ir.sign_extend_byte_to_word(b)
        }
        (true, false) => {
            let h = e.ir.least_significant_half(m);
            e.ir.sign_extend_half_to_word(h)
        }
        (false, true) => e.ir.and_32(m, Value::ImmU32(0xFF)),
        (false, false) => e.ir.and_32(m, Value::ImmU32(0xFFFF)),
    };
    e.set_register(low_reg(w), result);
    Step::Continue
}

fn push_pop(e: &mut A32IrEmitter, list: u16, store: bool) -> Step {
    let count = list.count_ones();
    if count == 0 {
        return super::raise_undefined(e);
    }
    let sp = e.get_register(Reg::R13);
    if store {
        let start = e.ir.sub_32(sp, Value::ImmU32(count * 4), Value::ImmU1(true));
        let mut address = start;
        for bit in 0..16u32 {
            if list & (1 << bit) == 0 {
                continue;
            }
            let value = e.get_register(Reg::from_bits(bit));
            e.write_memory_32(address, value, AccType::Normal);
            address = e.ir.add_32(address, Value::ImmU32(4), Value::ImmU1(false));
        }
        e.set_register(Reg::R13, start);
        Step::Continue
    } else {
        let mut address = sp;
        let mut pc_value = None;
        for bit in 0..16u32 {
            if list & (1 << bit) == 0 {
                continue;
            }
            let value = e.read_memory_32(address, AccType::Normal);
            if bit == 15 {
                pc_value = Some(value);
            } else {
                e.set_register(Reg::from_bits(bit), value);
            }
            address = e.ir.add_32(address, Value::ImmU32(4), Value::ImmU1(false));
        }
        e.set_register(Reg::R13, address);
        if let Some(value) = pc_value {
            e.load_write_pc(value);
            e.set_term(Terminal::PopRSBHint);
            return Step::Stop;
        }
        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    fn lift(hw: u16) -> Block {
        let loc = A32LocationDescriptor::at(0x1000).set_t_flag(true);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        translate(&mut e, hw);
        block
    }

    #[test]
    fn movs_sets_nz() {
        // MOVS r0, #1
        let block = lift(0x2001);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCpsrNZ));
    }

    #[test]
    fn pop_with_pc_is_return() {
        // POP {r4, pc}
        let block = lift(0xBD10);
        assert_eq!(block.terminal, Terminal::PopRSBHint);
    }

    #[test]
    fn it_ends_block_with_new_state() {
        // IT EQ
        let block = lift(0xBF08);
        match block.terminal {
            Terminal::LinkBlock { next } => {
                let loc = A32LocationDescriptor::from_location(next);
                assert!(loc.it().is_in_it_block());
                assert_eq!(loc.it().cond(), Cond::EQ);
            }
            ref other => panic!("unexpected terminal {other}"),
        }
    }

    #[test]
    fn cbz_uses_check_bit() {
        // CBZ r0, #+4
        let block = lift(0xB110);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCheckBit));
        assert!(matches!(block.terminal, Terminal::CheckBit { .. }));
    }
}
