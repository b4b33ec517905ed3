use crate::config::Exception;
use crate::frontend::a32::decode::{arm_expand_imm_c, ArmFields};
use crate::frontend::a32::translate::helpers::{emit_imm_shift, emit_reg_shift, ShiftedOperand};
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DpOp {
    And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc,
    Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn,
}

impl DpOp {
    fn from_bits(bits: u32) -> DpOp {
        use DpOp::*;
        [And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc, Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn]
            [(bits & 0xF) as usize]
    }

    /// TST/TEQ/CMP/CMN write flags only.
    fn is_compare(self) -> bool {
        matches!(self, DpOp::Tst | DpOp::Teq | DpOp::Cmp | DpOp::Cmn)
    }

    /// Flag updates come from the ALU (NZCV) rather than NZ + shifter
    /// carry.
    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            DpOp::Sub | DpOp::Rsb | DpOp::Add | DpOp::Adc | DpOp::Sbc | DpOp::Rsc
                | DpOp::Cmp | DpOp::Cmn
        )
    }
}

pub fn dp_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    // The carry-out of immediate expansion only matters when the rotation
    // is non-zero; thread the real C flag through for the rotation-zero
    // case lazily.
    let rotation = ((f.imm12() >> 8) & 0xF) * 2;
    let carry_in = if rotation == 0 {
        None
    } else {
        let (_, carry) = arm_expand_imm_c(f.imm12(), false);
        Some(Value::ImmU1(carry))
    };
    let (imm, _) = arm_expand_imm_c(f.imm12(), false);
    let operand = ShiftedOperand {
        value: Value::ImmU32(imm),
        carry: carry_in.unwrap_or(Value::Void),
    };
    common(e, f, operand)
}

pub fn dp_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let op = DpOp::from_bits(f.dp_opcode());
    let rm = e.get_register(f.rm());
    let operand = if needs_shifter_carry(op, f.s_flag()) || shift_affects_value(f) {
        let carry_in = e.get_c_flag();
        emit_imm_shift(e, rm, f.shift_type(), f.imm5(), carry_in)
    } else {
        ShiftedOperand { value: rm, carry: Value::Void }
    };
    common(e, f, operand)
}

pub fn dp_rsr(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    if f.rd() == Reg::R15 || f.rn() == Reg::R15 || f.rm() == Reg::R15 || f.rs() == Reg::R15 {
        e.exception_raised(Exception::UnpredictableInstruction);
        e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
        return Step::Stop;
    }
    let rm = e.get_register(f.rm());
    let rs = e.get_register(f.rs());
    let carry_in = e.get_c_flag();
    let operand = emit_reg_shift(e, rm, f.shift_type(), rs, carry_in);
    common(e, f, operand)
}

fn needs_shifter_carry(op: DpOp, s: bool) -> bool {
    s && !op.is_arithmetic()
}

fn shift_affects_value(f: ArmFields) -> bool {
    f.imm5() != 0 || f.shift_type() != crate::frontend::a32::types::ShiftType::LSL
}

fn common(e: &mut A32IrEmitter, f: ArmFields, operand: ShiftedOperand) -> Step {
    let op = DpOp::from_bits(f.dp_opcode());
    let s = f.s_flag();
    let rd = f.rd();

    // For the immediate form with rotation 0 the shifter carry is the
    // current C flag; materialize it only if a flag write needs it.
    let shifter_carry = |e: &mut A32IrEmitter, operand: &ShiftedOperand| {
        if operand.carry == Value::Void {
            e.get_c_flag()
        } else {
            operand.carry
        }
    };

    let one = Value::ImmU1(true);
    let zero = Value::ImmU1(false);

    let result = match op {
        DpOp::And | DpOp::Tst => {
            let rn = e.get_register(f.rn());
            e.ir.and_32(rn, operand.value)
        }
        DpOp::Eor | DpOp::Teq => {
            let rn = e.get_register(f.rn());
            e.ir.eor_32(rn, operand.value)
        }
        DpOp::Sub | DpOp::Cmp => {
            let rn = e.get_register(f.rn());
            e.ir.sub_32(rn, operand.value, one)
        }
        DpOp::Rsb => {
            let rn = e.get_register(f.rn());
            e.ir.sub_32(operand.value, rn, one)
        }
        DpOp::Add | DpOp::Cmn => {
            let rn = e.get_register(f.rn());
            e.ir.add_32(rn, operand.value, zero)
        }
        DpOp::Adc => {
            let rn = e.get_register(f.rn());
            let c = e.get_c_flag();
            e.ir.add_32(rn, operand.value, c)
        }
        DpOp::Sbc => {
            let rn = e.get_register(f.rn());
            let c = e.get_c_flag();
            e.ir.sub_32(rn, operand.value, c)
        }
        DpOp::Rsc => {
            let rn = e.get_register(f.rn());
            let c = e.get_c_flag();
            e.ir.sub_32(operand.value, rn, c)
        }
        DpOp::Orr => {
            let rn = e.get_register(f.rn());
            e.ir.or_32(rn, operand.value)
        }
        DpOp::Mov => operand.value,
        DpOp::Bic => {
            let rn = e.get_register(f.rn());
            e.ir.and_not_32(rn, operand.value)
        }
        DpOp::Mvn => e.ir.not_32(operand.value),
    };

    if s {
        if op.is_arithmetic() {
            let nzcv = e.ir.get_nzcv_from_op(result);
            e.set_cpsr_nzcv(nzcv);
        } else {
            let carry = shifter_carry(e, &operand);
            let nzcv = e.ir.get_nzcv_from_op(result);
            e.set_cpsr_nzc(nzcv, carry);
        }
    }

    if op.is_compare() {
        return Step::Continue;
    }

    if rd == Reg::R15 {
        if s {
            // SPSR restore is not available outside exception modes.
            e.exception_raised(Exception::UnpredictableInstruction);
            e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
            return Step::Stop;
        }
        e.alu_write_pc(result);
        // `MOV pc, lr` is the canonical non-BX return.
        let is_return =
            op == DpOp::Mov && f.rm() == Reg::R14 && !shift_affects_value(f) && f.0 & (1 << 25) == 0;
        e.set_term(if is_return { Terminal::PopRSBHint } else { Terminal::FastDispatchHint });
        return Step::Stop;
    }

    e.set_register(rd, result);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    fn lift(word: u32) -> Block {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        let f = ArmFields(word);
        match word >> 25 & 7 {
            0b001 => dp_imm(&mut e, f),
            0b000 if word & 0x90 != 0x10 => dp_reg(&mut e, f),
            _ => dp_rsr(&mut e, f),
        };
        block
    }

    #[test]
    fn adds_sets_nzcv() {
        // ADDS R0, R1, R2
        let block = lift(0xE091_0002);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::GetNZCVFromOp));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCpsrNZCV));
    }

    #[test]
    fn movs_with_shift_uses_shifter_carry() {
        // MOVS R0, R1, LSL #1
        let block = lift(0xE1B0_0081);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::GetCarryFromOp));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCpsrNZC));
    }

    #[test]
    fn cmp_has_no_register_write() {
        // CMP R0, #5
        let block = lift(0xE350_0005);
        assert!(!block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetRegister));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCpsrNZCV));
    }

    #[test]
    fn mov_pc_lr_predicts_return() {
        let block = lift(0xE1A0_F00E);
        assert_eq!(block.terminal, Terminal::PopRSBHint);
    }
}
