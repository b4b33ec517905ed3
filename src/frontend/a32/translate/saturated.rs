use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::Step;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::value::Value;

// Saturating add/sub field layout: Rn (the second operand of the
// saturating addition) at 19:16, Rd at 15:12, Rm at 3:0.

pub fn qadd(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let n = e.get_register(f.rn());
    let result = e.ir.signed_saturated_add_32(m, n);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn qsub(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let n = e.get_register(f.rn());
    let result = e.ir.signed_saturated_sub_32(m, n);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

/// QDADD: `sat(Rm + sat(2 * Rn))`, each saturation latching Q.
pub fn qdadd(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let n = e.get_register(f.rn());
    let doubled = e.ir.signed_saturated_add_32(n, n);
    let overflow = e.ir.get_overflow_from_op(doubled);
    e.or_q_flag(overflow);
    let result = e.ir.signed_saturated_add_32(m, doubled);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn qdsub(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let n = e.get_register(f.rn());
    let doubled = e.ir.signed_saturated_add_32(n, n);
    let overflow = e.ir.get_overflow_from_op(doubled);
    e.or_q_flag(overflow);
    let result = e.ir.signed_saturated_sub_32(m, doubled);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

/// SSAT: saturate a shifted operand to a signed `sat_to`-bit range.
pub fn ssat(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let sat_to = ((f.0 >> 16) & 0x1F) + 1;
    let imm5 = f.imm5();
    let sh = (f.0 >> 6) & 1;
    let rn = e.get_register(f.rm());
    let operand = if sh == 1 {
        let amount = if imm5 == 0 { 31 } else { imm5 };
        e.ir.arithmetic_shift_right_masked_32(rn, Value::ImmU32(amount))
    } else {
        e.ir.logical_shift_left_masked_32(rn, Value::ImmU32(imm5))
    };
    let result = e.ir.signed_saturation(operand, sat_to as u8);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

/// USAT: saturate a shifted operand to an unsigned `sat_to`-bit range.
pub fn usat(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let sat_to = (f.0 >> 16) & 0x1F;
    let imm5 = f.imm5();
    let sh = (f.0 >> 6) & 1;
    let rn = e.get_register(f.rm());
    let operand = if sh == 1 {
        let amount = if imm5 == 0 { 31 } else { imm5 };
        e.ir.arithmetic_shift_right_masked_32(rn, Value::ImmU32(amount))
    } else {
        e.ir.logical_shift_left_masked_32(rn, Value::ImmU32(imm5))
    };
    let result = e.ir.unsigned_saturation(operand, sat_to as u8);
    let overflow = e.ir.get_overflow_from_op(result);
    e.or_q_flag(overflow);
    e.set_register(f.rd(), result);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn qadd_latches_q_through_overflow_pseudo() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // QADD R0, R1, R2
        qadd(&mut e, ArmFields(0xE102_0051));
        let add = block
            .iter_live()
            .find(|(_, i)| i.opcode == Opcode::SignedSaturatedAdd32)
            .unwrap()
            .0;
        assert_eq!(
            block.associated_pseudo_operation(add, Opcode::GetOverflowFromOp).is_some(),
            true
        );
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32OrQFlag));
    }

    #[test]
    fn qdadd_saturates_twice() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        qdadd(&mut e, ArmFields(0xE142_0051));
        let count = block
            .iter_live()
            .filter(|(_, i)| i.opcode == Opcode::SignedSaturatedAdd32)
            .count();
        assert_eq!(count, 2);
    }
}
