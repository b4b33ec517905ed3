use crate::frontend::a32::types::ShiftType;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::value::Value;

/// Result of an operand-2 computation: the shifted value and the shifter
/// carry-out (which may just be the incoming carry).
pub struct ShiftedOperand {
    pub value: Value,
    pub carry: Value,
}

/// Apply an immediate-encoded shift, following the A32 decode rules for
/// the `imm5 == 0` special cases (LSR/ASR by 32, RRX).
pub fn emit_imm_shift(
    e: &mut A32IrEmitter,
    value: Value,
    shift_type: ShiftType,
    imm5: u32,
    carry_in: Value,
) -> ShiftedOperand {
    match (shift_type, imm5) {
        (ShiftType::LSL, 0) => ShiftedOperand { value, carry: carry_in },
        (ShiftType::LSL, n) => {
            let result = e.ir.logical_shift_left_32(value, Value::ImmU8(n as u8), carry_in);
            let carry = e.ir.get_carry_from_op(result);
            ShiftedOperand { value: result, carry }
        }
        (ShiftType::LSR, n) => {
            let n = if n == 0 { 32 } else { n };
            let result = e.ir.logical_shift_right_32(value, Value::ImmU8(n as u8), carry_in);
            let carry = e.ir.get_carry_from_op(result);
            ShiftedOperand { value: result, carry }
        }
        (ShiftType::ASR, n) => {
            let n = if n == 0 { 32 } else { n };
            let result = e.ir.arithmetic_shift_right_32(value, Value::ImmU8(n as u8), carry_in);
            let carry = e.ir.get_carry_from_op(result);
            ShiftedOperand { value: result, carry }
        }
        (ShiftType::ROR, 0) => {
            let result = e.ir.rotate_right_extended(value, carry_in);
            let carry = e.ir.get_carry_from_op(result);
            ShiftedOperand { value: result, carry }
        }
        (ShiftType::ROR, n) => {
            let result = e.ir.rotate_right_32(value, Value::ImmU8(n as u8), carry_in);
            let carry = e.ir.get_carry_from_op(result);
            ShiftedOperand { value: result, carry }
        }
    }
}

/// Apply a register-specified shift (bottom byte of Rs).
pub fn emit_reg_shift(
    e: &mut A32IrEmitter,
    value: Value,
    shift_type: ShiftType,
    shift_reg: Value,
    carry_in: Value,
) -> ShiftedOperand {
    let amount = e.ir.least_significant_byte(shift_reg);
    let result = match shift_type {
        ShiftType::LSL => e.ir.logical_shift_left_32(value, amount, carry_in),
        ShiftType::LSR => e.ir.logical_shift_right_32(value, amount, carry_in),
        ShiftType::ASR => e.ir.arithmetic_shift_right_32(value, amount, carry_in),
        ShiftType::ROR => e.ir.rotate_right_32(value, amount, carry_in),
    };
    let carry = e.ir.get_carry_from_op(result);
    ShiftedOperand { value: result, carry }
}

/// Sign-extend a fixed-width immediate.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extend_widths() {
        assert_eq!(sign_extend(0xFFF, 12), -1);
        assert_eq!(sign_extend(0x7FF, 12), 0x7FF);
        assert_eq!(sign_extend(0x80_0000, 24), -0x80_0000);
    }
}
