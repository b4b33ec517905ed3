use std::collections::HashSet;

use crate::ir::block::Block;
use crate::ir::opcode::Opcode;
use crate::ir::value::{Index, Value};

/// Constant propagation and folding.
///
/// Instructions whose arguments are all immediates are folded to
/// immediates. Instructions that carry a pseudo-operation consumer (their
/// carry/overflow/flags side channel is observed) are left alone: folding
/// them would detach the side channel.
pub fn constant_propagation(block: &mut Block) {
    // Producers referenced by a live pseudo-operation.
    let mut flagged: HashSet<Index> = HashSet::new();
    for (_, inst) in block.iter_live() {
        if inst.opcode.is_pseudo_operation() {
            if let Value::Inst(producer) = inst.arg(0) {
                flagged.insert(producer);
            }
        }
    }

    for i in 0..block.instructions.len() {
        if block.instructions[i].is_tombstone() {
            continue;
        }
        let idx = Index(i as u32);

        // Identity forwards unconditionally.
        if block.instructions[i].opcode == Opcode::Identity {
            let arg = block.instructions[i].arg(0);
            block.replace_uses_with(idx, arg);
            continue;
        }

        if flagged.contains(&idx) {
            continue;
        }

        let inst = &block.instructions[i];
        if !inst.args().iter().all(|a| a.is_immediate()) {
            continue;
        }

        if let Some(folded) = fold(inst.opcode, inst.args()) {
            block.replace_uses_with(idx, folded);
        }
    }
}

fn fold(opcode: Opcode, args: &[Value]) -> Option<Value> {
    use Opcode::*;

    let v = |n: usize| args[n].imm_u64();
    let folded = match opcode {
        Add32 => Value::ImmU32((v(0) as u32).wrapping_add(v(1) as u32).wrapping_add(v(2) as u32)),
        Add64 => Value::ImmU64(v(0).wrapping_add(v(1)).wrapping_add(v(2))),
        Sub32 => Value::ImmU32(
            (v(0) as u32)
                .wrapping_sub(v(1) as u32)
                .wrapping_sub(1)
                .wrapping_add(v(2) as u32),
        ),
        Sub64 => Value::ImmU64(v(0).wrapping_sub(v(1)).wrapping_sub(1).wrapping_add(v(2))),
        Mul32 => Value::ImmU32((v(0) as u32).wrapping_mul(v(1) as u32)),
        Mul64 => Value::ImmU64(v(0).wrapping_mul(v(1))),
        And32 => Value::ImmU32(v(0) as u32 & v(1) as u32),
        And64 => Value::ImmU64(v(0) & v(1)),
        AndNot32 => Value::ImmU32(v(0) as u32 & !(v(1) as u32)),
        AndNot64 => Value::ImmU64(v(0) & !v(1)),
        Or32 => Value::ImmU32(v(0) as u32 | v(1) as u32),
        Or64 => Value::ImmU64(v(0) | v(1)),
        Eor32 => Value::ImmU32(v(0) as u32 ^ v(1) as u32),
        Eor64 => Value::ImmU64(v(0) ^ v(1)),
        Not32 => Value::ImmU32(!(v(0) as u32)),
        Not64 => Value::ImmU64(!v(0)),

        LogicalShiftLeftMasked32 => Value::ImmU32((v(0) as u32) << (v(1) as u32 & 31)),
        LogicalShiftLeftMasked64 => Value::ImmU64(v(0) << (v(1) & 63)),
        LogicalShiftRightMasked32 => Value::ImmU32((v(0) as u32) >> (v(1) as u32 & 31)),
        LogicalShiftRightMasked64 => Value::ImmU64(v(0) >> (v(1) & 63)),
        ArithmeticShiftRightMasked32 => {
            Value::ImmU32(((v(0) as u32 as i32) >> (v(1) as u32 & 31)) as u32)
        }
        ArithmeticShiftRightMasked64 => Value::ImmU64(((v(0) as i64) >> (v(1) & 63)) as u64),
        RotateRightMasked32 => Value::ImmU32((v(0) as u32).rotate_right(v(1) as u32 & 31)),
        RotateRightMasked64 => Value::ImmU64(v(0).rotate_right((v(1) & 63) as u32)),

        // A32 shift forms: shift amounts of 32 and above have defined
        // results that a masked host shift would get wrong.
        LogicalShiftLeft32 => {
            let shift = v(1) as u32;
            Value::ImmU32(if shift >= 32 { 0 } else { (v(0) as u32) << shift })
        }
        LogicalShiftRight32 => {
            let shift = v(1) as u32;
            Value::ImmU32(if shift >= 32 { 0 } else { (v(0) as u32) >> shift })
        }
        ArithmeticShiftRight32 => {
            let shift = (v(1) as u32).min(31);
            Value::ImmU32(((v(0) as u32 as i32) >> shift) as u32)
        }
        RotateRight32 => Value::ImmU32((v(0) as u32).rotate_right(v(1) as u32 & 31)),
        LogicalShiftLeft64 => {
            let shift = v(1);
            Value::ImmU64(if shift >= 64 { 0 } else { v(0) << shift })
        }
        LogicalShiftRight64 => {
            let shift = v(1);
            Value::ImmU64(if shift >= 64 { 0 } else { v(0) >> shift })
        }
        ArithmeticShiftRight64 => {
            let shift = v(1).min(63);
            Value::ImmU64(((v(0) as i64) >> shift) as u64)
        }
        RotateRight64 => Value::ImmU64(v(0).rotate_right((v(1) & 63) as u32)),

        SignExtendByteToWord => Value::ImmU32(v(0) as u8 as i8 as i32 as u32),
        SignExtendHalfToWord => Value::ImmU32(v(0) as u16 as i16 as i32 as u32),
        SignExtendByteToLong => Value::ImmU64(v(0) as u8 as i8 as i64 as u64),
        SignExtendHalfToLong => Value::ImmU64(v(0) as u16 as i16 as i64 as u64),
        SignExtendWordToLong => Value::ImmU64(v(0) as u32 as i32 as i64 as u64),
        ZeroExtendByteToWord => Value::ImmU32(v(0) as u8 as u32),
        ZeroExtendHalfToWord => Value::ImmU32(v(0) as u16 as u32),
        ZeroExtendByteToLong => Value::ImmU64(v(0) as u8 as u64),
        ZeroExtendHalfToLong => Value::ImmU64(v(0) as u16 as u64),
        ZeroExtendWordToLong => Value::ImmU64(v(0) as u32 as u64),

        ByteReverseWord => Value::ImmU32((v(0) as u32).swap_bytes()),
        ByteReverseHalf => Value::ImmU16((v(0) as u16).swap_bytes()),
        ByteReverseDual => Value::ImmU64(v(0).swap_bytes()),
        CountLeadingZeros32 => Value::ImmU32((v(0) as u32).leading_zeros()),
        CountLeadingZeros64 => Value::ImmU64(v(0).leading_zeros() as u64),

        Pack2x32To1x64 => Value::ImmU64((v(0) as u32 as u64) | ((v(1) as u32 as u64) << 32)),
        LeastSignificantWord => Value::ImmU32(v(0) as u32),
        MostSignificantWord => Value::ImmU32((v(0) >> 32) as u32),
        LeastSignificantHalf => Value::ImmU16(v(0) as u16),
        LeastSignificantByte => Value::ImmU8(v(0) as u8),
        MostSignificantBit => Value::ImmU1(v(0) as u32 >> 31 != 0),
        IsZero32 => Value::ImmU1(v(0) as u32 == 0),
        IsZero64 => Value::ImmU1(v(0) == 0),
        TestBit => Value::ImmU1(v(0) >> (v(1) & 63) & 1 != 0),

        ExtractRegister32 => {
            let shift = v(2) as u32 & 31;
            let lo = v(0) as u32;
            let hi = v(1) as u32;
            Value::ImmU32(if shift == 0 { lo } else { (lo >> shift) | (hi << (32 - shift)) })
        }
        ExtractRegister64 => {
            let shift = (v(2) & 63) as u32;
            let lo = v(0);
            let hi = v(1);
            Value::ImmU64(if shift == 0 { lo } else { (lo >> shift) | (hi << (64 - shift)) })
        }

        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::location::LocationDescriptor;

    #[test]
    fn folds_constant_add_chain() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let a = block.append(Opcode::Add32, &[Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false)]);
        let b = block.append(Opcode::Add32, &[Value::Inst(a), Value::ImmU32(10), Value::ImmU1(false)]);
        let set = block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R0), Value::Inst(b)],
        );

        constant_propagation(&mut block);

        assert!(block.get(a).is_tombstone());
        assert!(block.get(b).is_tombstone());
        assert_eq!(block.get(set).arg(1), Value::ImmU32(13));
    }

    #[test]
    fn does_not_fold_flag_producers() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let add = block.append(
            Opcode::Add32,
            &[Value::ImmU32(0xFFFF_FFFF), Value::ImmU32(1), Value::ImmU1(false)],
        );
        let _carry = block.append(Opcode::GetCarryFromOp, &[Value::Inst(add)]);

        constant_propagation(&mut block);

        assert!(!block.get(add).is_tombstone());
    }

    #[test]
    fn sub_uses_inverted_borrow() {
        // Sub with carry_in=1 is a plain subtract (ARM SBC convention).
        let mut block = Block::new(LocationDescriptor::new(0));
        let sub = block.append(Opcode::Sub32, &[Value::ImmU32(5), Value::ImmU32(3), Value::ImmU1(true)]);
        let set = block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R0), Value::Inst(sub)],
        );
        constant_propagation(&mut block);
        assert_eq!(block.get(set).arg(1), Value::ImmU32(2));
    }

    #[test]
    fn arm_shift_of_32_clears() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let shift = block.append(
            Opcode::LogicalShiftLeft32,
            &[Value::ImmU32(0xFFFF_FFFF), Value::ImmU8(32), Value::ImmU1(false)],
        );
        let set = block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R0), Value::Inst(shift)],
        );
        constant_propagation(&mut block);
        assert_eq!(block.get(set).arg(1), Value::ImmU32(0));
    }

    #[test]
    fn identity_is_removed() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let id = block.append(Opcode::Identity, &[Value::ImmU32(9)]);
        let set = block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R1), Value::Inst(id)],
        );
        constant_propagation(&mut block);
        assert!(block.get(id).is_tombstone());
        assert_eq!(block.get(set).arg(1), Value::ImmU32(9));
    }
}
