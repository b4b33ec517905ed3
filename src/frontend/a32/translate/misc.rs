use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::Step;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::value::Value;

pub fn clz(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let result = e.ir.count_leading_zeros_32(m);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn movw(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    e.set_register(f.rd(), Value::ImmU32(f.imm16()));
    Step::Continue
}

pub fn movt(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rd = e.get_register(f.rd());
    let low = e.ir.and_32(rd, Value::ImmU32(0x0000_FFFF));
    let result = e.ir.or_32(low, Value::ImmU32(f.imm16() << 16));
    e.set_register(f.rd(), result);
    Step::Continue
}

// --- Bit field ---

fn bf_positions(f: ArmFields) -> (u32, u32) {
    let lsb = (f.0 >> 7) & 0x1F;
    let msb = (f.0 >> 16) & 0x1F;
    (lsb, msb)
}

pub fn bfc(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let (lsb, msb) = bf_positions(f);
    if msb < lsb {
        return super::raise_undefined(e);
    }
    let mask = bit_mask(lsb, msb);
    let rd = e.get_register(f.rd());
    let result = e.ir.and_32(rd, Value::ImmU32(!mask));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn bfi(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let (lsb, msb) = bf_positions(f);
    if msb < lsb {
        return super::raise_undefined(e);
    }
    let mask = bit_mask(lsb, msb);
    let rd = e.get_register(f.rd());
    let rn = e.get_register(f.rm());
    let cleared = e.ir.and_32(rd, Value::ImmU32(!mask));
    let shifted = e.ir.logical_shift_left_masked_32(rn, Value::ImmU32(lsb));
    let field = e.ir.and_32(shifted, Value::ImmU32(mask));
    let result = e.ir.or_32(cleared, field);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn sbfx(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let lsb = (f.0 >> 7) & 0x1F;
    let width = ((f.0 >> 16) & 0x1F) + 1;
    if lsb + width > 32 {
        return super::raise_undefined(e);
    }
    let rn = e.get_register(f.rm());
    let left = e.ir.logical_shift_left_masked_32(rn, Value::ImmU32(32 - lsb - width));
    let result = e.ir.arithmetic_shift_right_masked_32(left, Value::ImmU32(32 - width));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn ubfx(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let lsb = (f.0 >> 7) & 0x1F;
    let width = ((f.0 >> 16) & 0x1F) + 1;
    if lsb + width > 32 {
        return super::raise_undefined(e);
    }
    let rn = e.get_register(f.rm());
    let shifted = e.ir.logical_shift_right_masked_32(rn, Value::ImmU32(lsb));
    let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
    let result = e.ir.and_32(shifted, Value::ImmU32(mask));
    e.set_register(f.rd(), result);
    Step::Continue
}

fn bit_mask(lsb: u32, msb: u32) -> u32 {
    let width = msb - lsb + 1;
    let ones = if width == 32 { u32::MAX } else { (1 << width) - 1 };
    ones << lsb
}

// --- Extension ---

fn rotated_rm(e: &mut A32IrEmitter, f: ArmFields) -> Value {
    let rotation = ((f.0 >> 10) & 3) * 8;
    let rm = e.get_register(f.rm());
    if rotation == 0 {
        rm
    } else {
        e.ir.rotate_right_masked_32(rm, Value::ImmU32(rotation))
    }
}

pub fn sxtb(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let byte = e.ir.least_significant_byte(rotated);
    let result = e.ir.sign_extend_byte_to_word(byte);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn sxth(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let half = e.ir.least_significant_half(rotated);
    let result = e.ir.sign_extend_half_to_word(half);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn uxtb(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let result = e.ir.and_32(rotated, Value::ImmU32(0xFF));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn uxth(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let result = e.ir.and_32(rotated, Value::ImmU32(0xFFFF));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn sxtab(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let byte = e.ir.least_significant_byte(rotated);
    let extended = e.ir.sign_extend_byte_to_word(byte);
    let rn = e.get_register(f.rn());
    let result = e.ir.add_32(rn, extended, Value::ImmU1(false));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn sxtah(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let half = e.ir.least_significant_half(rotated);
    let extended = e.ir.sign_extend_half_to_word(half);
    let rn = e.get_register(f.rn());
    let result = e.ir.add_32(rn, extended, Value::ImmU1(false));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn uxtab(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let extended = e.ir.and_32(rotated, Value::ImmU32(0xFF));
    let rn = e.get_register(f.rn());
    let result = e.ir.add_32(rn, extended, Value::ImmU1(false));
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn uxtah(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rotated = rotated_rm(e, f);
    let extended = e.ir.and_32(rotated, Value::ImmU32(0xFFFF));
    let rn = e.get_register(f.rn());
    let result = e.ir.add_32(rn, extended, Value::ImmU1(false));
    e.set_register(f.rd(), result);
    Step::Continue
}

// --- Reversal ---

pub fn rev(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let result = e.ir.byte_reverse_word(m);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn rev16(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let lo = e.ir.and_32(m, Value::ImmU32(0x00FF_00FF));
    let lo = e.ir.logical_shift_left_masked_32(lo, Value::ImmU32(8));
    let hi = e.ir.logical_shift_right_masked_32(m, Value::ImmU32(8));
    let hi = e.ir.and_32(hi, Value::ImmU32(0x00FF_00FF));
    let result = e.ir.or_32(lo, hi);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn revsh(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let half = e.ir.least_significant_half(m);
    let swapped = e.ir.byte_reverse_half(half);
    let result = e.ir.sign_extend_half_to_word(swapped);
    e.set_register(f.rd(), result);
    Step::Continue
}

pub fn rbit(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let m = e.get_register(f.rm());
    let result = e.ir.bit_reverse_32(m);
    e.set_register(f.rd(), result);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    fn lift(word: u32, go: fn(&mut A32IrEmitter, ArmFields) -> Step) -> Block {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        go(&mut e, ArmFields(word));
        block
    }

    #[test]
    fn movw_is_constant_store() {
        // MOVW R0, #0x1234
        let block = lift(0xE301_0234, movw);
        let set = block.instructions.last().unwrap();
        assert_eq!(set.arg(1), Value::ImmU32(0x1234));
    }

    #[test]
    fn ubfx_masks_extracted_field() {
        // UBFX R0, R1, #4, #8
        let block = lift(0xE7E7_0251, ubfx);
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::And32 && i.arg(1) == Value::ImmU32(0xFF)
        }));
    }

    #[test]
    fn bit_mask_ranges() {
        assert_eq!(bit_mask(0, 7), 0xFF);
        assert_eq!(bit_mask(8, 15), 0xFF00);
        assert_eq!(bit_mask(0, 31), u32::MAX);
    }
}
