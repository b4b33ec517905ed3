use crate::frontend::a64::decode::A64Inst;
use crate::frontend::a64::translate::helpers::*;
use crate::frontend::a64::translate::{BitfieldOp, CselOp, LogicalOp, MoveWideOp, Step};
use crate::frontend::a64::types::ExtendType;
use crate::ir::a64_emitter::A64IrEmitter;
use crate::ir::cond::Cond;
use crate::ir::value::Value;

pub fn adr(e: &mut A64IrEmitter, word: u32, page: bool) -> Step {
    let immlo = (word >> 29) & 3;
    let immhi = (word >> 5) & 0x7FFFF;
    let imm = sign_extend(((immhi << 2) | immlo) as u64, 21);
    let result = if page {
        (e.pc() & !0xFFF).wrapping_add((imm << 12) as u64)
    } else {
        e.pc().wrapping_add(imm as u64)
    };
    e.set_x(rd(word), Value::ImmU64(result));
    Step::Continue
}

pub fn add_sub_imm(e: &mut A64IrEmitter, word: u32, subtract: bool, setflags: bool) -> Step {
    let sf64 = sf(word);
    let shift = (word >> 22) & 3;
    if shift > 1 {
        return super::raise_undefined(e);
    }
    let imm12 = ((word >> 10) & 0xFFF) << (12 * shift);

    let operand1 = get_rn_or_sp(e, sf64, rn(word));
    let (imm, carry) = if sf64 {
        (Value::ImmU64(imm12 as u64), Value::ImmU1(subtract))
    } else {
        (Value::ImmU32(imm12), Value::ImmU1(subtract))
    };
    let result = match (sf64, subtract) {
        (true, false) => e.ir.add_64(operand1, imm, Value::ImmU1(false)),
        (true, true) => e.ir.sub_64(operand1, imm, carry),
        (false, false) => e.ir.add_32(operand1, imm, Value::ImmU1(false)),
        (false, true) => e.ir.sub_32(operand1, imm, carry),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
        set_reg(e, sf64, rd(word), result);
    } else {
        set_rd_or_sp(e, sf64, rd(word), result);
    }
    Step::Continue
}

fn shifted_operand(e: &mut A64IrEmitter, word: u32, sf64: bool) -> Option<Value> {
    let shift_type = (word >> 22) & 3;
    let amount = (word >> 10) & 0x3F;
    if !sf64 && amount >= 32 {
        return None;
    }
    let m = get_reg(e, sf64, rm(word));
    let amount = if sf64 {
        Value::ImmU64(amount as u64)
    } else {
        Value::ImmU32(amount)
    };
    let shifted = match (shift_type, sf64) {
        (0, true) => e.ir.logical_shift_left_masked_64(m, amount),
        (0, false) => e.ir.logical_shift_left_masked_32(m, amount),
        (1, true) => e.ir.logical_shift_right_masked_64(m, amount),
        (1, false) => e.ir.logical_shift_right_masked_32(m, amount),
        (2, true) => e.ir.arithmetic_shift_right_masked_64(m, amount),
        (2, false) => e.ir.arithmetic_shift_right_masked_32(m, amount),
        (_, true) => e.ir.rotate_right_masked_64(m, amount),
        (_, false) => e.ir.rotate_right_masked_32(m, amount),
    };
    Some(shifted)
}

pub fn add_sub_shift(e: &mut A64IrEmitter, word: u32, subtract: bool, setflags: bool) -> Step {
    let sf64 = sf(word);
    // ROR is reserved for add/sub.
    if (word >> 22) & 3 == 3 {
        return super::raise_undefined(e);
    }
    let Some(operand2) = shifted_operand(e, word, sf64) else {
        return super::raise_undefined(e);
    };
    let operand1 = get_reg(e, sf64, rn(word));
    let result = match (sf64, subtract) {
        (true, false) => e.ir.add_64(operand1, operand2, Value::ImmU1(false)),
        (true, true) => e.ir.sub_64(operand1, operand2, Value::ImmU1(true)),
        (false, false) => e.ir.add_32(operand1, operand2, Value::ImmU1(false)),
        (false, true) => e.ir.sub_32(operand1, operand2, Value::ImmU1(true)),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
    }
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn add_sub_ext(e: &mut A64IrEmitter, word: u32, subtract: bool, setflags: bool) -> Step {
    let sf64 = sf(word);
    let extend = ExtendType::from_bits(word >> 13);
    let shift = (word >> 10) & 7;
    if shift > 4 {
        return super::raise_undefined(e);
    }

    // Extract and extend Rm to the operation width, then shift.
    let m64 = e.get_x(rm(word));
    let extended = match extend {
        ExtendType::UXTB => {
            let b = e.ir.least_significant_word(m64);
            let b = e.ir.and_32(b, Value::ImmU32(0xFF));
            e.ir.zero_extend_word_to_long(b)
        }
        ExtendType::UXTH => {
            let h = e.ir.least_significant_word(m64);
            let h = e.ir.and_32(h, Value::ImmU32(0xFFFF));
            e.ir.zero_extend_word_to_long(h)
        }
        ExtendType::UXTW => {
            let w = e.ir.least_significant_word(m64);
            e.ir.zero_extend_word_to_long(w)
        }
        ExtendType::UXTX => m64,
        ExtendType::SXTB => {
            let w = e.ir.least_significant_word(m64);
            let b = e.ir.least_significant_byte(w);
            e.ir.sign_extend_byte_to_long(b)
        }
        ExtendType::SXTH => {
            let w = e.ir.least_significant_word(m64);
            let h = e.ir.least_significant_half(w);
            e.ir.sign_extend_half_to_long(h)
        }
        ExtendType::SXTW => {
            let w = e.ir.least_significant_word(m64);
            e.ir.sign_extend_word_to_long(w)
        }
        ExtendType::SXTX => m64,
    };
    let shifted = e.ir.logical_shift_left_masked_64(extended, Value::ImmU64(shift as u64));
    let operand2 = if sf64 { shifted } else { e.ir.least_significant_word(shifted) };

    let operand1 = get_rn_or_sp(e, sf64, rn(word));
    let result = match (sf64, subtract) {
        (true, false) => e.ir.add_64(operand1, operand2, Value::ImmU1(false)),
        (true, true) => e.ir.sub_64(operand1, operand2, Value::ImmU1(true)),
        (false, false) => e.ir.add_32(operand1, operand2, Value::ImmU1(false)),
        (false, true) => e.ir.sub_32(operand1, operand2, Value::ImmU1(true)),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
        set_reg(e, sf64, rd(word), result);
    } else {
        set_rd_or_sp(e, sf64, rd(word), result);
    }
    Step::Continue
}

pub fn adc_sbc(e: &mut A64IrEmitter, word: u32, subtract: bool, setflags: bool) -> Step {
    let sf64 = sf(word);
    let operand1 = get_reg(e, sf64, rn(word));
    let operand2 = get_reg(e, sf64, rm(word));
    let carry = e.get_c_flag();
    let result = match (sf64, subtract) {
        (true, false) => e.ir.add_64(operand1, operand2, carry),
        (true, true) => e.ir.sub_64(operand1, operand2, carry),
        (false, false) => e.ir.add_32(operand1, operand2, carry),
        (false, true) => e.ir.sub_32(operand1, operand2, carry),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
    }
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn logical_imm(e: &mut A64IrEmitter, word: u32, op: LogicalOp, setflags: bool) -> Step {
    let sf64 = sf(word);
    let imm_n = (word >> 22) & 1 != 0;
    if !sf64 && imm_n {
        return super::raise_undefined(e);
    }
    let immr = (word >> 16) & 0x3F;
    let imms = (word >> 10) & 0x3F;
    let Some(mask) = decode_bit_masks(imm_n, imms, immr, if sf64 { 64 } else { 32 }) else {
        return super::raise_undefined(e);
    };

    let operand1 = get_reg(e, sf64, rn(word));
    let imm = if sf64 { Value::ImmU64(mask) } else { Value::ImmU32(mask as u32) };
    let result = match (op, sf64) {
        (LogicalOp::And, true) => e.ir.and_64(operand1, imm),
        (LogicalOp::And, false) => e.ir.and_32(operand1, imm),
        (LogicalOp::Orr, true) => e.ir.or_64(operand1, imm),
        (LogicalOp::Orr, false) => e.ir.or_32(operand1, imm),
        (LogicalOp::Eor, true) => e.ir.eor_64(operand1, imm),
        (LogicalOp::Eor, false) => e.ir.eor_32(operand1, imm),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
        set_reg(e, sf64, rd(word), result);
    } else {
        set_rd_or_sp(e, sf64, rd(word), result);
    }
    Step::Continue
}

pub fn logical_shift(
    e: &mut A64IrEmitter,
    word: u32,
    op: LogicalOp,
    invert: bool,
    setflags: bool,
) -> Step {
    let sf64 = sf(word);
    let Some(mut operand2) = shifted_operand(e, word, sf64) else {
        return super::raise_undefined(e);
    };
    if invert {
        operand2 = if sf64 { e.ir.not_64(operand2) } else { e.ir.not_32(operand2) };
    }
    let operand1 = get_reg(e, sf64, rn(word));
    let result = match (op, sf64) {
        (LogicalOp::And, true) => e.ir.and_64(operand1, operand2),
        (LogicalOp::And, false) => e.ir.and_32(operand1, operand2),
        (LogicalOp::Orr, true) => e.ir.or_64(operand1, operand2),
        (LogicalOp::Orr, false) => e.ir.or_32(operand1, operand2),
        (LogicalOp::Eor, true) => e.ir.eor_64(operand1, operand2),
        (LogicalOp::Eor, false) => e.ir.eor_32(operand1, operand2),
    };
    if setflags {
        let nzcv = e.ir.get_nzcv_from_op(result);
        e.set_nzcv(nzcv);
    }
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn move_wide(e: &mut A64IrEmitter, word: u32, op: MoveWideOp) -> Step {
    let sf64 = sf(word);
    let hw = (word >> 21) & 3;
    if !sf64 && hw > 1 {
        return super::raise_undefined(e);
    }
    let shift = hw * 16;
    let imm16 = ((word >> 5) & 0xFFFF) as u64;

    match op {
        MoveWideOp::Zero => {
            let value = imm16 << shift;
            if sf64 {
                e.set_x(rd(word), Value::ImmU64(value));
            } else {
                e.set_w(rd(word), Value::ImmU32(value as u32));
            }
        }
        MoveWideOp::Not => {
            let value = !(imm16 << shift);
            if sf64 {
                e.set_x(rd(word), Value::ImmU64(value));
            } else {
                e.set_w(rd(word), Value::ImmU32(value as u32));
            }
        }
        MoveWideOp::Keep => {
            let keep_mask = !(0xFFFFu64 << shift);
            let old = get_reg(e, sf64, rd(word));
            if sf64 {
                let kept = e.ir.and_64(old, Value::ImmU64(keep_mask));
                let result = e.ir.or_64(kept, Value::ImmU64(imm16 << shift));
                e.set_x(rd(word), result);
            } else {
                let kept = e.ir.and_32(old, Value::ImmU32(keep_mask as u32));
                let result = e.ir.or_32(kept, Value::ImmU32((imm16 << shift) as u32));
                e.set_w(rd(word), result);
            }
        }
    }
    Step::Continue
}

pub fn bitfield(e: &mut A64IrEmitter, word: u32, op: BitfieldOp) -> Step {
    let sf64 = sf(word);
    let imm_n = (word >> 22) & 1 != 0;
    if imm_n != sf64 {
        return super::raise_undefined(e);
    }
    let immr = (word >> 16) & 0x3F;
    let imms = (word >> 10) & 0x3F;
    let width = if sf64 { 64u32 } else { 32 };
    if immr >= width || imms >= width {
        return super::raise_undefined(e);
    }

    let source = get_reg(e, sf64, rn(word));

    // The two canonical shapes: extract (imms >= immr) and insert-low
    // (imms < immr).
    if imms >= immr {
        let extract_width = imms - immr + 1;
        let left = width - 1 - imms;
        let shifted = shift_left(e, sf64, source, left + immr);
        let result = match op {
            BitfieldOp::Unsigned => shift_right(e, sf64, shifted, width - extract_width),
            BitfieldOp::Signed => shift_right_arith(e, sf64, shifted, width - extract_width),
            BitfieldOp::Insert => {
                let field = shift_right(e, sf64, shifted, width - extract_width);
                let mask = ones(extract_width);
                let old = get_reg(e, sf64, rd(word));
                merge_field(e, sf64, old, field, mask, 0)
            }
        };
        set_reg(e, sf64, rd(word), result);
    } else {
        let extract_width = imms + 1;
        let to = width - immr;
        let mask = ones(extract_width);
        match op {
            BitfieldOp::Unsigned => {
                let field = and_mask(e, sf64, source, mask);
                let result = shift_left(e, sf64, field, to);
                set_reg(e, sf64, rd(word), result);
            }
            BitfieldOp::Signed => {
                let up = shift_left(e, sf64, source, width - extract_width);
                let down = shift_right_arith(e, sf64, up, width - extract_width - to);
                set_reg(e, sf64, rd(word), down);
            }
            BitfieldOp::Insert => {
                let field = and_mask(e, sf64, source, mask);
                let old = get_reg(e, sf64, rd(word));
                let result = merge_field(e, sf64, old, field, mask, to);
                set_reg(e, sf64, rd(word), result);
            }
        }
    }
    Step::Continue
}

fn ones(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn shift_left(e: &mut A64IrEmitter, sf64: bool, v: Value, amount: u32) -> Value {
    if sf64 {
        e.ir.logical_shift_left_masked_64(v, Value::ImmU64(amount as u64 & 63))
    } else {
        e.ir.logical_shift_left_masked_32(v, Value::ImmU32(amount & 31))
    }
}

fn shift_right(e: &mut A64IrEmitter, sf64: bool, v: Value, amount: u32) -> Value {
    if sf64 {
        e.ir.logical_shift_right_masked_64(v, Value::ImmU64(amount as u64 & 63))
    } else {
        e.ir.logical_shift_right_masked_32(v, Value::ImmU32(amount & 31))
    }
}

fn shift_right_arith(e: &mut A64IrEmitter, sf64: bool, v: Value, amount: u32) -> Value {
    if sf64 {
        e.ir.arithmetic_shift_right_masked_64(v, Value::ImmU64(amount as u64 & 63))
    } else {
        e.ir.arithmetic_shift_right_masked_32(v, Value::ImmU32(amount & 31))
    }
}

fn and_mask(e: &mut A64IrEmitter, sf64: bool, v: Value, mask: u64) -> Value {
    if sf64 {
        e.ir.and_64(v, Value::ImmU64(mask))
    } else {
        e.ir.and_32(v, Value::ImmU32(mask as u32))
    }
}

fn merge_field(
    e: &mut A64IrEmitter,
    sf64: bool,
    old: Value,
    field: Value,
    mask: u64,
    to: u32,
) -> Value {
    let placed = shift_left(e, sf64, field, to);
    let hole = !(mask << to);
    let kept = and_mask(e, sf64, old, hole);
    if sf64 {
        e.ir.or_64(kept, placed)
    } else {
        e.ir.or_32(kept, placed)
    }
}

pub fn extr(e: &mut A64IrEmitter, word: u32) -> Step {
    let sf64 = sf(word);
    let imms = (word >> 10) & 0x3F;
    if !sf64 && imms >= 32 {
        return super::raise_undefined(e);
    }
    let lo = get_reg(e, sf64, rm(word));
    let hi = get_reg(e, sf64, rn(word));
    let result = if sf64 {
        e.ir.extract_register_64(lo, hi, Value::ImmU8(imms as u8))
    } else {
        e.ir.extract_register_32(lo, hi, Value::ImmU8(imms as u8))
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn ccmp(e: &mut A64IrEmitter, word: u32, subtract: bool, immediate: bool) -> Step {
    let sf64 = sf(word);
    let cond = Cond::from_bits(word >> 12);
    let flags = (word & 0xF) as u32;

    let operand1 = get_reg(e, sf64, rn(word));
    let operand2 = if immediate {
        let imm5 = (word >> 16) & 0x1F;
        if sf64 {
            Value::ImmU64(imm5 as u64)
        } else {
            Value::ImmU32(imm5)
        }
    } else {
        get_reg(e, sf64, rm(word))
    };
    let result = match (sf64, subtract) {
        (true, true) => e.ir.sub_64(operand1, operand2, Value::ImmU1(true)),
        (true, false) => e.ir.add_64(operand1, operand2, Value::ImmU1(false)),
        (false, true) => e.ir.sub_32(operand1, operand2, Value::ImmU1(true)),
        (false, false) => e.ir.add_32(operand1, operand2, Value::ImmU1(false)),
    };
    let then_flags = e.ir.get_nzcv_from_op(result);
    let else_flags = e.ir.nzcv_from_packed_flags(Value::ImmU32(flags << 28));
    let merged = e.ir.conditional_select_nzcv(cond, then_flags, else_flags);
    e.set_nzcv(merged);
    Step::Continue
}

pub fn csel(e: &mut A64IrEmitter, word: u32, op: CselOp) -> Step {
    let sf64 = sf(word);
    let cond = Cond::from_bits(word >> 12);
    let operand1 = get_reg(e, sf64, rn(word));
    let mut operand2 = get_reg(e, sf64, rm(word));

    operand2 = match (op, sf64) {
        (CselOp::Plain, _) => operand2,
        (CselOp::Increment, true) => e.ir.add_64(operand2, Value::ImmU64(1), Value::ImmU1(false)),
        (CselOp::Increment, false) => e.ir.add_32(operand2, Value::ImmU32(1), Value::ImmU1(false)),
        (CselOp::Invert, true) => e.ir.not_64(operand2),
        (CselOp::Invert, false) => e.ir.not_32(operand2),
        (CselOp::Negate, true) => e.ir.sub_64(Value::ImmU64(0), operand2, Value::ImmU1(true)),
        (CselOp::Negate, false) => e.ir.sub_32(Value::ImmU32(0), operand2, Value::ImmU1(true)),
    };

    let result = if sf64 {
        e.ir.conditional_select_64(cond, operand1, operand2)
    } else {
        e.ir.conditional_select_32(cond, operand1, operand2)
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn div(e: &mut A64IrEmitter, word: u32, signed: bool) -> Step {
    let sf64 = sf(word);
    let n = get_reg(e, sf64, rn(word));
    let m = get_reg(e, sf64, rm(word));
    let result = match (signed, sf64) {
        (false, true) => e.ir.unsigned_div_64(n, m),
        (false, false) => e.ir.unsigned_div_32(n, m),
        (true, true) => e.ir.signed_div_64(n, m),
        (true, false) => e.ir.signed_div_32(n, m),
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn shift_variable(e: &mut A64IrEmitter, word: u32, inst: A64Inst) -> Step {
    let sf64 = sf(word);
    let n = get_reg(e, sf64, rn(word));
    let m = get_reg(e, sf64, rm(word));
    let amount = m;
    let result = match (inst, sf64) {
        (A64Inst::Lslv, true) => e.ir.logical_shift_left_masked_64(n, amount),
        (A64Inst::Lslv, false) => e.ir.logical_shift_left_masked_32(n, amount),
        (A64Inst::Lsrv, true) => e.ir.logical_shift_right_masked_64(n, amount),
        (A64Inst::Lsrv, false) => e.ir.logical_shift_right_masked_32(n, amount),
        (A64Inst::Asrv, true) => e.ir.arithmetic_shift_right_masked_64(n, amount),
        (A64Inst::Asrv, false) => e.ir.arithmetic_shift_right_masked_32(n, amount),
        (A64Inst::Rorv, true) => e.ir.rotate_right_masked_64(n, amount),
        (_, false) => e.ir.rotate_right_masked_32(n, amount),
        _ => unreachable!(),
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn crc32(e: &mut A64IrEmitter, word: u32, castagnoli: bool) -> Step {
    let size = (word >> 10) & 3;
    let sf64 = sf(word);
    if sf64 != (size == 3) {
        return super::raise_undefined(e);
    }
    let acc = e.get_w(rn(word));
    let data = if size == 3 { e.get_x(rm(word)) } else { e.get_w(rm(word)) };
    let result = match (castagnoli, size) {
        (false, 0) => {
            let b = e.ir.least_significant_byte(data);
            let b = e.ir.zero_extend_byte_to_word(b);
            e.ir.crc32_iso_8(acc, b)
        }
        (false, 1) => {
            let h = e.ir.least_significant_half(data);
            let h = e.ir.zero_extend_half_to_word(h);
            e.ir.crc32_iso_16(acc, h)
        }
        (false, 2) => e.ir.crc32_iso_32(acc, data),
        (false, _) => e.ir.crc32_iso_64(acc, data),
        (true, 0) => {
            let b = e.ir.least_significant_byte(data);
            let b = e.ir.zero_extend_byte_to_word(b);
            e.ir.crc32_castagnoli_8(acc, b)
        }
        (true, 1) => {
            let h = e.ir.least_significant_half(data);
            let h = e.ir.zero_extend_half_to_word(h);
            e.ir.crc32_castagnoli_16(acc, h)
        }
        (true, 2) => e.ir.crc32_castagnoli_32(acc, data),
        (true, _) => e.ir.crc32_castagnoli_64(acc, data),
    };
    e.set_w(rd(word), result);
    Step::Continue
}

pub fn rbit(e: &mut A64IrEmitter, word: u32) -> Step {
    let sf64 = sf(word);
    if sf64 {
        // 64-bit bit reverse: reverse each half and swap.
        let n = e.get_x(rn(word));
        let lo = e.ir.least_significant_word(n);
        let hi = e.ir.most_significant_word(n);
        let lo_rev = e.ir.bit_reverse_32(lo);
        let hi_rev = e.ir.bit_reverse_32(hi);
        let result = e.ir.pack_2x32_to_1x64(hi_rev, lo_rev);
        e.set_x(rd(word), result);
    } else {
        let n = e.get_w(rn(word));
        let result = e.ir.bit_reverse_32(n);
        e.set_w(rd(word), result);
    }
    Step::Continue
}

pub fn rev16(e: &mut A64IrEmitter, word: u32) -> Step {
    let sf64 = sf(word);
    let n = get_reg(e, sf64, rn(word));
    let result = if sf64 {
        let lo = e.ir.and_64(n, Value::ImmU64(0x00FF_00FF_00FF_00FF));
        let lo = e.ir.logical_shift_left_masked_64(lo, Value::ImmU64(8));
        let hi = e.ir.logical_shift_right_masked_64(n, Value::ImmU64(8));
        let hi = e.ir.and_64(hi, Value::ImmU64(0x00FF_00FF_00FF_00FF));
        e.ir.or_64(lo, hi)
    } else {
        let lo = e.ir.and_32(n, Value::ImmU32(0x00FF_00FF));
        let lo = e.ir.logical_shift_left_masked_32(lo, Value::ImmU32(8));
        let hi = e.ir.logical_shift_right_masked_32(n, Value::ImmU32(8));
        let hi = e.ir.and_32(hi, Value::ImmU32(0x00FF_00FF));
        e.ir.or_32(lo, hi)
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn rev32(e: &mut A64IrEmitter, word: u32) -> Step {
    let sf64 = sf(word);
    if sf64 {
        // Byte-reverse each word of the 64-bit register.
        let n = e.get_x(rn(word));
        let lo = e.ir.least_significant_word(n);
        let hi = e.ir.most_significant_word(n);
        let lo_rev = e.ir.byte_reverse_word(lo);
        let hi_rev = e.ir.byte_reverse_word(hi);
        let result = e.ir.pack_2x32_to_1x64(lo_rev, hi_rev);
        e.set_x(rd(word), result);
    } else {
        let n = e.get_w(rn(word));
        let result = e.ir.byte_reverse_word(n);
        e.set_w(rd(word), result);
    }
    Step::Continue
}

pub fn rev64(e: &mut A64IrEmitter, word: u32) -> Step {
    let n = e.get_x(rn(word));
    let result = e.ir.byte_reverse_dual(n);
    e.set_x(rd(word), result);
    Step::Continue
}

pub fn clz(e: &mut A64IrEmitter, word: u32) -> Step {
    let sf64 = sf(word);
    let n = get_reg(e, sf64, rn(word));
    let result = if sf64 {
        e.ir.count_leading_zeros_64(n)
    } else {
        e.ir.count_leading_zeros_32(n)
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn madd_msub(e: &mut A64IrEmitter, word: u32, subtract: bool) -> Step {
    let sf64 = sf(word);
    let n = get_reg(e, sf64, rn(word));
    let m = get_reg(e, sf64, rm(word));
    let a = get_reg(e, sf64, ra(word));
    let product = if sf64 { e.ir.mul_64(n, m) } else { e.ir.mul_32(n, m) };
    let result = match (sf64, subtract) {
        (true, false) => e.ir.add_64(a, product, Value::ImmU1(false)),
        (true, true) => e.ir.sub_64(a, product, Value::ImmU1(true)),
        (false, false) => e.ir.add_32(a, product, Value::ImmU1(false)),
        (false, true) => e.ir.sub_32(a, product, Value::ImmU1(true)),
    };
    set_reg(e, sf64, rd(word), result);
    Step::Continue
}

pub fn maddl(e: &mut A64IrEmitter, word: u32, signed: bool, subtract: bool) -> Step {
    let n = e.get_w(rn(word));
    let m = e.get_w(rm(word));
    let n64 = if signed {
        e.ir.sign_extend_word_to_long(n)
    } else {
        e.ir.zero_extend_word_to_long(n)
    };
    let m64 = if signed {
        e.ir.sign_extend_word_to_long(m)
    } else {
        e.ir.zero_extend_word_to_long(m)
    };
    let product = e.ir.mul_64(n64, m64);
    let a = e.get_x(ra(word));
    let result = if subtract {
        e.ir.sub_64(a, product, Value::ImmU1(true))
    } else {
        e.ir.add_64(a, product, Value::ImmU1(false))
    };
    e.set_x(rd(word), result);
    Step::Continue
}

pub fn mul_high(e: &mut A64IrEmitter, word: u32, signed: bool) -> Step {
    let n = e.get_x(rn(word));
    let m = e.get_x(rm(word));
    let result = if signed {
        e.ir.signed_multiply_high_64(n, m)
    } else {
        e.ir.unsigned_multiply_high_64(n, m)
    };
    e.set_x(rd(word), result);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A64LocationDescriptor;
    use crate::ir::opcode::Opcode;

    fn lift(word: u32, go: impl FnOnce(&mut A64IrEmitter, u32) -> Step) -> Block {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        let mut block = Block::new(loc.to_location());
        let mut e = A64IrEmitter::new(&mut block, loc);
        go(&mut e, word);
        block
    }

    #[test]
    fn movz_writes_constant() {
        // MOVZ X0, #0x1234
        let block = lift(0xD282_4680, |e, w| move_wide(e, w, MoveWideOp::Zero));
        let set = block.instructions.last().unwrap();
        assert_eq!(set.opcode, Opcode::A64SetX);
        assert_eq!(set.arg(1), Value::ImmU64(0x1234));
    }

    #[test]
    fn and_imm_decodes_mask() {
        // AND X0, X1, #1
        let block = lift(0x9240_0020, |e, w| logical_imm(e, w, LogicalOp::And, false));
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::And64 && i.arg(1) == Value::ImmU64(1)
        }));
    }

    #[test]
    fn subs_with_zr_destination_is_cmp() {
        // SUBS XZR, X1, X2 (CMP X1, X2)
        let block = lift(0xEB02_003F, |e, w| add_sub_shift(e, w, true, true));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A64SetNZCV));
        // No register write to X31.
        assert!(!block.iter_live().any(|(_, i)| i.opcode == Opcode::A64SetX));
    }
}
