use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::value::Value;

// Long multiply field layout: RdHi at 19:16, RdLo at 15:12, Rm at 11:8,
// Rn at 3:0.
fn rd_hi(f: ArmFields) -> Reg {
    f.rn()
}
fn rd_lo(f: ArmFields) -> Reg {
    f.rd()
}

pub fn mul(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let result = e.ir.mul_32(n, m);
    if f.s_flag() {
        let nzcv = e.ir.get_nzcv_from_op(result);
        let carry = e.get_c_flag();
        e.set_cpsr_nzc(nzcv, carry);
    }
    e.set_register(f.rn(), result);
    Step::Continue
}

pub fn mla(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let a = e.get_register(f.rd());
    let product = e.ir.mul_32(n, m);
    let result = e.ir.add_32(product, a, Value::ImmU1(false));
    if f.s_flag() {
        let nzcv = e.ir.get_nzcv_from_op(result);
        let carry = e.get_c_flag();
        e.set_cpsr_nzc(nzcv, carry);
    }
    e.set_register(f.rn(), result);
    Step::Continue
}

pub fn mls(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let a = e.get_register(f.rd());
    let product = e.ir.mul_32(n, m);
    let result = e.ir.sub_32(a, product, Value::ImmU1(true));
    e.set_register(f.rn(), result);
    Step::Continue
}

fn set_long_result(e: &mut A32IrEmitter, f: ArmFields, result: Value, s: bool) {
    let lo = e.ir.least_significant_word(result);
    let hi = e.ir.most_significant_word(result);
    if s {
        // N and Z reflect the full 64-bit result; compute from the wide
        // value before splitting.
        let nzcv = e.ir.get_nzcv_from_op(result);
        let carry = e.get_c_flag();
        e.set_cpsr_nzc(nzcv, carry);
    }
    e.set_register(rd_lo(f), lo);
    e.set_register(rd_hi(f), hi);
}

pub fn umull(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let n64 = e.ir.zero_extend_word_to_long(n);
    let m64 = e.ir.zero_extend_word_to_long(m);
    let result = e.ir.mul_64(n64, m64);
    set_long_result(e, f, result, f.s_flag());
    Step::Continue
}

pub fn smull(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let n64 = e.ir.sign_extend_word_to_long(n);
    let m64 = e.ir.sign_extend_word_to_long(m);
    let result = e.ir.mul_64(n64, m64);
    set_long_result(e, f, result, f.s_flag());
    Step::Continue
}

fn accumulator_64(e: &mut A32IrEmitter, f: ArmFields) -> Value {
    let lo = e.get_register(rd_lo(f));
    let hi = e.get_register(rd_hi(f));
    e.ir.pack_2x32_to_1x64(lo, hi)
}

pub fn umlal(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let n64 = e.ir.zero_extend_word_to_long(n);
    let m64 = e.ir.zero_extend_word_to_long(m);
    let product = e.ir.mul_64(n64, m64);
    let acc = accumulator_64(e, f);
    let result = e.ir.add_64(product, acc, Value::ImmU1(false));
    set_long_result(e, f, result, f.s_flag());
    Step::Continue
}

pub fn smlal(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let n64 = e.ir.sign_extend_word_to_long(n);
    let m64 = e.ir.sign_extend_word_to_long(m);
    let product = e.ir.mul_64(n64, m64);
    let acc = accumulator_64(e, f);
    let result = e.ir.add_64(product, acc, Value::ImmU1(false));
    set_long_result(e, f, result, f.s_flag());
    Step::Continue
}

pub fn umaal(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let n64 = e.ir.zero_extend_word_to_long(n);
    let m64 = e.ir.zero_extend_word_to_long(m);
    let product = e.ir.mul_64(n64, m64);
    let lo = e.get_register(rd_lo(f));
    let hi = e.get_register(rd_hi(f));
    let lo64 = e.ir.zero_extend_word_to_long(lo);
    let hi64 = e.ir.zero_extend_word_to_long(hi);
    let sum = e.ir.add_64(product, lo64, Value::ImmU1(false));
    let result = e.ir.add_64(sum, hi64, Value::ImmU1(false));
    set_long_result(e, f, result, false);
    Step::Continue
}

// Divide field layout: Rd at 19:16, Rm at 11:8, Rn at 3:0.

pub fn udiv(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let result = e.ir.unsigned_div_32(n, m);
    e.set_register(f.rn(), result);
    Step::Continue
}

pub fn sdiv(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let n = e.get_register(f.rm());
    let m = e.get_register(f.rs());
    let result = e.ir.signed_div_32(n, m);
    e.set_register(f.rn(), result);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn umull_widens_and_splits() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // UMULL R0, R1, R2, R3
        umull(&mut e, ArmFields(0xE081_0392));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::Mul64));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::LeastSignificantWord));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::MostSignificantWord));
    }
}
