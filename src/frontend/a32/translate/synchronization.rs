use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::acc_type::AccType;
use crate::ir::value::Value;

pub fn clrex(e: &mut A32IrEmitter) -> Step {
    e.clear_exclusive();
    Step::Continue
}

pub fn ldrex(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let value = e.exclusive_read_memory_32(addr, AccType::Ordered);
    e.set_register(f.rd(), value);
    Step::Continue
}

pub fn ldrexb(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let byte = e.exclusive_read_memory_8(addr, AccType::Ordered);
    let value = e.ir.zero_extend_byte_to_word(byte);
    e.set_register(f.rd(), value);
    Step::Continue
}

pub fn ldrexh(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let half = e.exclusive_read_memory_16(addr, AccType::Ordered);
    let value = e.ir.zero_extend_half_to_word(half);
    e.set_register(f.rd(), value);
    Step::Continue
}

pub fn ldrexd(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rt = f.rd();
    if rt.number() % 2 != 0 || rt == Reg::R14 {
        return super::raise_undefined(e);
    }
    let rt2 = Reg::from_bits(rt.number() as u32 + 1);
    let addr = e.get_register(f.rn());
    let value = e.exclusive_read_memory_64(addr, AccType::Ordered);
    let lo = e.ir.least_significant_word(value);
    let hi = e.ir.most_significant_word(value);
    e.set_register(rt, lo);
    e.set_register(rt2, hi);
    Step::Continue
}

pub fn strex(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let value = e.get_register(f.rm());
    let status = e.exclusive_write_memory_32(addr, value, AccType::Ordered);
    e.set_register(f.rd(), status);
    Step::Continue
}

pub fn strexb(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let value = e.get_register(f.rm());
    let byte = e.ir.least_significant_byte(value);
    let status = e.exclusive_write_memory_8(addr, byte, AccType::Ordered);
    e.set_register(f.rd(), status);
    Step::Continue
}

pub fn strexh(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = e.get_register(f.rn());
    let value = e.get_register(f.rm());
    let half = e.ir.least_significant_half(value);
    let status = e.exclusive_write_memory_16(addr, half, AccType::Ordered);
    e.set_register(f.rd(), status);
    Step::Continue
}

pub fn strexd(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let rt = f.rm();
    if rt.number() % 2 != 0 || rt == Reg::R14 {
        return super::raise_undefined(e);
    }
    let rt2 = Reg::from_bits(rt.number() as u32 + 1);
    let addr = e.get_register(f.rn());
    let lo = e.get_register(rt);
    let hi = e.get_register(rt2);
    let value = e.ir.pack_2x32_to_1x64(lo, hi);
    let status = e.exclusive_write_memory_64(addr, value, AccType::Ordered);
    e.set_register(f.rd(), status);
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn ldrex_strex_pair() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // LDREX R0, [R1]
        ldrex(&mut e, ArmFields(0xE191_0F9F));
        // STREX R2, R3, [R1]
        strex(&mut e, ArmFields(0xE181_2F93));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32ExclusiveReadMemory32));
        // The status result feeds R2.
        let status = block
            .iter_live()
            .find(|(_, i)| i.opcode == Opcode::A32ExclusiveWriteMemory32)
            .unwrap()
            .0;
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::A32SetRegister && i.arg(1) == Value::Inst(status)
        }));
    }
}
