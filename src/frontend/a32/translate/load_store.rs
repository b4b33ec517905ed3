use crate::config::Exception;
use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::helpers::emit_imm_shift;
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::acc_type::AccType;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

/// Effective address of a load/store plus the value to write back, if
/// the addressing mode writes back.
struct Address {
    access: Value,
    writeback: Option<Value>,
}

fn compute_address(e: &mut A32IrEmitter, f: ArmFields, offset: Value) -> Address {
    let rn = e.get_register(f.rn());
    let offset_addr = if f.u_flag() {
        e.ir.add_32(rn, offset, Value::ImmU1(false))
    } else {
        e.ir.sub_32(rn, offset, Value::ImmU1(true))
    };
    let access = if f.p_flag() { offset_addr } else { rn };
    let writeback = if !f.p_flag() || f.w_flag() { Some(offset_addr) } else { None };
    Address { access, writeback }
}

fn writeback(e: &mut A32IrEmitter, f: ArmFields, addr: &Address) {
    if let Some(value) = addr.writeback {
        e.set_register(f.rn(), value);
    }
}

fn reg_offset(e: &mut A32IrEmitter, f: ArmFields) -> Value {
    let rm = e.get_register(f.rm());
    let carry = e.get_c_flag();
    emit_imm_shift(e, rm, f.shift_type(), f.imm5(), carry).value
}

fn finish_load(e: &mut A32IrEmitter, rt: Reg, value: Value) -> Step {
    if rt == Reg::R15 {
        e.load_write_pc(value);
        e.set_term(Terminal::PopRSBHint);
        return Step::Stop;
    }
    e.set_register(rt, value);
    Step::Continue
}

// --- Word / byte ---

pub fn ldr_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm12()));
    let value = e.read_memory_32(addr.access, AccType::Normal);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldr_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = reg_offset(e, f);
    let addr = compute_address(e, f, offset);
    let value = e.read_memory_32(addr.access, AccType::Normal);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn str_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm12()));
    let value = e.get_register(f.rt());
    e.write_memory_32(addr.access, value, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

pub fn str_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = reg_offset(e, f);
    let addr = compute_address(e, f, offset);
    let value = e.get_register(f.rt());
    e.write_memory_32(addr.access, value, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

pub fn ldrb_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm12()));
    let byte = e.read_memory_8(addr.access, AccType::Normal);
    let value = e.ir.zero_extend_byte_to_word(byte);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrb_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = reg_offset(e, f);
    let addr = compute_address(e, f, offset);
    let byte = e.read_memory_8(addr.access, AccType::Normal);
    let value = e.ir.zero_extend_byte_to_word(byte);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn strb_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm12()));
    let value = e.get_register(f.rt());
    let byte = e.ir.least_significant_byte(value);
    e.write_memory_8(addr.access, byte, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

pub fn strb_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = reg_offset(e, f);
    let addr = compute_address(e, f, offset);
    let value = e.get_register(f.rt());
    let byte = e.ir.least_significant_byte(value);
    e.write_memory_8(addr.access, byte, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

// --- Halfword / signed / dual ---

pub fn ldrh_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm4h_imm4l()));
    let half = e.read_memory_16(addr.access, AccType::Normal);
    let value = e.ir.zero_extend_half_to_word(half);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrh_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    let addr = compute_address(e, f, offset);
    let half = e.read_memory_16(addr.access, AccType::Normal);
    let value = e.ir.zero_extend_half_to_word(half);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn strh_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm4h_imm4l()));
    let value = e.get_register(f.rt());
    let half = e.ir.least_significant_half(value);
    e.write_memory_16(addr.access, half, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

pub fn strh_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    let addr = compute_address(e, f, offset);
    let value = e.get_register(f.rt());
    let half = e.ir.least_significant_half(value);
    e.write_memory_16(addr.access, half, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

pub fn ldrsb_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm4h_imm4l()));
    let byte = e.read_memory_8(addr.access, AccType::Normal);
    let value = e.ir.sign_extend_byte_to_word(byte);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrsb_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    let addr = compute_address(e, f, offset);
    let byte = e.read_memory_8(addr.access, AccType::Normal);
    let value = e.ir.sign_extend_byte_to_word(byte);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrsh_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let addr = compute_address(e, f, Value::ImmU32(f.imm4h_imm4l()));
    let half = e.read_memory_16(addr.access, AccType::Normal);
    let value = e.ir.sign_extend_half_to_word(half);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrsh_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    let addr = compute_address(e, f, offset);
    let half = e.read_memory_16(addr.access, AccType::Normal);
    let value = e.ir.sign_extend_half_to_word(half);
    writeback(e, f, &addr);
    finish_load(e, f.rt(), value)
}

pub fn ldrd_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    ldrd_common(e, f, Value::ImmU32(f.imm4h_imm4l()))
}

pub fn ldrd_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    ldrd_common(e, f, offset)
}

fn ldrd_common(e: &mut A32IrEmitter, f: ArmFields, offset: Value) -> Step {
    let rt = f.rt();
    if rt.number() % 2 != 0 || rt == Reg::R14 {
        e.exception_raised(Exception::UnpredictableInstruction);
        e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
        return Step::Stop;
    }
    let rt2 = Reg::from_bits(rt.number() as u32 + 1);
    let addr = compute_address(e, f, offset);
    let value = e.read_memory_64(addr.access, AccType::Normal);
    let lo = e.ir.least_significant_word(value);
    let hi = e.ir.most_significant_word(value);
    writeback(e, f, &addr);
    e.set_register(rt, lo);
    e.set_register(rt2, hi);
    Step::Continue
}

pub fn strd_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    strd_common(e, f, Value::ImmU32(f.imm4h_imm4l()))
}

pub fn strd_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = e.get_register(f.rm());
    strd_common(e, f, offset)
}

fn strd_common(e: &mut A32IrEmitter, f: ArmFields, offset: Value) -> Step {
    let rt = f.rt();
    if rt.number() % 2 != 0 || rt == Reg::R14 {
        e.exception_raised(Exception::UnpredictableInstruction);
        e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
        return Step::Stop;
    }
    let rt2 = Reg::from_bits(rt.number() as u32 + 1);
    let addr = compute_address(e, f, offset);
    let lo = e.get_register(rt);
    let hi = e.get_register(rt2);
    let value = e.ir.pack_2x32_to_1x64(lo, hi);
    e.write_memory_64(addr.access, value, AccType::Normal);
    writeback(e, f, &addr);
    Step::Continue
}

// --- Load/store multiple ---

/// Start address and final base value for an LDM/STM variant.
fn multiple_addresses(e: &mut A32IrEmitter, f: ArmFields, count: u32) -> (Value, Value) {
    let rn = e.get_register(f.rn());
    let bytes = Value::ImmU32(count * 4);
    match (f.p_flag(), f.u_flag()) {
        // IA
        (false, true) => {
            let end = e.ir.add_32(rn, bytes, Value::ImmU1(false));
            (rn, end)
        }
        // IB
        (true, true) => {
            let start = e.ir.add_32(rn, Value::ImmU32(4), Value::ImmU1(false));
            let end = e.ir.add_32(rn, bytes, Value::ImmU1(false));
            (start, end)
        }
        // DA
        (false, false) => {
            let end = e.ir.sub_32(rn, bytes, Value::ImmU1(true));
            let start = e.ir.add_32(end, Value::ImmU32(4), Value::ImmU1(false));
            (start, end)
        }
        // DB
        (true, false) => {
            let start = e.ir.sub_32(rn, bytes, Value::ImmU1(true));
            (start, start)
        }
    }
}

pub fn ldm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let list = f.register_list();
    let count = list.count_ones();
    if count == 0 {
        return super::raise_undefined(e);
    }
    let (start, end) = multiple_addresses(e, f, count);

    let mut address = start;
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
    if f.w_flag() && list & (1 << f.rn().number()) == 0 {
        e.set_register(f.rn(), end);
    }
    if let Some(value) = pc_value {
        e.load_write_pc(value);
        e.set_term(Terminal::PopRSBHint);
        return Step::Stop;
    }
    Step::Continue
}

pub fn stm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let list = f.register_list();
    let count = list.count_ones();
    if count == 0 {
        return super::raise_undefined(e);
    }
    let (start, end) = multiple_addresses(e, f, count);

    let mut address = start;
    for bit in 0..16u32 {
        if list & (1 << bit) == 0 {
            continue;
        }
        let value = e.get_register(Reg::from_bits(bit));
        e.write_memory_32(address, value, AccType::Normal);
        address = e.ir.add_32(address, Value::ImmU32(4), Value::ImmU1(false));
    }
    if f.w_flag() {
        e.set_register(f.rn(), end);
    }
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
    fn ldr_preindex_no_writeback() {
        // LDR R0, [R1, #4]
        let block = lift(0xE591_0004, ldr_imm);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32ReadMemory32));
        // One register write: R0.
        let writes = block
            .iter_live()
            .filter(|(_, i)| i.opcode == Opcode::A32SetRegister)
            .count();
        assert_eq!(writes, 1);
    }

    #[test]
    fn ldr_postindex_writes_back() {
        // LDR R0, [R1], #4
        let block = lift(0xE491_0004, ldr_imm);
        let writes = block
            .iter_live()
            .filter(|(_, i)| i.opcode == Opcode::A32SetRegister)
            .count();
        assert_eq!(writes, 2);
    }

    #[test]
    fn ldm_with_pc_ends_block() {
        // POP {R4, PC} = LDMIA SP!, {R4, PC}
        let block = lift(0xE8BD_8010, ldm);
        assert_eq!(block.terminal, Terminal::PopRSBHint);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32BXWritePC));
    }

    #[test]
    fn stmdb_descends() {
        // PUSH {R4, LR} = STMDB SP!, {R4, LR}
        let block = lift(0xE92D_4010, stm);
        let stores = block
            .iter_live()
            .filter(|(_, i)| i.opcode == Opcode::A32WriteMemory32)
            .count();
        assert_eq!(stores, 2);
    }
}
