use crate::frontend::a64::translate::helpers::*;
use crate::frontend::a64::translate::{Extend, Step};
use crate::ir::a64_emitter::A64IrEmitter;
use crate::ir::acc_type::AccType;
use crate::ir::value::Value;

fn base_address(e: &mut A64IrEmitter, word: u32) -> Value {
    get_rn_or_sp(e, true, rn(word))
}

fn read_sized(e: &mut A64IrEmitter, address: Value, size: usize, acc: AccType) -> Value {
    match size {
        1 => e.read_memory_8(address, acc),
        2 => e.read_memory_16(address, acc),
        4 => e.read_memory_32(address, acc),
        _ => e.read_memory_64(address, acc),
    }
}

fn write_sized(e: &mut A64IrEmitter, address: Value, value: Value, size: usize, acc: AccType) {
    match size {
        1 => e.write_memory_8(address, value, acc),
        2 => e.write_memory_16(address, value, acc),
        4 => e.write_memory_32(address, value, acc),
        _ => e.write_memory_64(address, value, acc),
    }
}

fn narrow_for_store(e: &mut A64IrEmitter, word: u32, size: usize) -> Value {
    match size {
        1 => {
            let w = e.get_w(rt(word));
            e.ir.least_significant_byte(w)
        }
        2 => {
            let w = e.get_w(rt(word));
            e.ir.least_significant_half(w)
        }
        4 => e.get_w(rt(word)),
        _ => e.get_x(rt(word)),
    }
}

fn extend_loaded(e: &mut A64IrEmitter, word: u32, loaded: Value, size: usize, extend: Extend) {
    match extend {
        Extend::None => e.set_x(rt(word), loaded),
        Extend::ZeroW => {
            let value = match size {
                1 => e.ir.zero_extend_byte_to_word(loaded),
                2 => e.ir.zero_extend_half_to_word(loaded),
                _ => loaded,
            };
            e.set_w(rt(word), value);
        }
        Extend::SignW => {
            let value = match size {
                1 => e.ir.sign_extend_byte_to_word(loaded),
                _ => e.ir.sign_extend_half_to_word(loaded),
            };
            e.set_w(rt(word), value);
        }
        Extend::SignX => {
            let value = match size {
                1 => e.ir.sign_extend_byte_to_long(loaded),
                2 => e.ir.sign_extend_half_to_long(loaded),
                _ => e.ir.sign_extend_word_to_long(loaded),
            };
            e.set_x(rt(word), value);
        }
    }
}

// --- Literal ---

pub fn ldr_literal(e: &mut A64IrEmitter, word: u32, size: usize, sign: bool) -> Step {
    let offset = sign_extend(((word >> 5) & 0x7FFFF) as u64, 19) * 4;
    let address = Value::ImmU64(e.pc().wrapping_add(offset as u64));
    let loaded = read_sized(e, address, size, AccType::Normal);
    if sign {
        extend_loaded(e, word, loaded, 4, Extend::SignX);
    } else if size == 8 {
        e.set_x(rt(word), loaded);
    } else {
        e.set_w(rt(word), loaded);
    }
    Step::Continue
}

// --- Unsigned immediate offset ---

fn unsigned_offset_address(e: &mut A64IrEmitter, word: u32, size: usize) -> Value {
    let imm12 = ((word >> 10) & 0xFFF) as u64;
    let base = base_address(e, word);
    e.ir.add_64(base, Value::ImmU64(imm12 * size as u64), Value::ImmU1(false))
}

pub fn store_unsigned_imm(e: &mut A64IrEmitter, word: u32, size: usize) -> Step {
    let address = unsigned_offset_address(e, word, size);
    let value = narrow_for_store(e, word, size);
    write_sized(e, address, value, size, AccType::Normal);
    Step::Continue
}

pub fn load_unsigned_imm(e: &mut A64IrEmitter, word: u32, size: usize, extend: Extend) -> Step {
    let address = unsigned_offset_address(e, word, size);
    let loaded = read_sized(e, address, size, AccType::Normal);
    extend_loaded(e, word, loaded, size, extend);
    Step::Continue
}

// --- Register offset ---

fn reg_offset_address(e: &mut A64IrEmitter, word: u32, size: usize) -> Option<Value> {
    let option = (word >> 13) & 7;
    let scaled = (word >> 12) & 1 != 0;
    let shift = if scaled { size.trailing_zeros() as u64 } else { 0 };

    let m = e.get_x(rm(word));
    let offset = match option {
        0b011 => m,
        0b010 => {
            let w = e.ir.least_significant_word(m);
            e.ir.zero_extend_word_to_long(w)
        }
        0b110 => {
            let w = e.ir.least_significant_word(m);
            e.ir.sign_extend_word_to_long(w)
        }
        0b111 => m,
        _ => return None,
    };
    let shifted = e.ir.logical_shift_left_masked_64(offset, Value::ImmU64(shift));
    let base = base_address(e, word);
    Some(e.ir.add_64(base, shifted, Value::ImmU1(false)))
}

fn access_size(word: u32) -> usize {
    1 << (word >> 30)
}

pub fn str_reg(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = access_size(word);
    let Some(address) = reg_offset_address(e, word, size) else {
        return super::raise_undefined(e);
    };
    let value = narrow_for_store(e, word, size);
    write_sized(e, address, value, size, AccType::Normal);
    Step::Continue
}

pub fn ldr_reg(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = access_size(word);
    let Some(address) = reg_offset_address(e, word, size) else {
        return super::raise_undefined(e);
    };
    let loaded = read_sized(e, address, size, AccType::Normal);
    let extend = if size == 8 { Extend::None } else { Extend::ZeroW };
    extend_loaded(e, word, loaded, size, extend);
    Step::Continue
}

// --- Pre/post indexed immediate ---

struct IndexedAddress {
    access: Value,
    updated: Value,
}

fn indexed_address(e: &mut A64IrEmitter, word: u32) -> IndexedAddress {
    let imm9 = sign_extend(((word >> 12) & 0x1FF) as u64, 9);
    let pre = (word >> 11) & 1 != 0;
    let base = base_address(e, word);
    let updated = if imm9 >= 0 {
        e.ir.add_64(base, Value::ImmU64(imm9 as u64), Value::ImmU1(false))
    } else {
        e.ir.sub_64(base, Value::ImmU64(imm9.unsigned_abs()), Value::ImmU1(true))
    };
    let access = if pre { updated } else { base };
    IndexedAddress { access, updated }
}

pub fn str_pre_post(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = access_size(word);
    let addr = indexed_address(e, word);
    let value = narrow_for_store(e, word, size);
    write_sized(e, addr.access, value, size, AccType::Normal);
    set_rd_or_sp(e, true, rn(word), addr.updated);
    Step::Continue
}

pub fn ldr_pre_post(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = access_size(word);
    let addr = indexed_address(e, word);
    let loaded = read_sized(e, addr.access, size, AccType::Normal);
    set_rd_or_sp(e, true, rn(word), addr.updated);
    let extend = if size == 8 { Extend::None } else { Extend::ZeroW };
    extend_loaded(e, word, loaded, size, extend);
    Step::Continue
}

// --- Register pair ---

struct PairAddress {
    first: Value,
    second: Value,
    writeback: Option<Value>,
}

fn pair_address(e: &mut A64IrEmitter, word: u32, size: usize) -> PairAddress {
    let imm7 = sign_extend(((word >> 15) & 0x7F) as u64, 7) * size as i64;
    let pre = (word >> 24) & 1 != 0;
    let wback = (word >> 23) & 1 != 0;

    let base = base_address(e, word);
    let offset_addr = if imm7 >= 0 {
        e.ir.add_64(base, Value::ImmU64(imm7 as u64), Value::ImmU1(false))
    } else {
        e.ir.sub_64(base, Value::ImmU64(imm7.unsigned_abs()), Value::ImmU1(true))
    };
    // Post-index (P=0, W=1) accesses at base; everything else at offset.
    let first = if !pre && wback { base } else { offset_addr };
    let second = e.ir.add_64(first, Value::ImmU64(size as u64), Value::ImmU1(false));
    let writeback = if wback { Some(offset_addr) } else { None };
    PairAddress { first, second, writeback }
}

fn pair_size(word: u32) -> usize {
    if word >> 31 != 0 {
        8
    } else {
        4
    }
}

pub fn stp(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = pair_size(word);
    let addr = pair_address(e, word, size);
    let sf64 = size == 8;
    let v1 = get_reg(e, sf64, rt(word));
    let v2 = get_reg(e, sf64, rt2(word));
    write_sized(e, addr.first, v1, size, AccType::Normal);
    write_sized(e, addr.second, v2, size, AccType::Normal);
    if let Some(updated) = addr.writeback {
        set_rd_or_sp(e, true, rn(word), updated);
    }
    Step::Continue
}

pub fn ldp(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = pair_size(word);
    let addr = pair_address(e, word, size);
    let sf64 = size == 8;
    let v1 = read_sized(e, addr.first, size, AccType::Normal);
    let v2 = read_sized(e, addr.second, size, AccType::Normal);
    set_reg(e, sf64, rt(word), v1);
    set_reg(e, sf64, rt2(word), v2);
    if let Some(updated) = addr.writeback {
        set_rd_or_sp(e, true, rn(word), updated);
    }
    Step::Continue
}

// --- Exclusive / ordered ---

fn exclusive_size(word: u32) -> usize {
    1 << (word >> 30)
}

fn ordered_acc(word: u32) -> AccType {
    if (word >> 15) & 1 != 0 {
        AccType::Ordered
    } else {
        AccType::Normal
    }
}

pub fn ldxr(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = exclusive_size(word);
    let acc = ordered_acc(word);
    let address = base_address(e, word);
    let loaded = match size {
        1 => e.exclusive_read_memory_8(address, acc),
        2 => e.exclusive_read_memory_16(address, acc),
        4 => e.exclusive_read_memory_32(address, acc),
        _ => e.exclusive_read_memory_64(address, acc),
    };
    let extend = if size == 8 { Extend::None } else { Extend::ZeroW };
    extend_loaded(e, word, loaded, size, extend);
    Step::Continue
}

pub fn stxr(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = exclusive_size(word);
    let acc = ordered_acc(word);
    let status_reg = crate::frontend::a64::types::Reg::from_bits(word >> 16);
    let address = base_address(e, word);
    let value = narrow_for_store(e, word, size);
    let status = match size {
        1 => e.exclusive_write_memory_8(address, value, acc),
        2 => e.exclusive_write_memory_16(address, value, acc),
        4 => e.exclusive_write_memory_32(address, value, acc),
        _ => e.exclusive_write_memory_64(address, value, acc),
    };
    e.set_w(status_reg, status);
    Step::Continue
}

pub fn ldar(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = exclusive_size(word);
    let address = base_address(e, word);
    let loaded = read_sized(e, address, size, AccType::Ordered);
    let extend = if size == 8 { Extend::None } else { Extend::ZeroW };
    extend_loaded(e, word, loaded, size, extend);
    // Acquire: later accesses must not move above the load.
    e.data_memory_barrier();
    Step::Continue
}

pub fn stlr(e: &mut A64IrEmitter, word: u32) -> Step {
    let size = exclusive_size(word);
    // Release: earlier accesses must complete first.
    e.data_memory_barrier();
    let address = base_address(e, word);
    let value = narrow_for_store(e, word, size);
    write_sized(e, address, value, size, AccType::Ordered);
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
    fn ldr_unsigned_imm_scales_offset() {
        // LDR X0, [X1, #16]
        let block = lift(0xF940_0820, |e, w| load_unsigned_imm(e, w, 8, Extend::None));
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::Add64 && i.arg(1) == Value::ImmU64(16)
        }));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A64ReadMemory64));
    }

    #[test]
    fn stp_writes_both_slots() {
        // STP X0, X1, [SP, #-16]!
        let block = lift(0xA9BF_07E0, stp);
        let stores = block
            .iter_live()
            .filter(|(_, i)| i.opcode == Opcode::A64WriteMemory64)
            .count();
        assert_eq!(stores, 2);
        // Pre-index writes back to SP.
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A64SetSP));
    }

    #[test]
    fn stxr_status_goes_to_ws() {
        // STXR W2, X3, [X1]
        let block = lift(0xC802_7C23, stxr);
        let status = block
            .iter_live()
            .find(|(_, i)| i.opcode == Opcode::A64ExclusiveWriteMemory64)
            .unwrap()
            .0;
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::A64SetW && i.arg(1) == Value::Inst(status)
        }));
    }
}
