use crate::frontend::a32::decode::{self, Thumb32Inst};
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::acc_type::AccType;
use crate::ir::cond::Cond;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

/// Decode the T2 branch immediate: S:I1:I2:imm10:imm11:0 with
/// I1 = NOT(J1 EOR S), I2 = NOT(J2 EOR S).
fn branch_imm24(hw1: u16, hw2: u16) -> i32 {
    let s = (hw1 >> 10) & 1;
    let imm10 = (hw1 & 0x3FF) as u32;
    let j1 = ((hw2 >> 13) & 1) as u32;
    let j2 = ((hw2 >> 11) & 1) as u32;
    let imm11 = (hw2 & 0x7FF) as u32;
    let i1 = !(j1 ^ s as u32) & 1;
    let i2 = !(j2 ^ s as u32) & 1;
    let raw = ((s as u32) << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
    // Sign-extend from 25 bits.
    ((raw << 7) as i32) >> 7
}

pub fn translate(e: &mut A32IrEmitter, hw1: u16, hw2: u16) -> Step {
    let Some(matcher) = decode::decode_thumb32(hw1, hw2) else {
        return super::raise_undefined(e);
    };

    use Thumb32Inst::*;
    match matcher.inst {
        Udf => super::raise_undefined(e),
        Clrex => {
            e.clear_exclusive();
            Step::Continue
        }
        Dsb => {
            e.data_synchronization_barrier();
            Step::Continue
        }
        Dmb => {
            e.data_memory_barrier();
            Step::Continue
        }
        Isb => {
            e.instruction_synchronization_barrier();
            let next = e.current_location.advance_pc(4).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
        Bl => {
            let offset = branch_imm24(hw1, hw2);
            let target = e.pc().wrapping_add(4).wrapping_add(offset as u32);
            let lr = (e.pc().wrapping_add(4)) | 1;
            e.set_register(Reg::R14, Value::ImmU32(lr));
            let ret = e.current_location.advance_pc(4);
            e.ir.push_rsb(ret.to_location().value());
            let next = e.current_location.set_pc(target).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
        BlxImm => {
            let offset = branch_imm24(hw1, hw2) & !3;
            let target = ((e.pc().wrapping_add(4)) & !3).wrapping_add(offset as u32);
            let lr = (e.pc().wrapping_add(4)) | 1;
            e.set_register(Reg::R14, Value::ImmU32(lr));
            let ret = e.current_location.advance_pc(4);
            e.ir.push_rsb(ret.to_location().value());
            let next_location = e.current_location.set_t_flag(false).set_pc(target);
            e.update_upper_location_descriptor(next_location.upper_location_descriptor());
            e.set_term(Terminal::LinkBlock { next: next_location.to_location() });
            Step::Stop
        }
        BW => {
            let offset = branch_imm24(hw1, hw2);
            let target = e.pc().wrapping_add(4).wrapping_add(offset as u32);
            let next = e.current_location.set_pc(target).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
        BCondW => {
            // S:J2:J1:imm6:imm11:0, sign-extended from 21 bits.
            let s = ((hw1 >> 10) & 1) as u32;
            let imm6 = (hw1 & 0x3F) as u32;
            let j1 = ((hw2 >> 13) & 1) as u32;
            let j2 = ((hw2 >> 11) & 1) as u32;
            let imm11 = (hw2 & 0x7FF) as u32;
            let raw = (s << 20) | (j2 << 19) | (j1 << 18) | (imm6 << 12) | (imm11 << 1);
            let offset = ((raw << 11) as i32) >> 11;
            let cond = Cond::from_bits(((hw1 >> 6) & 0xF) as u32);
            let target = e.pc().wrapping_add(4).wrapping_add(offset as u32);
            let taken = e.current_location.set_pc(target).to_location();
            let not_taken = e.current_location.advance_pc(4).to_location();
            e.set_term(Terminal::if_then_else(
                cond,
                Terminal::LinkBlock { next: taken },
                Terminal::LinkBlock { next: not_taken },
            ));
            Step::Stop
        }
        Movw => {
            let imm = decode_imm16(hw1, hw2);
            let rd = Reg::from_bits(((hw2 >> 8) & 0xF) as u32);
            e.set_register(rd, Value::ImmU32(imm));
            Step::Continue
        }
        Movt => {
            let imm = decode_imm16(hw1, hw2);
            let rd = Reg::from_bits(((hw2 >> 8) & 0xF) as u32);
            let old = e.get_register(rd);
            let low = e.ir.and_32(old, Value::ImmU32(0xFFFF));
            let result = e.ir.or_32(low, Value::ImmU32(imm << 16));
            e.set_register(rd, result);
            Step::Continue
        }
        LdrImm12 => {
            let rn = Reg::from_bits(((hw1) & 0xF) as u32);
            let rt = Reg::from_bits(((hw2 >> 12) & 0xF) as u32);
            let base = e.get_register(rn);
            let address =
                e.ir.add_32(base, Value::ImmU32((hw2 & 0xFFF) as u32), Value::ImmU1(false));
            let value = e.read_memory_32(address, AccType::Normal);
            if rt == Reg::R15 {
                e.load_write_pc(value);
                e.set_term(Terminal::PopRSBHint);
                return Step::Stop;
            }
            e.set_register(rt, value);
            Step::Continue
        }
        StrImm12 => {
            let rn = Reg::from_bits(((hw1) & 0xF) as u32);
            let rt = Reg::from_bits(((hw2 >> 12) & 0xF) as u32);
            let base = e.get_register(rn);
            let address =
                e.ir.add_32(base, Value::ImmU32((hw2 & 0xFFF) as u32), Value::ImmU1(false));
            let value = e.get_register(rt);
            e.write_memory_32(address, value, AccType::Normal);
            Step::Continue
        }
    }
}

/// imm4:i:imm3:imm8 of the T3 MOVW/MOVT encodings.
fn decode_imm16(hw1: u16, hw2: u16) -> u32 {
    let imm4 = (hw1 & 0xF) as u32;
    let i = ((hw1 >> 10) & 1) as u32;
    let imm3 = ((hw2 >> 12) & 0x7) as u32;
    let imm8 = (hw2 & 0xFF) as u32;
    (imm4 << 12) | (i << 11) | (imm3 << 8) | imm8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    fn lift(hw1: u16, hw2: u16) -> Block {
        let loc = A32LocationDescriptor::at(0x1000).set_t_flag(true);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        translate(&mut e, hw1, hw2);
        block
    }

    #[test]
    fn bl_zero_offset_targets_next() {
        let block = lift(0xF000, 0xF800);
        match block.terminal {
            Terminal::LinkBlock { next } => {
                assert_eq!(A32LocationDescriptor::from_location(next).pc(), 0x1004);
            }
            ref other => panic!("unexpected terminal {other}"),
        }
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::PushRSB));
    }

    #[test]
    fn branch_imm_sign_extends() {
        // Negative offset: S=1 with J bits giving all-ones extension.
        let off = branch_imm24(0xF7FF, 0xFFFE);
        assert!(off < 0);
    }
}
