use crate::ir::block::Block;
use crate::ir::opcode::Opcode;
use crate::ir::value::{Index, Value};

/// What kind of access last touched a tracked register slot. A get only
/// forwards from a set of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Word,
    Long,
}

#[derive(Clone, Copy, Default)]
struct SlotState {
    /// Last known value of the register, if any.
    known: Option<(Value, TrackKind)>,
    /// Index of a pending store that nothing has observed yet.
    pending_set: Option<Index>,
}

impl SlotState {
    fn on_get(&mut self, block: &mut Block, get: Index, kind: TrackKind) {
        if let Some((value, known_kind)) = self.known {
            if known_kind == kind {
                block.replace_uses_with(get, value);
                return;
            }
        }
        // The get itself becomes the known value; earlier pending stores
        // have now been observed.
        self.known = Some((Value::Inst(get), kind));
        self.pending_set = None;
    }

    fn on_set(&mut self, block: &mut Block, set: Index, value: Value, kind: TrackKind) {
        if let Some(prev) = self.pending_set {
            block.remove(prev);
        }
        self.known = Some((value, kind));
        self.pending_set = Some(set);
    }

    fn invalidate(&mut self) {
        *self = SlotState::default();
    }
}

/// A32 get/set elimination.
///
/// Forwards `GetRegister` through a dominating `SetRegister` of the same
/// register and removes stores that are overwritten before anything can
/// observe them. The terminal (and anything that leaves the block) counts
/// as an observer, so the final store to each register always survives.
pub fn a32_get_set_elimination(block: &mut Block) {
    let mut regs: [SlotState; 16] = [SlotState::default(); 16];
    let mut cpsr = SlotState::default();

    for i in 0..block.instructions.len() {
        if block.instructions[i].is_tombstone() {
            continue;
        }
        let idx = Index(i as u32);
        let opcode = block.instructions[i].opcode;
        match opcode {
            Opcode::A32GetRegister => {
                let n = block.instructions[i].arg(0).a32_reg().number();
                regs[n].on_get(block, idx, TrackKind::Word);
            }
            Opcode::A32SetRegister => {
                let n = block.instructions[i].arg(0).a32_reg().number();
                let value = block.instructions[i].arg(1);
                regs[n].on_set(block, idx, value, TrackKind::Word);
            }
            Opcode::A32GetCpsr => {
                cpsr.on_get(block, idx, TrackKind::Word);
            }
            Opcode::A32SetCpsr => {
                let value = block.instructions[i].arg(0);
                cpsr.on_set(block, idx, value, TrackKind::Word);
            }
            // Partial flag writes invalidate CPSR tracking but cannot be
            // forwarded or elided individually.
            _ if opcode.writes_a32_cpsr() => cpsr.invalidate(),
            _ if opcode.reads_a32_cpsr() => cpsr.invalidate(),
            // A branch-out or PC write may observe any register.
            Opcode::A32BXWritePC
            | Opcode::A32CallSupervisor
            | Opcode::A32ExceptionRaised
            | Opcode::A32CoprocLoadWords => {
                for slot in regs.iter_mut() {
                    slot.pending_set = None;
                }
                cpsr.invalidate();
            }
            _ => {}
        }
    }
}

/// A64 get/set elimination over X/W registers, SP and NZCV.
pub fn a64_get_set_elimination(block: &mut Block) {
    let mut regs: [SlotState; 31] = [SlotState::default(); 31];
    let mut sp = SlotState::default();
    let mut nzcv = SlotState::default();

    for i in 0..block.instructions.len() {
        if block.instructions[i].is_tombstone() {
            continue;
        }
        let idx = Index(i as u32);
        let opcode = block.instructions[i].opcode;
        match opcode {
            Opcode::A64GetW => {
                let n = block.instructions[i].arg(0).a64_reg().number();
                regs[n].on_get(block, idx, TrackKind::Word);
            }
            Opcode::A64GetX => {
                let n = block.instructions[i].arg(0).a64_reg().number();
                regs[n].on_get(block, idx, TrackKind::Long);
            }
            Opcode::A64SetW => {
                let n = block.instructions[i].arg(0).a64_reg().number();
                let value = block.instructions[i].arg(1);
                regs[n].on_set(block, idx, value, TrackKind::Word);
            }
            Opcode::A64SetX => {
                let n = block.instructions[i].arg(0).a64_reg().number();
                let value = block.instructions[i].arg(1);
                regs[n].on_set(block, idx, value, TrackKind::Long);
            }
            Opcode::A64GetSP => sp.on_get(block, idx, TrackKind::Long),
            Opcode::A64SetSP => {
                let value = block.instructions[i].arg(0);
                sp.on_set(block, idx, value, TrackKind::Long);
            }
            Opcode::A64GetNZCVRaw => nzcv.on_get(block, idx, TrackKind::Word),
            Opcode::A64SetNZCVRaw => {
                let value = block.instructions[i].arg(0);
                nzcv.on_set(block, idx, value, TrackKind::Word);
            }
            _ if opcode.writes_a64_nzcv() || opcode.reads_a64_nzcv() => nzcv.invalidate(),
            Opcode::A64SetPC | Opcode::A64CallSupervisor | Opcode::A64ExceptionRaised => {
                for slot in regs.iter_mut() {
                    slot.pending_set = None;
                }
                sp.pending_set = None;
                nzcv.invalidate();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a32::types::Reg;
    use crate::ir::location::LocationDescriptor;

    #[test]
    fn get_after_set_forwards_value() {
        let mut block = Block::new(LocationDescriptor::new(0));
        block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(42)]);
        let get = block.append(Opcode::A32GetRegister, &[Value::ImmA32Reg(Reg::R0)]);
        let not = block.append(Opcode::Not32, &[Value::Inst(get)]);
        block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R1), Value::Inst(not)]);

        a32_get_set_elimination(&mut block);

        assert!(block.get(get).is_tombstone());
        assert_eq!(block.get(not).arg(0), Value::ImmU32(42));
    }

    #[test]
    fn dead_store_is_removed() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let first = block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(1)]);
        let second = block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(2)]);

        a32_get_set_elimination(&mut block);

        assert!(block.get(first).is_tombstone());
        assert!(!block.get(second).is_tombstone());
    }

    #[test]
    fn forwarded_get_does_not_protect_overwritten_store() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let set = block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(1)]);
        let get = block.append(Opcode::A32GetRegister, &[Value::ImmA32Reg(Reg::R0)]);
        let not = block.append(Opcode::Not32, &[Value::Inst(get)]);
        block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R1), Value::Inst(not)]);
        let set2 = block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(2)]);

        a32_get_set_elimination(&mut block);

        // The get reads the constant, so the first store is dead once the
        // second overwrites it; the final store must survive.
        assert!(block.get(set).is_tombstone());
        assert!(block.get(get).is_tombstone());
        assert!(!block.get(set2).is_tombstone());
    }

    #[test]
    fn final_store_survives_block_exit() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let set = block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R0), Value::ImmU32(3)]);
        a32_get_set_elimination(&mut block);
        assert!(!block.get(set).is_tombstone());
    }

    #[test]
    fn a64_w_and_x_do_not_alias_forward() {
        use crate::frontend::a64::types::Reg as XReg;
        let mut block = Block::new(LocationDescriptor::new(0));
        block.append(Opcode::A64SetW, &[Value::ImmA64Reg(XReg::from_bits(0)), Value::ImmU32(1)]);
        let get_x = block.append(Opcode::A64GetX, &[Value::ImmA64Reg(XReg::from_bits(0))]);
        block.append(Opcode::A64SetX, &[Value::ImmA64Reg(XReg::from_bits(1)), Value::Inst(get_x)]);

        a64_get_set_elimination(&mut block);

        // A W-store cannot satisfy an X-load.
        assert!(!block.get(get_x).is_tombstone());
    }
}
