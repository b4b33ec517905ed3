use crate::ir::block::Block;
use crate::ir::value::Index;

/// Dead code elimination.
///
/// Walks backwards so removing a use can expose its operands for removal
/// in the same pass. Instructions with side effects are never removed;
/// a pseudo-operation with no users is removed like any other
/// instruction, releasing its producer link.
pub fn dead_code_elimination(block: &mut Block) {
    for i in (0..block.instructions.len()).rev() {
        let inst = &block.instructions[i];
        if inst.is_tombstone() || inst.has_side_effects() || inst.use_count != 0 {
            continue;
        }
        block.remove(Index(i as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::location::LocationDescriptor;
    use crate::ir::opcode::Opcode;
    use crate::ir::value::Value;

    #[test]
    fn removes_unused_chain() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let a = block.append(Opcode::Not32, &[Value::ImmU32(1)]);
        let b = block.append(Opcode::Not32, &[Value::Inst(a)]);
        assert_eq!(block.get(a).use_count, 1);

        dead_code_elimination(&mut block);

        assert!(block.get(a).is_tombstone());
        assert!(block.get(b).is_tombstone());
    }

    #[test]
    fn keeps_side_effects_and_their_operands() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let a = block.append(Opcode::Not32, &[Value::ImmU32(1)]);
        block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R0), Value::Inst(a)],
        );

        dead_code_elimination(&mut block);

        assert_eq!(block.live_inst_count(), 2);
    }

    #[test]
    fn unused_pseudo_releases_producer() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let add = block.append(Opcode::Add32, &[Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false)]);
        let _carry = block.append(Opcode::GetCarryFromOp, &[Value::Inst(add)]);

        dead_code_elimination(&mut block);

        // Carry is unused, then the add becomes unused.
        assert_eq!(block.live_inst_count(), 0);
    }
}
