use std::collections::HashMap;

use crate::ir::block::Block;
use crate::ir::types::Type;
use crate::ir::value::{Index, Value};

/// Debug-build integrity check run between passes.
///
/// Verifies SSA form (arguments refer to earlier, live instructions),
/// recomputes use counts, checks argument arity/types against the opcode
/// table, and enforces at most one pseudo-operation per side channel.
pub fn verify(block: &Block) {
    let mut computed_uses: HashMap<Index, u32> = HashMap::new();
    let mut pseudo_seen: HashMap<(Index, crate::ir::opcode::Opcode), u32> = HashMap::new();

    for (idx, inst) in block.iter_live() {
        let arg_types = inst.opcode.arg_types();
        assert_eq!(inst.num_args(), arg_types.len());

        for (slot, (&arg, &expected)) in inst.args().iter().zip(arg_types).enumerate() {
            match arg {
                Value::Inst(target) => {
                    assert!(
                        target < idx,
                        "{idx}: argument {slot} refers to later instruction {target}"
                    );
                    assert!(
                        !block.get(target).is_tombstone(),
                        "{idx}: argument {slot} refers to removed instruction {target}"
                    );
                    *computed_uses.entry(target).or_insert(0) += 1;
                }
                Value::Void => panic!("{idx}: argument {slot} is void"),
                imm => {
                    let t = imm.get_type();
                    assert!(
                        t == expected || expected == Type::Opaque || widens_to(t, expected),
                        "{idx}: argument {slot} has type {t}, expected {expected}"
                    );
                }
            }
        }

        if inst.opcode.is_pseudo_operation() {
            if let Value::Inst(producer) = inst.arg(0) {
                let count = pseudo_seen.entry((producer, inst.opcode)).or_insert(0);
                *count += 1;
                assert_eq!(*count, 1, "{producer}: multiple {:?} consumers", inst.opcode);
            }
        }
    }

    for (idx, inst) in block.iter_live() {
        let computed = computed_uses.get(&idx).copied().unwrap_or(0);
        assert_eq!(
            inst.use_count, computed,
            "{idx}: stored use count {} != computed {computed}",
            inst.use_count
        );
    }
}

/// Immediates of a narrower integer type are accepted where a wider one
/// is expected (the lifter writes `imm32(0)` for U64 slots freely).
fn widens_to(actual: Type, expected: Type) -> bool {
    let order = |t: Type| match t {
        Type::U1 => Some(1),
        Type::U8 => Some(8),
        Type::U16 => Some(16),
        Type::U32 => Some(32),
        Type::U64 => Some(64),
        _ => None,
    };
    matches!((order(actual), order(expected)), (Some(a), Some(e)) if a <= e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::location::LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn accepts_well_formed_block() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let a = block.append(Opcode::Add32, &[Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false)]);
        block.append(
            Opcode::A32SetRegister,
            &[Value::ImmA32Reg(crate::frontend::a32::types::Reg::R0), Value::Inst(a)],
        );
        verify(&block);
    }

    #[test]
    #[should_panic]
    fn rejects_corrupt_use_count() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let a = block.append(Opcode::Not32, &[Value::ImmU32(1)]);
        block.get_mut(a).use_count = 7;
        verify(&block);
    }
}
