use std::fmt;

use crate::ir::cond::Cond;
use crate::ir::inst::Inst;
use crate::ir::location::LocationDescriptor;
use crate::ir::opcode::Opcode;
use crate::ir::terminal::Terminal;
use crate::ir::types::Type;
use crate::ir::value::{Index, Value};

/// A coprocessor access resolved against the embedder at translation
/// time. `ImmCoprocInfo` values index into the block's action table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoprocAction {
    /// Call a host function: `fn(user_arg, arg0, arg1) -> u64`.
    Callback { function: u64, user_arg: u64 },
    /// Direct load/store through a host pointer to one word.
    OneWordPtr(u64),
    /// Direct load/store through two host word pointers.
    TwoWordPtrs(u64, u64),
}

/// A basic block of microinstructions plus its terminal.
///
/// Instructions are stored in an arena and removed by tombstoning, so an
/// [`Index`] handed out by [`Block::append`] stays valid for the block's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Block {
    /// Starting location of the guest code this block was lifted from.
    pub location: LocationDescriptor,
    /// Location following the last lifted instruction.
    pub end_location: LocationDescriptor,
    /// Guest PC range `[start, end)` covered by this block, for
    /// self-modifying-code invalidation.
    pub pc_range: (u64, u64),
    pub instructions: Vec<Inst>,
    pub terminal: Terminal,
    /// Guest cycles this block accounts for.
    pub cycle_count: u64,
    /// A32 block-level condition, when every lifted instruction shares one.
    pub cond: Option<Cond>,
    /// Where execution resumes if `cond` fails.
    pub cond_failed_location: Option<LocationDescriptor>,
    /// Coprocessor actions referenced by `ImmCoprocInfo` arguments.
    pub coproc_actions: Vec<CoprocAction>,
}

impl Block {
    pub fn new(location: LocationDescriptor) -> Self {
        Self {
            location,
            end_location: location,
            pc_range: (0, 0),
            instructions: Vec::new(),
            terminal: Terminal::Invalid,
            cycle_count: 0,
            cond: None,
            cond_failed_location: None,
            coproc_actions: Vec::new(),
        }
    }

    /// Intern a coprocessor action, returning its `ImmCoprocInfo` index.
    pub fn add_coproc_action(&mut self, action: CoprocAction) -> u64 {
        self.coproc_actions.push(action);
        (self.coproc_actions.len() - 1) as u64
    }

    /// Append an instruction, bumping use counts of its operands.
    pub fn append(&mut self, opcode: Opcode, args: &[Value]) -> Index {
        for arg in args {
            if let Value::Inst(i) = arg {
                self.instructions[i.index()].use_count += 1;
            }
        }
        let idx = Index(self.instructions.len() as u32);
        self.instructions.push(Inst::new(opcode, args));
        idx
    }

    pub fn get(&self, i: Index) -> &Inst {
        &self.instructions[i.index()]
    }

    pub fn get_mut(&mut self, i: Index) -> &mut Inst {
        &mut self.instructions[i.index()]
    }

    pub fn set_terminal(&mut self, terminal: Terminal) {
        self.terminal = terminal;
    }

    pub fn inst_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn live_inst_count(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_tombstone()).count()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (Index, &Inst)> {
        self.instructions
            .iter()
            .enumerate()
            .filter(|(_, inst)| !inst.is_tombstone())
            .map(|(i, inst)| (Index(i as u32), inst))
    }

    /// Find the pseudo-operation of kind `opcode` attached to `producer`,
    /// if any. At most one may exist per side channel.
    pub fn associated_pseudo_operation(&self, producer: Index, opcode: Opcode) -> Option<Index> {
        debug_assert!(opcode.is_pseudo_operation());
        let mut found = None;
        for (i, inst) in self.iter_live() {
            if inst.opcode == opcode && inst.arg(0) == Value::Inst(producer) {
                assert!(found.is_none(), "duplicate {opcode:?} attached to {producer}");
                found = Some(i);
            }
        }
        found
    }

    /// Replace every use of `target`'s result with `replacement`, fix up
    /// use counts, and tombstone `target`.
    pub fn replace_uses_with(&mut self, target: Index, replacement: Value) {
        // The target's own operands lose a use each.
        for j in 0..self.instructions[target.index()].num_args() {
            if let Value::Inst(arg) = self.instructions[target.index()].args[j] {
                let inst = &mut self.instructions[arg.index()];
                debug_assert!(inst.use_count > 0);
                inst.use_count = inst.use_count.saturating_sub(1);
            }
        }

        let mut replaced = 0u32;
        for inst in &mut self.instructions {
            for slot in inst.args.iter_mut() {
                if *slot == Value::Inst(target) {
                    *slot = replacement;
                    replaced += 1;
                }
            }
        }
        if let Value::Inst(new) = replacement {
            self.instructions[new.index()].use_count += replaced;
        }

        self.instructions[target.index()].tombstone();
    }

    /// Tombstone an instruction, releasing its operand uses. The caller
    /// must ensure its result is unused.
    pub fn remove(&mut self, target: Index) {
        debug_assert_eq!(self.instructions[target.index()].use_count, 0);
        for j in 0..self.instructions[target.index()].num_args() {
            if let Value::Inst(arg) = self.instructions[target.index()].args[j] {
                let inst = &mut self.instructions[arg.index()];
                inst.use_count = inst.use_count.saturating_sub(1);
            }
        }
        self.instructions[target.index()].tombstone();
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block {} (cycles: {}):", self.location, self.cycle_count)?;
        if let Some(cond) = self.cond {
            writeln!(f, "  cond: {cond}")?;
        }
        for (i, inst) in self.iter_live() {
            if inst.return_type() == Type::Void {
                writeln!(f, "  {inst}")?;
            } else {
                writeln!(f, "  {i} = {inst}")?;
            }
        }
        writeln!(f, "  terminal: {}", self.terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a32::types::Reg;

    #[test]
    fn append_tracks_uses() {
        let mut block = Block::new(LocationDescriptor::new(0x1000));
        let r0 = block.append(Opcode::A32GetRegister, &[Value::ImmA32Reg(Reg::R0)]);
        let r1 = block.append(Opcode::A32GetRegister, &[Value::ImmA32Reg(Reg::R1)]);
        let sum = block.append(
            Opcode::Add32,
            &[Value::Inst(r0), Value::Inst(r1), Value::ImmU1(false)],
        );
        block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R2), Value::Inst(sum)]);

        assert_eq!(block.get(r0).use_count, 1);
        assert_eq!(block.get(r1).use_count, 1);
        assert_eq!(block.get(sum).use_count, 1);
        assert_eq!(block.live_inst_count(), 4);
    }

    #[test]
    fn replace_uses_rewrites_and_tombstones() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let get = block.append(Opcode::A32GetRegister, &[Value::ImmA32Reg(Reg::R0)]);
        let not = block.append(Opcode::Not32, &[Value::Inst(get)]);
        block.append(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R1), Value::Inst(not)]);

        block.replace_uses_with(not, Value::ImmU32(0xFFFF_FFFF));
        assert!(block.get(not).is_tombstone());
        assert_eq!(block.get(get).use_count, 0);
        let set = block.instructions.last().unwrap();
        assert_eq!(set.args[1], Value::ImmU32(0xFFFF_FFFF));
    }

    #[test]
    fn pseudo_operation_lookup() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let add = block.append(Opcode::Add32, &[Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false)]);
        let carry = block.append(Opcode::GetCarryFromOp, &[Value::Inst(add)]);
        assert_eq!(block.associated_pseudo_operation(add, Opcode::GetCarryFromOp), Some(carry));
        assert_eq!(block.associated_pseudo_operation(add, Opcode::GetOverflowFromOp), None);
    }

    #[test]
    fn removing_pseudo_releases_producer() {
        let mut block = Block::new(LocationDescriptor::new(0));
        let add = block.append(Opcode::Add32, &[Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false)]);
        let carry = block.append(Opcode::GetCarryFromOp, &[Value::Inst(add)]);
        assert_eq!(block.get(add).use_count, 1);
        block.remove(carry);
        assert_eq!(block.get(add).use_count, 0);
        assert_eq!(block.associated_pseudo_operation(add, Opcode::GetCarryFromOp), None);
    }
}
