use std::fmt;

use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::Value;

/// Maximum argument count of any opcode.
pub const MAX_ARGS: usize = 4;

/// A single microinstruction.
///
/// Instructions live in their block's arena and refer to one another by
/// [`crate::ir::value::Index`]. `use_count` is maintained by the block as
/// arguments are added or rewritten; an instruction with `use_count == 0`
/// and no side effects is dead.
#[derive(Debug, Clone)]
pub struct Inst {
    pub opcode: Opcode,
    pub args: [Value; MAX_ARGS],
    pub use_count: u32,
}

impl Inst {
    pub fn new(opcode: Opcode, args: &[Value]) -> Self {
        assert!(
            args.len() == opcode.num_args(),
            "{:?} expects {} args, got {}",
            opcode,
            opcode.num_args(),
            args.len()
        );
        let mut packed = [Value::Void; MAX_ARGS];
        packed[..args.len()].copy_from_slice(args);
        Self { opcode, args: packed, use_count: 0 }
    }

    pub fn return_type(&self) -> Type {
        self.opcode.return_type()
    }

    pub fn num_args(&self) -> usize {
        self.opcode.num_args()
    }

    pub fn arg(&self, i: usize) -> Value {
        debug_assert!(i < self.num_args());
        self.args[i]
    }

    pub fn args(&self) -> &[Value] {
        &self.args[..self.num_args()]
    }

    /// A removed instruction. The arena slot is kept so indices of later
    /// instructions remain valid.
    pub fn is_tombstone(&self) -> bool {
        self.opcode == Opcode::Void
    }

    pub fn tombstone(&mut self) {
        self.opcode = Opcode::Void;
        self.args = [Value::Void; MAX_ARGS];
        self.use_count = 0;
    }

    pub fn has_side_effects(&self) -> bool {
        self.opcode.has_side_effects()
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, arg) in self.args().iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::Index;

    #[test]
    fn construction_checks_arity() {
        let inst = Inst::new(
            Opcode::Add32,
            &[Value::Inst(Index(0)), Value::Inst(Index(1)), Value::ImmU1(false)],
        );
        assert_eq!(inst.num_args(), 3);
        assert!(!inst.is_tombstone());
    }

    #[test]
    #[should_panic]
    fn wrong_arity_panics() {
        let _ = Inst::new(Opcode::Add32, &[Value::ImmU32(1)]);
    }

    #[test]
    fn tombstone_clears_args() {
        let mut inst = Inst::new(Opcode::Not32, &[Value::ImmU32(5)]);
        inst.tombstone();
        assert!(inst.is_tombstone());
        assert_eq!(inst.args[0], Value::Void);
    }
}
