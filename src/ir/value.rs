use std::fmt;

use crate::frontend::a32::types::Reg as A32Reg;
use crate::frontend::a64::types::{Reg as A64Reg, Vec as A64Vec};
use crate::ir::acc_type::AccType;
use crate::ir::cond::Cond;
use crate::ir::types::Type;

/// Index of an instruction within its block's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index(pub u32);

impl Index {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An IR operand: either an immediate or the result of an earlier
/// instruction in the same block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Inst(Index),
    ImmU1(bool),
    ImmU8(u8),
    ImmU16(u16),
    ImmU32(u32),
    ImmU64(u64),
    ImmA32Reg(A32Reg),
    ImmA64Reg(A64Reg),
    ImmA64Vec(A64Vec),
    ImmCond(Cond),
    ImmAccType(AccType),
    /// Packed coprocessor operation descriptor (see frontend::a32::translate::coprocessor).
    ImmCoprocInfo(u64),
}

impl Value {
    pub fn get_type(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Inst(_) => Type::Opaque,
            Value::ImmU1(_) => Type::U1,
            Value::ImmU8(_) => Type::U8,
            Value::ImmU16(_) => Type::U16,
            Value::ImmU32(_) => Type::U32,
            Value::ImmU64(_) => Type::U64,
            Value::ImmA32Reg(_) => Type::A32Reg,
            Value::ImmA64Reg(_) => Type::A64Reg,
            Value::ImmA64Vec(_) => Type::A64Vec,
            Value::ImmCond(_) => Type::Cond,
            Value::ImmAccType(_) => Type::AccType,
            Value::ImmCoprocInfo(_) => Type::CoprocInfo,
        }
    }

    #[inline]
    pub fn is_inst(&self) -> bool {
        matches!(self, Value::Inst(_))
    }

    #[inline]
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Value::Inst(_) | Value::Void)
    }

    pub fn inst(&self) -> Index {
        match self {
            Value::Inst(i) => *i,
            other => panic!("Value::inst on {other:?}"),
        }
    }

    pub fn u1(&self) -> bool {
        match self {
            Value::ImmU1(v) => *v,
            other => panic!("Value::u1 on {other:?}"),
        }
    }

    pub fn u8(&self) -> u8 {
        match self {
            Value::ImmU8(v) => *v,
            other => panic!("Value::u8 on {other:?}"),
        }
    }

    pub fn u32(&self) -> u32 {
        match self {
            Value::ImmU32(v) => *v,
            other => panic!("Value::u32 on {other:?}"),
        }
    }

    pub fn u64(&self) -> u64 {
        match self {
            Value::ImmU64(v) => *v,
            other => panic!("Value::u64 on {other:?}"),
        }
    }

    pub fn a32_reg(&self) -> A32Reg {
        match self {
            Value::ImmA32Reg(r) => *r,
            other => panic!("Value::a32_reg on {other:?}"),
        }
    }

    pub fn a64_reg(&self) -> A64Reg {
        match self {
            Value::ImmA64Reg(r) => *r,
            other => panic!("Value::a64_reg on {other:?}"),
        }
    }

    pub fn a64_vec(&self) -> A64Vec {
        match self {
            Value::ImmA64Vec(v) => *v,
            other => panic!("Value::a64_vec on {other:?}"),
        }
    }

    pub fn cond(&self) -> Cond {
        match self {
            Value::ImmCond(c) => *c,
            other => panic!("Value::cond on {other:?}"),
        }
    }

    pub fn acc_type(&self) -> AccType {
        match self {
            Value::ImmAccType(a) => *a,
            other => panic!("Value::acc_type on {other:?}"),
        }
    }

    pub fn coproc_info(&self) -> u64 {
        match self {
            Value::ImmCoprocInfo(v) => *v,
            other => panic!("Value::coproc_info on {other:?}"),
        }
    }

    /// Any integer immediate, zero-extended.
    pub fn imm_u64(&self) -> u64 {
        match self {
            Value::ImmU1(v) => *v as u64,
            Value::ImmU8(v) => *v as u64,
            Value::ImmU16(v) => *v as u64,
            Value::ImmU32(v) => *v as u64,
            Value::ImmU64(v) => *v,
            other => panic!("Value::imm_u64 on {other:?}"),
        }
    }

    /// Any integer immediate, sign-extended.
    pub fn imm_i64(&self) -> i64 {
        match self {
            Value::ImmU1(v) => *v as i64,
            Value::ImmU8(v) => *v as i8 as i64,
            Value::ImmU16(v) => *v as i16 as i64,
            Value::ImmU32(v) => *v as i32 as i64,
            Value::ImmU64(v) => *v as i64,
            other => panic!("Value::imm_i64 on {other:?}"),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.is_immediate() && self.get_type().bit_width() != 0 && self.imm_u64() == 0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Inst(i) => write!(f, "{i}"),
            Value::ImmU1(v) => write!(f, "#{}", *v as u8),
            Value::ImmU8(v) => write!(f, "#{v:#x}"),
            Value::ImmU16(v) => write!(f, "#{v:#x}"),
            Value::ImmU32(v) => write!(f, "#{v:#x}"),
            Value::ImmU64(v) => write!(f, "#{v:#x}"),
            Value::ImmA32Reg(r) => write!(f, "{r}"),
            Value::ImmA64Reg(r) => write!(f, "{r}"),
            Value::ImmA64Vec(v) => write!(f, "{v}"),
            Value::ImmCond(c) => write!(f, "{c}"),
            Value::ImmAccType(a) => write!(f, "{a}"),
            Value::ImmCoprocInfo(v) => write!(f, "coproc:{v:#x}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::ImmU1(v)
    }
}
impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::ImmU8(v)
    }
}
impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::ImmU16(v)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::ImmU32(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::ImmU64(v)
    }
}
impl From<Index> for Value {
    fn from(i: Index) -> Self {
        Value::Inst(i)
    }
}
impl From<Cond> for Value {
    fn from(c: Cond) -> Self {
        Value::ImmCond(c)
    }
}
