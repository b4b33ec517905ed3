use std::fmt;

use crate::ir::types::Type;

/// Declares every IR opcode together with its result type and argument
/// types. Each opcode appears in exactly one row; the backend's emission
/// dispatch matches on the enum without a wildcard arm, so adding a row
/// here without an emission routine is a compile error rather than a
/// runtime surprise.
macro_rules! opcodes {
    ($($name:ident: $ret:ident [$($arg:ident),*]),* $(,)?) => {
        /// A microinstruction operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            pub fn return_type(self) -> Type {
                match self {
                    $(Opcode::$name => Type::$ret),*
                }
            }

            pub fn arg_types(self) -> &'static [Type] {
                match self {
                    $(Opcode::$name => &[$(Type::$arg),*]),*
                }
            }
        }
    };
}

opcodes! {
    // --- Core ---
    Void: Void [],
    Identity: Opaque [Opaque],
    Breakpoint: Void [],

    // --- Pseudo-operations (side outputs of a producer inst) ---
    GetCarryFromOp: U1 [Opaque],
    GetOverflowFromOp: U1 [Opaque],
    GetNZCVFromOp: Nzcv [Opaque],

    // --- Flag plumbing ---
    NZCVFromPackedFlags: Nzcv [U32],
    ConditionalSelectNZCV: Nzcv [Cond, Nzcv, Nzcv],

    // --- Packing / extraction ---
    Pack2x32To1x64: U64 [U32, U32],
    LeastSignificantWord: U32 [U64],
    MostSignificantWord: U32 [U64],
    LeastSignificantHalf: U16 [U32],
    LeastSignificantByte: U8 [U32],
    MostSignificantBit: U1 [U32],
    IsZero32: U1 [U32],
    IsZero64: U1 [U64],
    TestBit: U1 [U64, U8],

    // --- Conditional select ---
    ConditionalSelect32: U32 [Cond, U32, U32],
    ConditionalSelect64: U64 [Cond, U64, U64],

    // --- Shifts (A32 forms: carry-in, carry-out via pseudo-op) ---
    LogicalShiftLeft32: U32 [U32, U8, U1],
    LogicalShiftRight32: U32 [U32, U8, U1],
    ArithmeticShiftRight32: U32 [U32, U8, U1],
    RotateRight32: U32 [U32, U8, U1],
    RotateRightExtended: U32 [U32, U1],

    // --- Shifts (A64 forms: amount masked to type width) ---
    LogicalShiftLeft64: U64 [U64, U8],
    LogicalShiftRight64: U64 [U64, U8],
    ArithmeticShiftRight64: U64 [U64, U8],
    RotateRight64: U64 [U64, U8],
    LogicalShiftLeftMasked32: U32 [U32, U32],
    LogicalShiftLeftMasked64: U64 [U64, U64],
    LogicalShiftRightMasked32: U32 [U32, U32],
    LogicalShiftRightMasked64: U64 [U64, U64],
    ArithmeticShiftRightMasked32: U32 [U32, U32],
    ArithmeticShiftRightMasked64: U64 [U64, U64],
    RotateRightMasked32: U32 [U32, U32],
    RotateRightMasked64: U64 [U64, U64],

    // --- Arithmetic ---
    Add32: U32 [U32, U32, U1],
    Add64: U64 [U64, U64, U1],
    Sub32: U32 [U32, U32, U1],
    Sub64: U64 [U64, U64, U1],
    Mul32: U32 [U32, U32],
    Mul64: U64 [U64, U64],
    SignedMultiplyHigh64: U64 [U64, U64],
    UnsignedMultiplyHigh64: U64 [U64, U64],
    UnsignedDiv32: U32 [U32, U32],
    UnsignedDiv64: U64 [U64, U64],
    SignedDiv32: U32 [U32, U32],
    SignedDiv64: U64 [U64, U64],

    // --- Logical ---
    And32: U32 [U32, U32],
    And64: U64 [U64, U64],
    AndNot32: U32 [U32, U32],
    AndNot64: U64 [U64, U64],
    Eor32: U32 [U32, U32],
    Eor64: U64 [U64, U64],
    Or32: U32 [U32, U32],
    Or64: U64 [U64, U64],
    Not32: U32 [U32],
    Not64: U64 [U64],

    // --- Extension ---
    SignExtendByteToWord: U32 [U8],
    SignExtendHalfToWord: U32 [U16],
    SignExtendByteToLong: U64 [U8],
    SignExtendHalfToLong: U64 [U16],
    SignExtendWordToLong: U64 [U32],
    ZeroExtendByteToWord: U32 [U8],
    ZeroExtendHalfToWord: U32 [U16],
    ZeroExtendByteToLong: U64 [U8],
    ZeroExtendHalfToLong: U64 [U16],
    ZeroExtendWordToLong: U64 [U32],

    // --- Byte reversal / bit counting / extraction ---
    ByteReverseWord: U32 [U32],
    ByteReverseHalf: U16 [U16],
    ByteReverseDual: U64 [U64],
    CountLeadingZeros32: U32 [U32],
    CountLeadingZeros64: U64 [U64],
    ExtractRegister32: U32 [U32, U32, U8],
    ExtractRegister64: U64 [U64, U64, U8],

    // --- Saturating arithmetic (overflow via GetOverflowFromOp) ---
    SignedSaturatedAdd8: U8 [U8, U8],
    SignedSaturatedAdd16: U16 [U16, U16],
    SignedSaturatedAdd32: U32 [U32, U32],
    SignedSaturatedAdd64: U64 [U64, U64],
    SignedSaturatedSub8: U8 [U8, U8],
    SignedSaturatedSub16: U16 [U16, U16],
    SignedSaturatedSub32: U32 [U32, U32],
    SignedSaturatedSub64: U64 [U64, U64],
    UnsignedSaturatedAdd8: U8 [U8, U8],
    UnsignedSaturatedAdd16: U16 [U16, U16],
    UnsignedSaturatedAdd32: U32 [U32, U32],
    UnsignedSaturatedAdd64: U64 [U64, U64],
    UnsignedSaturatedSub8: U8 [U8, U8],
    UnsignedSaturatedSub16: U16 [U16, U16],
    UnsignedSaturatedSub32: U32 [U32, U32],
    UnsignedSaturatedSub64: U64 [U64, U64],
    SignedSaturation: U32 [U32, U8],
    UnsignedSaturation: U32 [U32, U8],
    SignedSaturatedDoublingMultiplyReturnHigh16: U16 [U16, U16],
    SignedSaturatedDoublingMultiplyReturnHigh32: U32 [U32, U32],

    // --- CRC32 ---
    CRC32Castagnoli8: U32 [U32, U32],
    CRC32Castagnoli16: U32 [U32, U32],
    CRC32Castagnoli32: U32 [U32, U32],
    CRC32Castagnoli64: U32 [U32, U64],
    CRC32ISO8: U32 [U32, U32],
    CRC32ISO16: U32 [U32, U32],
    CRC32ISO32: U32 [U32, U32],
    CRC32ISO64: U32 [U32, U64],

    // --- 128-bit vector (crypto support) ---
    VectorEor: U128 [U128, U128],
    AESDecryptSingleRound: U128 [U128],
    AESEncryptSingleRound: U128 [U128],
    AESInverseMixColumns: U128 [U128],
    AESMixColumns: U128 [U128],

    // --- RSB ---
    PushRSB: Void [U64],

    // --- A64 context ---
    A64SetCheckBit: Void [U1],
    A64GetCFlag: U1 [],
    A64GetNZCVRaw: U32 [],
    A64SetNZCVRaw: Void [U32],
    A64SetNZCV: Void [Nzcv],
    A64GetW: U32 [A64Reg],
    A64GetX: U64 [A64Reg],
    A64GetSP: U64 [],
    A64GetQ: U128 [A64Vec],
    A64SetW: Void [A64Reg, U32],
    A64SetX: Void [A64Reg, U64],
    A64SetSP: Void [U64],
    A64SetPC: Void [U64],
    A64SetQ: Void [A64Vec, U128],
    A64CallSupervisor: Void [U32],
    A64ExceptionRaised: Void [U64, U64],
    A64DataSynchronizationBarrier: Void [],
    A64DataMemoryBarrier: Void [],
    A64InstructionSynchronizationBarrier: Void [],

    // --- A64 memory ---
    A64ClearExclusive: Void [],
    A64ReadMemory8: U8 [U64, AccType],
    A64ReadMemory16: U16 [U64, AccType],
    A64ReadMemory32: U32 [U64, AccType],
    A64ReadMemory64: U64 [U64, AccType],
    A64ExclusiveReadMemory8: U8 [U64, AccType],
    A64ExclusiveReadMemory16: U16 [U64, AccType],
    A64ExclusiveReadMemory32: U32 [U64, AccType],
    A64ExclusiveReadMemory64: U64 [U64, AccType],
    A64WriteMemory8: Void [U64, U8, AccType],
    A64WriteMemory16: Void [U64, U16, AccType],
    A64WriteMemory32: Void [U64, U32, AccType],
    A64WriteMemory64: Void [U64, U64, AccType],
    A64ExclusiveWriteMemory8: U32 [U64, U8, AccType],
    A64ExclusiveWriteMemory16: U32 [U64, U16, AccType],
    A64ExclusiveWriteMemory32: U32 [U64, U32, AccType],
    A64ExclusiveWriteMemory64: U32 [U64, U64, AccType],

    // --- A32 context ---
    A32SetCheckBit: Void [U1],
    A32GetCFlag: U1 [],
    A32GetRegister: U32 [A32Reg],
    A32SetRegister: Void [A32Reg, U32],
    A32GetCpsr: U32 [],
    A32SetCpsr: Void [U32],
    A32SetCpsrNZCVRaw: Void [U32],
    A32SetCpsrNZCV: Void [Nzcv],
    A32SetCpsrNZ: Void [Nzcv],
    A32SetCpsrNZC: Void [Nzcv, U1],
    A32OrQFlag: Void [U1],
    A32GetGEFlags: U32 [],
    A32SetGEFlags: Void [U32],
    A32BXWritePC: Void [U32],
    A32UpdateUpperLocationDescriptor: Void [U32],
    A32CallSupervisor: Void [U32],
    A32ExceptionRaised: Void [U32, U64],
    A32DataSynchronizationBarrier: Void [],
    A32DataMemoryBarrier: Void [],
    A32InstructionSynchronizationBarrier: Void [],
    A32GetFpscr: U32 [],
    A32SetFpscr: Void [U32],

    // --- A32 memory ---
    A32ClearExclusive: Void [],
    A32ReadMemory8: U8 [U32, AccType],
    A32ReadMemory16: U16 [U32, AccType],
    A32ReadMemory32: U32 [U32, AccType],
    A32ReadMemory64: U64 [U32, AccType],
    A32ExclusiveReadMemory8: U8 [U32, AccType],
    A32ExclusiveReadMemory16: U16 [U32, AccType],
    A32ExclusiveReadMemory32: U32 [U32, AccType],
    A32ExclusiveReadMemory64: U64 [U32, AccType],
    A32WriteMemory8: Void [U32, U8, AccType],
    A32WriteMemory16: Void [U32, U16, AccType],
    A32WriteMemory32: Void [U32, U32, AccType],
    A32WriteMemory64: Void [U32, U64, AccType],
    A32ExclusiveWriteMemory8: U32 [U32, U8, AccType],
    A32ExclusiveWriteMemory16: U32 [U32, U16, AccType],
    A32ExclusiveWriteMemory32: U32 [U32, U32, AccType],
    A32ExclusiveWriteMemory64: U32 [U32, U64, AccType],

    // --- A32 coprocessor ---
    A32CoprocInternalOperation: Void [CoprocInfo],
    A32CoprocSendOneWord: Void [CoprocInfo, U32],
    A32CoprocSendTwoWords: Void [CoprocInfo, U32, U32],
    A32CoprocGetOneWord: U32 [CoprocInfo],
    A32CoprocGetTwoWords: U64 [CoprocInfo],
    A32CoprocLoadWords: Void [CoprocInfo, U32],
    A32CoprocStoreWords: Void [CoprocInfo, U32],
}

impl Opcode {
    pub fn num_args(self) -> usize {
        self.arg_types().len()
    }

    /// Whether the operation has an effect beyond producing its result.
    /// Memory reads count: they may reach MMIO through the embedder.
    pub fn has_side_effects(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Breakpoint
                | PushRSB
                | A64SetCheckBit | A64SetNZCVRaw | A64SetNZCV
                | A64SetW | A64SetX | A64SetSP | A64SetPC | A64SetQ
                | A64CallSupervisor | A64ExceptionRaised
                | A64DataSynchronizationBarrier | A64DataMemoryBarrier
                | A64InstructionSynchronizationBarrier
                | A64ClearExclusive
                | A64ReadMemory8 | A64ReadMemory16 | A64ReadMemory32 | A64ReadMemory64
                | A64ExclusiveReadMemory8 | A64ExclusiveReadMemory16
                | A64ExclusiveReadMemory32 | A64ExclusiveReadMemory64
                | A64WriteMemory8 | A64WriteMemory16 | A64WriteMemory32 | A64WriteMemory64
                | A64ExclusiveWriteMemory8 | A64ExclusiveWriteMemory16
                | A64ExclusiveWriteMemory32 | A64ExclusiveWriteMemory64
                | A32SetCheckBit | A32SetRegister | A32SetCpsr | A32SetCpsrNZCVRaw
                | A32SetCpsrNZCV | A32SetCpsrNZ | A32SetCpsrNZC
                | A32OrQFlag | A32SetGEFlags
                | A32BXWritePC | A32UpdateUpperLocationDescriptor
                | A32CallSupervisor | A32ExceptionRaised
                | A32DataSynchronizationBarrier | A32DataMemoryBarrier
                | A32InstructionSynchronizationBarrier
                | A32SetFpscr
                | A32ClearExclusive
                | A32ReadMemory8 | A32ReadMemory16 | A32ReadMemory32 | A32ReadMemory64
                | A32ExclusiveReadMemory8 | A32ExclusiveReadMemory16
                | A32ExclusiveReadMemory32 | A32ExclusiveReadMemory64
                | A32WriteMemory8 | A32WriteMemory16 | A32WriteMemory32 | A32WriteMemory64
                | A32ExclusiveWriteMemory8 | A32ExclusiveWriteMemory16
                | A32ExclusiveWriteMemory32 | A32ExclusiveWriteMemory64
                | A32CoprocInternalOperation | A32CoprocSendOneWord | A32CoprocSendTwoWords
                | A32CoprocGetOneWord | A32CoprocGetTwoWords
                | A32CoprocLoadWords | A32CoprocStoreWords
        )
    }

    /// Whether this is one of the pseudo-operations whose argument is the
    /// producing instruction rather than a data value.
    pub fn is_pseudo_operation(self) -> bool {
        matches!(
            self,
            Opcode::GetCarryFromOp | Opcode::GetOverflowFromOp | Opcode::GetNZCVFromOp
        )
    }

    /// Whether this opcode writes any part of the A32 CPSR.
    pub fn writes_a32_cpsr(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32SetCpsr | A32SetCpsrNZCVRaw | A32SetCpsrNZCV | A32SetCpsrNZ | A32SetCpsrNZC
                | A32OrQFlag | A32SetGEFlags | A32UpdateUpperLocationDescriptor
        )
    }

    /// Whether this opcode reads any part of the A32 CPSR.
    pub fn reads_a32_cpsr(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32GetCFlag | A32GetCpsr | A32GetGEFlags
                | ConditionalSelect32 | ConditionalSelect64 | ConditionalSelectNZCV
        )
    }

    /// Whether this opcode reads the A64 NZCV flags.
    pub fn reads_a64_nzcv(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A64GetCFlag | A64GetNZCVRaw
                | ConditionalSelect32 | ConditionalSelect64 | ConditionalSelectNZCV
        )
    }

    /// Whether this opcode writes the A64 NZCV flags.
    pub fn writes_a64_nzcv(self) -> bool {
        matches!(self, Opcode::A64SetNZCV | Opcode::A64SetNZCVRaw)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_counts_follow_signature() {
        assert_eq!(Opcode::Add32.num_args(), 3);
        assert_eq!(Opcode::A32GetRegister.num_args(), 1);
        assert_eq!(Opcode::A64GetSP.num_args(), 0);
        assert_eq!(Opcode::A32WriteMemory32.num_args(), 3);
    }

    #[test]
    fn return_types() {
        assert_eq!(Opcode::Add64.return_type(), Type::U64);
        assert_eq!(Opcode::GetCarryFromOp.return_type(), Type::U1);
        assert_eq!(Opcode::A32SetRegister.return_type(), Type::Void);
        assert_eq!(Opcode::AESMixColumns.return_type(), Type::U128);
    }

    #[test]
    fn memory_reads_are_side_effecting() {
        assert!(Opcode::A32ReadMemory32.has_side_effects());
        assert!(Opcode::A64ReadMemory8.has_side_effects());
        assert!(!Opcode::Add32.has_side_effects());
    }
}
