//! Per-opcode emission dispatch.
//!
//! The match below is exhaustive with no wildcard arm: declaring a new
//! opcode without adding an emission routine is a compile error, not a
//! runtime surprise.

use iced_x86::code_asm::qword_ptr;
use iced_x86::code_asm::rsp;

use crate::backend::x64::emit_a32 as a32;
use crate::backend::x64::emit_a64 as a64;
use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::emit_coprocessor as coproc;
use crate::backend::x64::emit_crypto::{self, AesOp};
use crate::backend::x64::emit_data_processing as dp;
use crate::backend::x64::emit_data_processing::{ExtendKind, ShiftKind};
use crate::backend::x64::emit_memory as mem;
use crate::backend::x64::emit_saturation as sat;
use crate::backend::x64::emit_terminal;
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::backend::x64::stack_layout::StackLayout;
use crate::ir::block::Block;
use crate::ir::cond::Cond;
use crate::ir::opcode::Opcode;
use crate::ir::terminal::Terminal;
use crate::ir::value::Index;

/// Lower one optimized block to host code in `ra.asm`.
pub fn emit_block(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block) {
    // Account for the block's guest cycles up front.
    if ctx.config.enable_cycle_counting {
        ra.asm
            .sub(
                qword_ptr(rsp + StackLayout::cycles_remaining_offset() as i32),
                block.cycle_count as i32,
            )
            .expect("asm");
    }

    // Conditional A32 blocks skip their body when the condition fails;
    // the skip target is the else arm of the folded If terminal.
    let mut cond_skip = None;
    if let (Some(cond), Terminal::If { else_, .. }) = (block.cond, &block.terminal) {
        if cond != Cond::AL {
            let mut fail = ra.asm.create_label();
            dp::load_nzcv_into_flags(ra, ctx.jsi.offset_of_cpsr_nzcv);
            dp::emit_jcc(ra.asm, cond.invert(), fail);
            cond_skip = Some((fail, (**else_).clone()));
        }
    }

    for (inst_ref, inst) in block.iter_live() {
        emit_inst(ctx, ra, block, inst_ref, inst.opcode);
        ra.end_of_alloc_scope();
    }
    ra.assert_no_more_uses();

    match cond_skip {
        Some((mut fail, else_terminal)) => {
            // Body completed: run the then-arm of the terminal.
            if let Terminal::If { then_, .. } = &block.terminal {
                emit_terminal::emit_terminal(ctx, ra.asm, then_);
            } else {
                unreachable!("cond_skip requires an If terminal");
            }
            ra.asm.set_label(&mut fail).expect("asm");
            emit_terminal::emit_terminal(ctx, ra.asm, &else_terminal);
        }
        None => emit_terminal::emit_terminal(ctx, ra.asm, &block.terminal),
    }
}

fn emit_inst(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index, opcode: Opcode) {
    use Opcode::*;
    match opcode {
        // --- Core ---
        Void => {}
        Identity => a64::emit_identity(ra, block, inst),
        Breakpoint => a64::emit_breakpoint(ra),

        // --- Pseudo-operations ---
        GetCarryFromOp | GetOverflowFromOp => a64::emit_unfused_pseudo(ra, block, inst),
        GetNZCVFromOp => a64::emit_get_nzcv_from_op(ra, block, inst),
        NZCVFromPackedFlags => a64::emit_nzcv_from_packed_flags(ra, block, inst),
        ConditionalSelectNZCV => {
            dp::emit_conditional_select(ra, block, inst, ctx.jsi.offset_of_cpsr_nzcv, 32)
        }

        // --- Packing / extraction ---
        Pack2x32To1x64 => dp::emit_pack_2x32(ra, block, inst),
        LeastSignificantWord => dp::emit_least_significant_word(ra, block, inst),
        MostSignificantWord => dp::emit_most_significant_word(ra, block, inst),
        LeastSignificantHalf | LeastSignificantByte => dp::emit_identity_narrow(ra, block, inst),
        MostSignificantBit => dp::emit_most_significant_bit(ra, block, inst),
        IsZero32 => dp::emit_is_zero(ra, block, inst, 32),
        IsZero64 => dp::emit_is_zero(ra, block, inst, 64),
        TestBit => dp::emit_test_bit(ra, block, inst),

        ConditionalSelect32 => {
            dp::emit_conditional_select(ra, block, inst, ctx.jsi.offset_of_cpsr_nzcv, 32)
        }
        ConditionalSelect64 => {
            dp::emit_conditional_select(ra, block, inst, ctx.jsi.offset_of_cpsr_nzcv, 64)
        }

        // --- Shifts ---
        LogicalShiftLeft32 => dp::emit_shift_a32(ra, block, inst, ShiftKind::Lsl),
        LogicalShiftRight32 => dp::emit_shift_a32(ra, block, inst, ShiftKind::Lsr),
        ArithmeticShiftRight32 => dp::emit_shift_a32(ra, block, inst, ShiftKind::Asr),
        RotateRight32 => dp::emit_shift_a32(ra, block, inst, ShiftKind::Ror),
        RotateRightExtended => dp::emit_rotate_right_extended(ra, block, inst),
        LogicalShiftLeft64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsl, 64),
        LogicalShiftRight64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsr, 64),
        ArithmeticShiftRight64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Asr, 64),
        RotateRight64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Ror, 64),
        LogicalShiftLeftMasked32 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsl, 32),
        LogicalShiftLeftMasked64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsl, 64),
        LogicalShiftRightMasked32 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsr, 32),
        LogicalShiftRightMasked64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Lsr, 64),
        ArithmeticShiftRightMasked32 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Asr, 32),
        ArithmeticShiftRightMasked64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Asr, 64),
        RotateRightMasked32 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Ror, 32),
        RotateRightMasked64 => dp::emit_shift_masked(ra, block, inst, ShiftKind::Ror, 64),

        // --- Arithmetic ---
        Add32 => dp::emit_add(ctx, ra, block, inst, 32),
        Add64 => dp::emit_add(ctx, ra, block, inst, 64),
        Sub32 => dp::emit_sub(ctx, ra, block, inst, 32),
        Sub64 => dp::emit_sub(ctx, ra, block, inst, 64),
        Mul32 => dp::emit_mul(ra, block, inst, 32),
        Mul64 => dp::emit_mul(ra, block, inst, 64),
        SignedMultiplyHigh64 => dp::emit_mul_high(ra, block, inst, true),
        UnsignedMultiplyHigh64 => dp::emit_mul_high(ra, block, inst, false),
        UnsignedDiv32 => dp::emit_div(ra, block, inst, 32, false),
        UnsignedDiv64 => dp::emit_div(ra, block, inst, 64, false),
        SignedDiv32 => dp::emit_div(ra, block, inst, 32, true),
        SignedDiv64 => dp::emit_div(ra, block, inst, 64, true),

        // --- Logical ---
        And32 => dp::emit_and(ra, block, inst, 32),
        And64 => dp::emit_and(ra, block, inst, 64),
        AndNot32 => dp::emit_and_not(ra, block, inst, 32),
        AndNot64 => dp::emit_and_not(ra, block, inst, 64),
        Eor32 => dp::emit_eor(ra, block, inst, 32),
        Eor64 => dp::emit_eor(ra, block, inst, 64),
        Or32 => dp::emit_or(ra, block, inst, 32),
        Or64 => dp::emit_or(ra, block, inst, 64),
        Not32 => dp::emit_not(ra, block, inst, 32),
        Not64 => dp::emit_not(ra, block, inst, 64),

        // --- Extension ---
        SignExtendByteToWord => dp::emit_extend(ra, block, inst, ExtendKind::SignByteToWord),
        SignExtendHalfToWord => dp::emit_extend(ra, block, inst, ExtendKind::SignHalfToWord),
        SignExtendByteToLong => dp::emit_extend(ra, block, inst, ExtendKind::SignByteToLong),
        SignExtendHalfToLong => dp::emit_extend(ra, block, inst, ExtendKind::SignHalfToLong),
        SignExtendWordToLong => dp::emit_extend(ra, block, inst, ExtendKind::SignWordToLong),
        ZeroExtendByteToWord => dp::emit_extend(ra, block, inst, ExtendKind::ZeroByteToWord),
        ZeroExtendHalfToWord => dp::emit_extend(ra, block, inst, ExtendKind::ZeroHalfToWord),
        ZeroExtendByteToLong => dp::emit_extend(ra, block, inst, ExtendKind::ZeroByteToLong),
        ZeroExtendHalfToLong => dp::emit_extend(ra, block, inst, ExtendKind::ZeroHalfToLong),
        ZeroExtendWordToLong => dp::emit_extend(ra, block, inst, ExtendKind::ZeroWordToLong),

        // --- Byte reversal / bit counting / extraction ---
        ByteReverseWord => dp::emit_byte_reverse(ra, block, inst, 32),
        ByteReverseHalf => dp::emit_byte_reverse(ra, block, inst, 16),
        ByteReverseDual => dp::emit_byte_reverse(ra, block, inst, 64),
        CountLeadingZeros32 => dp::emit_count_leading_zeros(ra, block, inst, 32),
        CountLeadingZeros64 => dp::emit_count_leading_zeros(ra, block, inst, 64),
        ExtractRegister32 => dp::emit_extract_register(ra, block, inst, 32),
        ExtractRegister64 => dp::emit_extract_register(ra, block, inst, 64),

        // --- Saturating arithmetic ---
        SignedSaturatedAdd8 => sat::emit_signed_saturated_op(ra, block, inst, 8, false),
        SignedSaturatedAdd16 => sat::emit_signed_saturated_op(ra, block, inst, 16, false),
        SignedSaturatedAdd32 => sat::emit_signed_saturated_op(ra, block, inst, 32, false),
        SignedSaturatedAdd64 => sat::emit_signed_saturated_op(ra, block, inst, 64, false),
        SignedSaturatedSub8 => sat::emit_signed_saturated_op(ra, block, inst, 8, true),
        SignedSaturatedSub16 => sat::emit_signed_saturated_op(ra, block, inst, 16, true),
        SignedSaturatedSub32 => sat::emit_signed_saturated_op(ra, block, inst, 32, true),
        SignedSaturatedSub64 => sat::emit_signed_saturated_op(ra, block, inst, 64, true),
        UnsignedSaturatedAdd8 => sat::emit_unsigned_saturated_op(ra, block, inst, 8, false),
        UnsignedSaturatedAdd16 => sat::emit_unsigned_saturated_op(ra, block, inst, 16, false),
        UnsignedSaturatedAdd32 => sat::emit_unsigned_saturated_op(ra, block, inst, 32, false),
        UnsignedSaturatedAdd64 => sat::emit_unsigned_saturated_op(ra, block, inst, 64, false),
        UnsignedSaturatedSub8 => sat::emit_unsigned_saturated_op(ra, block, inst, 8, true),
        UnsignedSaturatedSub16 => sat::emit_unsigned_saturated_op(ra, block, inst, 16, true),
        UnsignedSaturatedSub32 => sat::emit_unsigned_saturated_op(ra, block, inst, 32, true),
        UnsignedSaturatedSub64 => sat::emit_unsigned_saturated_op(ra, block, inst, 64, true),
        SignedSaturation => sat::emit_signed_saturation(ra, block, inst),
        UnsignedSaturation => sat::emit_unsigned_saturation(ra, block, inst),
        SignedSaturatedDoublingMultiplyReturnHigh16 => {
            sat::emit_signed_saturated_doubling_multiply_return_high(ra, block, inst, 16)
        }
        SignedSaturatedDoublingMultiplyReturnHigh32 => {
            sat::emit_signed_saturated_doubling_multiply_return_high(ra, block, inst, 32)
        }

        // --- CRC32 ---
        CRC32Castagnoli8 => a64::emit_crc32(ctx, ra, block, inst, true, 8),
        CRC32Castagnoli16 => a64::emit_crc32(ctx, ra, block, inst, true, 16),
        CRC32Castagnoli32 => a64::emit_crc32(ctx, ra, block, inst, true, 32),
        CRC32Castagnoli64 => a64::emit_crc32(ctx, ra, block, inst, true, 64),
        CRC32ISO8 => a64::emit_crc32(ctx, ra, block, inst, false, 8),
        CRC32ISO16 => a64::emit_crc32(ctx, ra, block, inst, false, 16),
        CRC32ISO32 => a64::emit_crc32(ctx, ra, block, inst, false, 32),
        CRC32ISO64 => a64::emit_crc32(ctx, ra, block, inst, false, 64),

        // --- 128-bit vector / AES ---
        VectorEor => emit_crypto::emit_vector_eor(ra, block, inst),
        AESEncryptSingleRound => emit_crypto::emit_aes(ctx, ra, block, inst, AesOp::EncryptSingleRound),
        AESDecryptSingleRound => emit_crypto::emit_aes(ctx, ra, block, inst, AesOp::DecryptSingleRound),
        AESMixColumns => emit_crypto::emit_aes(ctx, ra, block, inst, AesOp::MixColumns),
        AESInverseMixColumns => {
            emit_crypto::emit_aes(ctx, ra, block, inst, AesOp::InverseMixColumns)
        }

        // --- RSB ---
        PushRSB => a64::emit_push_rsb(ctx, ra, block, inst),

        // --- A64 context ---
        A64SetCheckBit => a64::emit_set_check_bit(ctx, ra, block, inst),
        A64GetCFlag => a64::emit_get_c_flag(ctx, ra, inst),
        A64GetNZCVRaw => a64::emit_get_nzcv_raw(ctx, ra, inst),
        A64SetNZCVRaw => a64::emit_set_nzcv_raw(ctx, ra, block, inst),
        A64SetNZCV => a64::emit_set_nzcv(ctx, ra, block, inst),
        A64GetW => a64::emit_get_w(ra, block, inst),
        A64GetX => a64::emit_get_x(ra, block, inst),
        A64GetSP => a64::emit_get_sp(ra, inst),
        A64GetQ => a64::emit_get_q(ra, block, inst),
        A64SetW => a64::emit_set_w(ra, block, inst),
        A64SetX => a64::emit_set_x(ra, block, inst),
        A64SetSP => a64::emit_set_sp(ra, block, inst),
        A64SetPC => a64::emit_set_pc(ctx, ra, block, inst),
        A64SetQ => a64::emit_set_q(ra, block, inst),
        A64CallSupervisor => a64::emit_call_supervisor(ctx, ra, block, inst),
        A64ExceptionRaised => a64::emit_exception_raised(ctx, ra, block, inst),
        A64DataSynchronizationBarrier => mem::emit_data_synchronization_barrier(ra),
        A64DataMemoryBarrier => mem::emit_data_memory_barrier(ra),
        A64InstructionSynchronizationBarrier => mem::emit_instruction_synchronization_barrier(ra),

        // --- A64 memory ---
        A64ClearExclusive => mem::emit_clear_exclusive(ctx, ra),
        A64ReadMemory8 => mem::emit_read(ctx, ra, block, inst, 8, true),
        A64ReadMemory16 => mem::emit_read(ctx, ra, block, inst, 16, true),
        A64ReadMemory32 => mem::emit_read(ctx, ra, block, inst, 32, true),
        A64ReadMemory64 => mem::emit_read(ctx, ra, block, inst, 64, true),
        A64ExclusiveReadMemory8 => mem::emit_exclusive_read(ctx, ra, block, inst, 8),
        A64ExclusiveReadMemory16 => mem::emit_exclusive_read(ctx, ra, block, inst, 16),
        A64ExclusiveReadMemory32 => mem::emit_exclusive_read(ctx, ra, block, inst, 32),
        A64ExclusiveReadMemory64 => mem::emit_exclusive_read(ctx, ra, block, inst, 64),
        A64WriteMemory8 => mem::emit_write(ctx, ra, block, inst, 8, true),
        A64WriteMemory16 => mem::emit_write(ctx, ra, block, inst, 16, true),
        A64WriteMemory32 => mem::emit_write(ctx, ra, block, inst, 32, true),
        A64WriteMemory64 => mem::emit_write(ctx, ra, block, inst, 64, true),
        A64ExclusiveWriteMemory8 => mem::emit_exclusive_write(ctx, ra, block, inst, 8),
        A64ExclusiveWriteMemory16 => mem::emit_exclusive_write(ctx, ra, block, inst, 16),
        A64ExclusiveWriteMemory32 => mem::emit_exclusive_write(ctx, ra, block, inst, 32),
        A64ExclusiveWriteMemory64 => mem::emit_exclusive_write(ctx, ra, block, inst, 64),

        // --- A32 context ---
        A32SetCheckBit => a32::emit_set_check_bit(ctx, ra, block, inst),
        A32GetCFlag => a32::emit_get_c_flag(ctx, ra, inst),
        A32GetRegister => a32::emit_get_register(ra, block, inst),
        A32SetRegister => a32::emit_set_register(ra, block, inst),
        A32GetCpsr => a32::emit_get_cpsr(ctx, ra, inst),
        A32SetCpsr => a32::emit_set_cpsr(ctx, ra, block, inst),
        A32SetCpsrNZCVRaw => a32::emit_set_cpsr_nzcv_raw(ctx, ra, block, inst),
        A32SetCpsrNZCV => a32::emit_set_cpsr_nzcv(ctx, ra, block, inst),
        A32SetCpsrNZ => a32::emit_set_cpsr_nz(ctx, ra, block, inst),
        A32SetCpsrNZC => a32::emit_set_cpsr_nzc(ctx, ra, block, inst),
        A32OrQFlag => a32::emit_or_q_flag(ra, block, inst),
        A32GetGEFlags => a32::emit_get_ge_flags(ra, inst),
        A32SetGEFlags => a32::emit_set_ge_flags(ra, block, inst),
        A32BXWritePC => a32::emit_bx_write_pc(ctx, ra, block, inst),
        A32UpdateUpperLocationDescriptor => {
            a32::emit_update_upper_location_descriptor(ctx, ra, block, inst)
        }
        A32CallSupervisor => a32::emit_call_supervisor(ctx, ra, block, inst),
        A32ExceptionRaised => a32::emit_exception_raised(ctx, ra, block, inst),
        A32DataSynchronizationBarrier => mem::emit_data_synchronization_barrier(ra),
        A32DataMemoryBarrier => mem::emit_data_memory_barrier(ra),
        A32InstructionSynchronizationBarrier => mem::emit_instruction_synchronization_barrier(ra),
        A32GetFpscr => a32::emit_get_fpscr(ra, ctx, inst),
        A32SetFpscr => a32::emit_set_fpscr(ra, ctx, block, inst),

        // --- A32 memory ---
        A32ClearExclusive => mem::emit_clear_exclusive(ctx, ra),
        A32ReadMemory8 => mem::emit_read(ctx, ra, block, inst, 8, false),
        A32ReadMemory16 => mem::emit_read(ctx, ra, block, inst, 16, false),
        A32ReadMemory32 => mem::emit_read(ctx, ra, block, inst, 32, false),
        A32ReadMemory64 => mem::emit_read(ctx, ra, block, inst, 64, false),
        A32ExclusiveReadMemory8 => mem::emit_exclusive_read(ctx, ra, block, inst, 8),
        A32ExclusiveReadMemory16 => mem::emit_exclusive_read(ctx, ra, block, inst, 16),
        A32ExclusiveReadMemory32 => mem::emit_exclusive_read(ctx, ra, block, inst, 32),
        A32ExclusiveReadMemory64 => mem::emit_exclusive_read(ctx, ra, block, inst, 64),
        A32WriteMemory8 => mem::emit_write(ctx, ra, block, inst, 8, false),
        A32WriteMemory16 => mem::emit_write(ctx, ra, block, inst, 16, false),
        A32WriteMemory32 => mem::emit_write(ctx, ra, block, inst, 32, false),
        A32WriteMemory64 => mem::emit_write(ctx, ra, block, inst, 64, false),
        A32ExclusiveWriteMemory8 => mem::emit_exclusive_write(ctx, ra, block, inst, 8),
        A32ExclusiveWriteMemory16 => mem::emit_exclusive_write(ctx, ra, block, inst, 16),
        A32ExclusiveWriteMemory32 => mem::emit_exclusive_write(ctx, ra, block, inst, 32),
        A32ExclusiveWriteMemory64 => mem::emit_exclusive_write(ctx, ra, block, inst, 64),

        // --- A32 coprocessor ---
        A32CoprocInternalOperation => coproc::emit_internal_operation(ctx, ra, block, inst),
        A32CoprocSendOneWord => coproc::emit_send_one_word(ctx, ra, block, inst),
        A32CoprocSendTwoWords => coproc::emit_send_two_words(ctx, ra, block, inst),
        A32CoprocGetOneWord => coproc::emit_get_one_word(ctx, ra, block, inst),
        A32CoprocGetTwoWords => coproc::emit_get_two_words(ctx, ra, block, inst),
        A32CoprocLoadWords => coproc::emit_load_words(ctx, ra, block, inst),
        A32CoprocStoreWords => coproc::emit_store_words(ctx, ra, block, inst),
    }
}
