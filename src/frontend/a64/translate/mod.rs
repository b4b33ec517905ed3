//! A64 lifter.

pub mod branch;
pub mod data_processing;
pub mod helpers;
pub mod load_store;
pub mod system;

use crate::config::Exception;
use crate::frontend::a64::decode::{self, A64Inst};
use crate::ir::a64_emitter::A64IrEmitter;
use crate::ir::block::Block;
use crate::ir::location::A64LocationDescriptor;
use crate::ir::terminal::Terminal;

pub const MAX_BLOCK_INSTRUCTIONS: usize = 32;

pub struct TranslateContext {
    pub single_stepping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

pub fn translate(
    descriptor: A64LocationDescriptor,
    read_code: &dyn Fn(u64) -> Option<u32>,
    ctx: &TranslateContext,
) -> Block {
    let mut block = Block::new(descriptor.to_location());
    let start_pc = descriptor.pc();
    let mut current = descriptor;
    let limit = if ctx.single_stepping { 1 } else { MAX_BLOCK_INSTRUCTIONS };

    loop {
        let Some(word) = read_code(current.pc()) else {
            break;
        };
        let mut e = A64IrEmitter::new(&mut block, current);
        let step = translate_one(&mut e, word);
        current = current.advance_pc(4);
        block.cycle_count += 1;

        match step {
            Step::Stop => break,
            Step::Continue if block.cycle_count as usize >= limit => {
                block.set_terminal(Terminal::LinkBlock { next: current.to_location() });
                break;
            }
            Step::Continue => {}
        }
    }

    if block.cycle_count == 0 {
        let mut e = A64IrEmitter::new(&mut block, current);
        e.exception_raised(Exception::NoExecuteFault);
        e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
        block.cycle_count = 1;
    }
    if block.terminal.is_invalid() {
        block.set_terminal(Terminal::LinkBlock { next: current.to_location() });
    }
    if ctx.single_stepping {
        let prev_terminal = std::mem::replace(&mut block.terminal, Terminal::Invalid);
        block.set_terminal(Terminal::check_halt(prev_terminal));
    }

    block.end_location = current.to_location();
    block.pc_range = (start_pc, current.pc());
    block
}

fn translate_one(e: &mut A64IrEmitter, word: u32) -> Step {
    let Some(matcher) = decode::decode_a64(word) else {
        return raise_undefined(e);
    };

    use A64Inst::*;
    match matcher.inst {
        B => branch::b(e, word),
        Bl => branch::bl(e, word),
        BCond => branch::b_cond(e, word),
        Cbz => branch::cbz(e, word, true),
        Cbnz => branch::cbz(e, word, false),
        Tbz => branch::tbz(e, word, true),
        Tbnz => branch::tbz(e, word, false),
        Br => branch::br(e, word),
        Blr => branch::blr(e, word),
        Ret => branch::ret(e, word),

        Svc => system::svc(e, word),
        Brk => system::brk(e, word),
        Nop | Hint => Step::Continue,
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
        Isb => system::isb(e),
        MrsNzcv => system::mrs_nzcv(e, word),
        MsrNzcv => system::msr_nzcv(e, word),

        Adr => data_processing::adr(e, word, false),
        Adrp => data_processing::adr(e, word, true),
        AddImm => data_processing::add_sub_imm(e, word, false, false),
        AddsImm => data_processing::add_sub_imm(e, word, false, true),
        SubImm => data_processing::add_sub_imm(e, word, true, false),
        SubsImm => data_processing::add_sub_imm(e, word, true, true),
        AndImm => data_processing::logical_imm(e, word, LogicalOp::And, false),
        OrrImm => data_processing::logical_imm(e, word, LogicalOp::Orr, false),
        EorImm => data_processing::logical_imm(e, word, LogicalOp::Eor, false),
        AndsImm => data_processing::logical_imm(e, word, LogicalOp::And, true),
        Movn => data_processing::move_wide(e, word, MoveWideOp::Not),
        Movz => data_processing::move_wide(e, word, MoveWideOp::Zero),
        Movk => data_processing::move_wide(e, word, MoveWideOp::Keep),
        Sbfm => data_processing::bitfield(e, word, BitfieldOp::Signed),
        Bfm => data_processing::bitfield(e, word, BitfieldOp::Insert),
        Ubfm => data_processing::bitfield(e, word, BitfieldOp::Unsigned),
        Extr => data_processing::extr(e, word),

        AndShift => data_processing::logical_shift(e, word, LogicalOp::And, false, false),
        BicShift => data_processing::logical_shift(e, word, LogicalOp::And, true, false),
        OrrShift => data_processing::logical_shift(e, word, LogicalOp::Orr, false, false),
        OrnShift => data_processing::logical_shift(e, word, LogicalOp::Orr, true, false),
        EorShift => data_processing::logical_shift(e, word, LogicalOp::Eor, false, false),
        EonShift => data_processing::logical_shift(e, word, LogicalOp::Eor, true, false),
        AndsShift => data_processing::logical_shift(e, word, LogicalOp::And, false, true),
        BicsShift => data_processing::logical_shift(e, word, LogicalOp::And, true, true),
        AddShift => data_processing::add_sub_shift(e, word, false, false),
        AddsShift => data_processing::add_sub_shift(e, word, false, true),
        SubShift => data_processing::add_sub_shift(e, word, true, false),
        SubsShift => data_processing::add_sub_shift(e, word, true, true),
        AddExt => data_processing::add_sub_ext(e, word, false, false),
        AddsExt => data_processing::add_sub_ext(e, word, false, true),
        SubExt => data_processing::add_sub_ext(e, word, true, false),
        SubsExt => data_processing::add_sub_ext(e, word, true, true),
        Adc => data_processing::adc_sbc(e, word, false, false),
        Adcs => data_processing::adc_sbc(e, word, false, true),
        Sbc => data_processing::adc_sbc(e, word, true, false),
        Sbcs => data_processing::adc_sbc(e, word, true, true),
        CcmnReg => data_processing::ccmp(e, word, false, false),
        CcmpReg => data_processing::ccmp(e, word, true, false),
        CcmnImm => data_processing::ccmp(e, word, false, true),
        CcmpImm => data_processing::ccmp(e, word, true, true),
        Csel => data_processing::csel(e, word, CselOp::Plain),
        Csinc => data_processing::csel(e, word, CselOp::Increment),
        Csinv => data_processing::csel(e, word, CselOp::Invert),
        Csneg => data_processing::csel(e, word, CselOp::Negate),
        Udiv => data_processing::div(e, word, false),
        Sdiv => data_processing::div(e, word, true),
        Lslv | Lsrv | Asrv | Rorv => data_processing::shift_variable(e, word, matcher.inst),
        Crc32 => data_processing::crc32(e, word, false),
        Crc32c => data_processing::crc32(e, word, true),
        Rbit => data_processing::rbit(e, word),
        Rev16 => data_processing::rev16(e, word),
        Rev32 => data_processing::rev32(e, word),
        Rev64 => data_processing::rev64(e, word),
        Clz => data_processing::clz(e, word),
        Madd => data_processing::madd_msub(e, word, false),
        Msub => data_processing::madd_msub(e, word, true),
        Smaddl => data_processing::maddl(e, word, true, false),
        Smsubl => data_processing::maddl(e, word, true, true),
        Umaddl => data_processing::maddl(e, word, false, false),
        Umsubl => data_processing::maddl(e, word, false, true),
        Smulh => data_processing::mul_high(e, word, true),
        Umulh => data_processing::mul_high(e, word, false),

        LdrLit32 => load_store::ldr_literal(e, word, 4, false),
        LdrLit64 => load_store::ldr_literal(e, word, 8, false),
        LdrswLit => load_store::ldr_literal(e, word, 4, true),
        StrbImm => load_store::store_unsigned_imm(e, word, 1),
        StrhImm => load_store::store_unsigned_imm(e, word, 2),
        Str32Imm => load_store::store_unsigned_imm(e, word, 4),
        Str64Imm => load_store::store_unsigned_imm(e, word, 8),
        LdrbImm => load_store::load_unsigned_imm(e, word, 1, Extend::ZeroW),
        LdrhImm => load_store::load_unsigned_imm(e, word, 2, Extend::ZeroW),
        Ldr32Imm => load_store::load_unsigned_imm(e, word, 4, Extend::ZeroW),
        Ldr64Imm => load_store::load_unsigned_imm(e, word, 8, Extend::None),
        Ldrsb32Imm => load_store::load_unsigned_imm(e, word, 1, Extend::SignW),
        Ldrsb64Imm => load_store::load_unsigned_imm(e, word, 1, Extend::SignX),
        Ldrsh32Imm => load_store::load_unsigned_imm(e, word, 2, Extend::SignW),
        Ldrsh64Imm => load_store::load_unsigned_imm(e, word, 2, Extend::SignX),
        LdrswImm => load_store::load_unsigned_imm(e, word, 4, Extend::SignX),
        StrReg => load_store::str_reg(e, word),
        LdrReg => load_store::ldr_reg(e, word),
        StrImmPrePost => load_store::str_pre_post(e, word),
        LdrImmPrePost => load_store::ldr_pre_post(e, word),
        Stp => load_store::stp(e, word),
        Ldp => load_store::ldp(e, word),
        Stxr => load_store::stxr(e, word),
        Ldxr => load_store::ldxr(e, word),
        Stlr => load_store::stlr(e, word),
        Ldar => load_store::ldar(e, word),

        Aese => system::aes_round(e, word, AesOp::Encrypt),
        Aesd => system::aes_round(e, word, AesOp::Decrypt),
        Aesmc => system::aes_round(e, word, AesOp::MixColumns),
        Aesimc => system::aes_round(e, word, AesOp::InverseMixColumns),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Orr,
    Eor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveWideOp {
    Not,
    Zero,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldOp {
    Signed,
    Insert,
    Unsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CselOp {
    Plain,
    Increment,
    Invert,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extend {
    None,
    ZeroW,
    SignW,
    SignX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesOp {
    Encrypt,
    Decrypt,
    MixColumns,
    InverseMixColumns,
}

pub fn raise_undefined(e: &mut A64IrEmitter) -> Step {
    e.exception_raised(Exception::UndefinedInstruction);
    e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
    Step::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::Opcode;

    fn translate_words(pc: u64, words: &[u32]) -> Block {
        let mem: std::collections::HashMap<u64, u32> = words
            .iter()
            .enumerate()
            .map(|(i, &w)| (pc + 4 * i as u64, w))
            .collect();
        let ctx = TranslateContext { single_stepping: false };
        translate(
            A64LocationDescriptor::new(pc, 0, false),
            &|addr| mem.get(&addr).copied(),
            &ctx,
        )
    }

    #[test]
    fn lifts_add_then_ret() {
        // ADD X0, X1, X2; RET
        let block = translate_words(0x1000, &[0x8B02_0020, 0xD65F_03C0]);
        assert_eq!(block.cycle_count, 2);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::Add64));
        assert_eq!(block.terminal, Terminal::PopRSBHint);
    }

    #[test]
    fn bl_pushes_rsb_and_links() {
        let block = translate_words(0x1000, &[0x9400_0004]);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::PushRSB));
        assert_eq!(
            block.terminal,
            Terminal::LinkBlock {
                next: A64LocationDescriptor::new(0x1010, 0, false).to_location()
            }
        );
    }

    #[test]
    fn undecodable_word_raises() {
        let block = translate_words(0x1000, &[0xFFFF_FFFF]);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A64ExceptionRaised));
    }
}
