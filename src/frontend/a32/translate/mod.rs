//! A32 lifter: ARM and Thumb instruction streams to IR blocks.

pub mod branch;
pub mod coprocessor;
pub mod data_processing;
pub mod helpers;
pub mod load_store;
pub mod misc;
pub mod multiply;
pub mod saturated;
pub mod status_register;
pub mod synchronization;
pub mod thumb16;
pub mod thumb32;

use crate::config::{Coprocessor, Exception};
use crate::frontend::a32::decode::{self, ArmFields, ArmInst};
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::block::Block;
use crate::ir::cond::Cond;
use crate::ir::location::A32LocationDescriptor;
use crate::ir::terminal::Terminal;

/// Hard cap on instructions lifted into one block.
pub const MAX_BLOCK_INSTRUCTIONS: usize = 32;

/// Per-translation environment: options plus the coprocessor hooks that
/// must be consulted while lifting.
pub struct TranslateContext<'a> {
    pub coprocessors: &'a mut [Option<Box<dyn Coprocessor>>; 16],
    pub single_stepping: bool,
}

/// Whether translation of the current block continues after an
/// instruction, and why not if it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The instruction emitted a terminal.
    Stop,
}

/// Tracks the shared condition of a conditional A32 block.
enum CondState {
    /// Every instruction so far was unconditional.
    Always,
    /// Instructions so far share this condition.
    Conditional(Cond),
}

/// Lift a block starting at `descriptor`.
pub fn translate(
    descriptor: A32LocationDescriptor,
    read_code: &dyn Fn(u32) -> Option<u32>,
    ctx: &mut TranslateContext<'_>,
) -> Block {
    let mut block = Block::new(descriptor.to_location());
    let start_pc = descriptor.pc();
    let mut current = descriptor;
    let mut cond_state = CondState::Always;
    let limit = if ctx.single_stepping { 1 } else { MAX_BLOCK_INSTRUCTIONS };

    loop {
        // Peek the condition without emitting anything, so a condition
        // change can close the block before this instruction.
        let instr_cond = if current.t_flag() {
            if read_code(current.pc()).is_none() {
                break;
            }
            current.it().cond()
        } else {
            let Some(word) = read_code(current.pc()) else {
                break;
            };
            let c = ArmFields(word).cond();
            if c == Cond::NV { Cond::AL } else { c }
        };

        match (&cond_state, instr_cond) {
            (CondState::Always, Cond::AL) => {}
            (CondState::Always, c) => {
                if block.inst_count() != 0 || block.cycle_count != 0 {
                    // Close the unconditional prefix first.
                    break;
                }
                cond_state = CondState::Conditional(c);
                block.cond = Some(c);
            }
            (CondState::Conditional(c), ic) if *c == ic => {}
            (CondState::Conditional(_), _) => break,
        }

        let step = translate_one(&mut block, &mut current, read_code, ctx);
        block.cycle_count += 1;
        block.cond_failed_location = Some(current.to_location());

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
        // Nothing fetchable at this location: report it and consume one
        // cycle so a retry loop cannot spin without a budget.
        let mut e = A32IrEmitter::new(&mut block, current);
        e.exception_raised(crate::config::Exception::NoExecuteFault);
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
    block.pc_range = (start_pc as u64, current.pc() as u64);
    block
}

/// Lift one instruction, advancing `current` past it.
fn translate_one(
    block: &mut Block,
    current: &mut A32LocationDescriptor,
    read_code: &dyn Fn(u32) -> Option<u32>,
    ctx: &mut TranslateContext<'_>,
) -> Step {
    if current.t_flag() {
        let pc = current.pc();
        let hw1 = match read_code(pc) {
            Some(w) => w as u16,
            None => return Step::Stop,
        };
        if decode::is_thumb32(hw1) {
            let hw2 = match read_code(pc.wrapping_add(2)) {
                Some(w) => w as u16,
                None => return Step::Stop,
            };
            let mut e = A32IrEmitter::new(block, *current);
            let step = thumb32::translate(&mut e, hw1, hw2);
            *current = advance_thumb(*current, 4);
            step
        } else {
            let mut e = A32IrEmitter::new(block, *current);
            // IT ends the block (the IT bits are part of the location
            // descriptor), so the advance below only applies to ordinary
            // instructions.
            let step = thumb16::translate(&mut e, hw1);
            *current = advance_thumb(*current, 2);
            step
        }
    } else {
        let pc = current.pc();
        let word = match read_code(pc) {
            Some(w) => w,
            None => return Step::Stop,
        };
        let mut e = A32IrEmitter::new(block, *current);
        let step = translate_arm(&mut e, word, ctx);
        *current = current.advance_pc(4);
        step
    }
}

fn advance_thumb(loc: A32LocationDescriptor, size: i32) -> A32LocationDescriptor {
    loc.advance_pc(size).advance_it()
}

fn translate_arm(e: &mut A32IrEmitter, word: u32, ctx: &mut TranslateContext<'_>) -> Step {
    let f = ArmFields(word);
    let Some(matcher) = decode::decode_arm(word) else {
        return raise_undefined(e);
    };

    use ArmInst::*;
    match matcher.inst {
        // Unconditional space
        Udf => raise_undefined(e),
        Clrex => synchronization::clrex(e),
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
            // The pipeline must refetch: end the block.
            let next = e.current_location.advance_pc(4).to_location();
            e.set_term(Terminal::LinkBlock { next });
            Step::Stop
        }
        PldImm | PldReg => Step::Continue,
        BlxImm => branch::blx_imm(e, f),

        Mrs => status_register::mrs(e, f),
        MsrImm => status_register::msr_imm(e, f),
        MsrReg => status_register::msr_reg(e, f),
        Nop | Sev => Step::Continue,
        Yield => status_register::hint_exception(e, Exception::Yield),
        Wfe => status_register::hint_exception(e, Exception::WaitForEvent),
        Wfi => status_register::hint_exception(e, Exception::WaitForInterrupt),
        Bkpt => status_register::bkpt(e, f),
        Svc => status_register::svc(e, f),

        Bx => branch::bx(e, f),
        BlxReg => branch::blx_reg(e, f),
        B => branch::b(e, f),
        Bl => branch::bl(e, f),
        Clz => misc::clz(e, f),

        Qadd => saturated::qadd(e, f),
        Qsub => saturated::qsub(e, f),
        Qdadd => saturated::qdadd(e, f),
        Qdsub => saturated::qdsub(e, f),
        Ssat => saturated::ssat(e, f),
        Usat => saturated::usat(e, f),

        Mul => multiply::mul(e, f),
        Mla => multiply::mla(e, f),
        Mls => multiply::mls(e, f),
        Umaal => multiply::umaal(e, f),
        Umull => multiply::umull(e, f),
        Umlal => multiply::umlal(e, f),
        Smull => multiply::smull(e, f),
        Smlal => multiply::smlal(e, f),
        Sdiv => multiply::sdiv(e, f),
        Udiv => multiply::udiv(e, f),

        Ldrex => synchronization::ldrex(e, f),
        Ldrexb => synchronization::ldrexb(e, f),
        Ldrexh => synchronization::ldrexh(e, f),
        Ldrexd => synchronization::ldrexd(e, f),
        Strex => synchronization::strex(e, f),
        Strexb => synchronization::strexb(e, f),
        Strexh => synchronization::strexh(e, f),
        Strexd => synchronization::strexd(e, f),

        LdrhImm => load_store::ldrh_imm(e, f),
        LdrhReg => load_store::ldrh_reg(e, f),
        StrhImm => load_store::strh_imm(e, f),
        StrhReg => load_store::strh_reg(e, f),
        LdrsbImm => load_store::ldrsb_imm(e, f),
        LdrsbReg => load_store::ldrsb_reg(e, f),
        LdrshImm => load_store::ldrsh_imm(e, f),
        LdrshReg => load_store::ldrsh_reg(e, f),
        LdrdImm => load_store::ldrd_imm(e, f),
        LdrdReg => load_store::ldrd_reg(e, f),
        StrdImm => load_store::strd_imm(e, f),
        StrdReg => load_store::strd_reg(e, f),

        Sxtb => misc::sxtb(e, f),
        Sxth => misc::sxth(e, f),
        Sxtab => misc::sxtab(e, f),
        Sxtah => misc::sxtah(e, f),
        Uxtb => misc::uxtb(e, f),
        Uxth => misc::uxth(e, f),
        Uxtab => misc::uxtab(e, f),
        Uxtah => misc::uxtah(e, f),
        Rev => misc::rev(e, f),
        Rev16 => misc::rev16(e, f),
        Revsh => misc::revsh(e, f),
        Rbit => misc::rbit(e, f),
        Bfc => misc::bfc(e, f),
        Bfi => misc::bfi(e, f),
        Sbfx => misc::sbfx(e, f),
        Ubfx => misc::ubfx(e, f),
        Movw => misc::movw(e, f),
        Movt => misc::movt(e, f),

        DpImm => data_processing::dp_imm(e, f),
        DpReg => data_processing::dp_reg(e, f),
        DpRsr => data_processing::dp_rsr(e, f),

        LdrImm => load_store::ldr_imm(e, f),
        LdrReg => load_store::ldr_reg(e, f),
        StrImm => load_store::str_imm(e, f),
        StrReg => load_store::str_reg(e, f),
        LdrbImm => load_store::ldrb_imm(e, f),
        LdrbReg => load_store::ldrb_reg(e, f),
        StrbImm => load_store::strb_imm(e, f),
        StrbReg => load_store::strb_reg(e, f),

        Ldm => load_store::ldm(e, f),
        Stm => load_store::stm(e, f),

        Cdp => coprocessor::cdp(e, f, ctx),
        Mcr => coprocessor::mcr(e, f, ctx),
        Mrc => coprocessor::mrc(e, f, ctx),
        Mcrr => coprocessor::mcrr(e, f, ctx),
        Mrrc => coprocessor::mrrc(e, f, ctx),
        Ldc => coprocessor::ldc(e, f, ctx),
        Stc => coprocessor::stc(e, f, ctx),
    }
}

/// Lift the undefined-instruction exception sequence and stop the block.
pub fn raise_undefined(e: &mut A32IrEmitter) -> Step {
    e.exception_raised(Exception::UndefinedInstruction);
    e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
    Step::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::Opcode;

    fn translate_words(pc: u32, words: &[u32]) -> Block {
        let mem: std::collections::HashMap<u32, u32> = words
            .iter()
            .enumerate()
            .map(|(i, &w)| (pc + 4 * i as u32, w))
            .collect();
        let mut coprocs: [Option<Box<dyn Coprocessor>>; 16] = Default::default();
        let mut ctx = TranslateContext { coprocessors: &mut coprocs, single_stepping: false };
        translate(A32LocationDescriptor::at(pc), &|addr| mem.get(&addr).copied(), &mut ctx)
    }

    #[test]
    fn lifts_mov_add_bx() {
        // MOV R0, #1; ADD R0, R0, #2; BX LR
        let block = translate_words(0x1000, &[0xE3A0_0001, 0xE280_0002, 0xE12F_FF1E]);
        assert_eq!(block.cycle_count, 3);
        assert!(block
            .iter_live()
            .any(|(_, i)| i.opcode == Opcode::A32SetRegister));
        assert!(block
            .iter_live()
            .any(|(_, i)| i.opcode == Opcode::A32BXWritePC));
        // BX LR predicts a return.
        assert_eq!(block.terminal, Terminal::PopRSBHint);
        assert_eq!(block.pc_range, (0x1000, 0x100C));
    }

    #[test]
    fn conditional_run_shares_block_cond() {
        // MOVEQ R0, #1; MOVEQ R1, #2; MOVNE R2, #3
        let block = translate_words(0x1000, &[0x03A0_0001, 0x03A0_1002, 0x13A0_2003]);
        assert_eq!(block.cond, Some(Cond::EQ));
        // The NE instruction must not be part of this block.
        assert_eq!(block.cycle_count, 2);
        assert_eq!(
            block.cond_failed_location,
            Some(A32LocationDescriptor::at(0x1008).to_location())
        );
    }

    #[test]
    fn unconditional_prefix_closes_before_conditional() {
        // MOV R0, #1; MOVEQ R1, #2
        let block = translate_words(0x1000, &[0xE3A0_0001, 0x03A0_1002]);
        assert_eq!(block.cond, None);
        assert_eq!(block.cycle_count, 1);
        assert_eq!(
            block.terminal,
            Terminal::LinkBlock { next: A32LocationDescriptor::at(0x1004).to_location() }
        );
    }

    #[test]
    fn undefined_instruction_raises() {
        let block = translate_words(0x1000, &[0xE7F0_00F0]);
        assert!(block
            .iter_live()
            .any(|(_, i)| i.opcode == Opcode::A32ExceptionRaised));
    }

    #[test]
    fn block_caps_at_budget() {
        let words = vec![0xE3A0_0001u32; MAX_BLOCK_INSTRUCTIONS + 8];
        let block = translate_words(0x1000, &words);
        assert_eq!(block.cycle_count as usize, MAX_BLOCK_INSTRUCTIONS);
    }
}
