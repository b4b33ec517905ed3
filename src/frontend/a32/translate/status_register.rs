use crate::config::Exception;
use crate::frontend::a32::decode::{arm_expand_imm_c, ArmFields};
use crate::frontend::a32::translate::Step;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

pub fn mrs(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let cpsr = e.get_cpsr();
    e.set_register(f.rd(), cpsr);
    Step::Continue
}

/// Byte mask for the application-level MSR fields (f sets NZCVQ, s sets
/// GE; the x and c fields are privileged and ignored here).
fn msr_mask(f: ArmFields) -> u32 {
    let mut mask = 0u32;
    if f.0 & (1 << 19) != 0 {
        mask |= 0xF800_0000; // NZCVQ + IT[1:0]? flags byte without IT
    }
    if f.0 & (1 << 18) != 0 {
        mask |= 0x000F_0000; // GE
    }
    mask
}

pub fn msr_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let mask = msr_mask(f);
    if mask == 0 {
        return Step::Continue;
    }
    let (imm, _) = arm_expand_imm_c(f.imm12(), false);
    let old = e.get_cpsr();
    let kept = e.ir.and_32(old, Value::ImmU32(!mask));
    let result = e.ir.or_32(kept, Value::ImmU32(imm & mask));
    e.set_cpsr(result);
    Step::Continue
}

pub fn msr_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let mask = msr_mask(f);
    if mask == 0 {
        return Step::Continue;
    }
    let value = e.get_register(f.rm());
    let field = e.ir.and_32(value, Value::ImmU32(mask));
    let old = e.get_cpsr();
    let kept = e.ir.and_32(old, Value::ImmU32(!mask));
    let result = e.ir.or_32(kept, field);
    e.set_cpsr(result);
    Step::Continue
}

pub fn svc(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let next_pc = e.pc().wrapping_add(e.current_location.instruction_size());
    e.branch_write_pc(Value::ImmU32(next_pc));
    let return_location = e.current_location.set_pc(next_pc);
    e.ir.push_rsb(return_location.to_location().value());
    e.call_supervisor(Value::ImmU32(f.imm24()));
    e.set_term(Terminal::check_halt(Terminal::PopRSBHint));
    Step::Stop
}

pub fn bkpt(e: &mut A32IrEmitter, _f: ArmFields) -> Step {
    e.exception_raised(Exception::Breakpoint);
    e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
    Step::Stop
}

/// WFI/WFE/YIELD surface as exceptions so the embedder can schedule; the
/// block resumes at the following instruction if no halt was requested.
pub fn hint_exception(e: &mut A32IrEmitter, exception: Exception) -> Step {
    let size = e.current_location.instruction_size() as i32;
    e.exception_raised(exception);
    let next = e.current_location.advance_pc(size).to_location();
    e.set_term(Terminal::check_halt(Terminal::LinkBlock { next }));
    Step::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn svc_predicts_return_through_rsb() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        svc(&mut e, ArmFields(0xEF00_0042));
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::A32CallSupervisor && i.arg(0) == Value::ImmU32(0x42)
        }));
        assert_eq!(block.terminal, Terminal::check_halt(Terminal::PopRSBHint));
    }

    #[test]
    fn msr_flags_field_masks_nzcvq() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // MSR CPSR_f, R0
        msr_reg(&mut e, ArmFields(0xE128_F000));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32SetCpsr));
    }
}
