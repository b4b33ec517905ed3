use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::helpers::sign_extend;
use crate::frontend::a32::translate::Step;
use crate::frontend::a32::types::Reg;
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

pub fn b(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = sign_extend(f.imm24(), 24) << 2;
    let target = e.pc().wrapping_add(8).wrapping_add(offset as u32);
    let next = e.current_location.set_pc(target).to_location();
    e.set_term(Terminal::LinkBlock { next });
    Step::Stop
}

pub fn bl(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let offset = sign_extend(f.imm24(), 24) << 2;
    let target = e.pc().wrapping_add(8).wrapping_add(offset as u32);
    let lr = e.pc().wrapping_add(4);
    e.set_register(Reg::R14, Value::ImmU32(lr));
    let return_location = e.current_location.advance_pc(4);
    e.ir.push_rsb(return_location.to_location().value());
    let next = e.current_location.set_pc(target).to_location();
    e.set_term(Terminal::LinkBlock { next });
    Step::Stop
}

/// BLX (immediate): always switches to Thumb state.
pub fn blx_imm(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let h = (f.0 >> 24) & 1;
    let offset = (sign_extend(f.imm24(), 24) << 2) as u32 | (h << 1);
    let target = e.pc().wrapping_add(8).wrapping_add(offset);
    let lr = e.pc().wrapping_add(4);
    e.set_register(Reg::R14, Value::ImmU32(lr));
    let return_location = e.current_location.advance_pc(4);
    e.ir.push_rsb(return_location.to_location().value());

    let next_location = e.current_location.set_t_flag(true).set_pc(target);
    e.update_upper_location_descriptor(next_location.upper_location_descriptor());
    e.set_term(Terminal::LinkBlock { next: next_location.to_location() });
    Step::Stop
}

pub fn bx(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let target = e.get_register(f.rm());
    e.bx_write_pc(target);
    e.set_term(if f.rm() == Reg::R14 { Terminal::PopRSBHint } else { Terminal::FastDispatchHint });
    Step::Stop
}

pub fn blx_reg(e: &mut A32IrEmitter, f: ArmFields) -> Step {
    let target = e.get_register(f.rm());
    let lr = e.pc().wrapping_add(4);
    e.set_register(Reg::R14, Value::ImmU32(lr));
    let return_location = e.current_location.advance_pc(4);
    e.ir.push_rsb(return_location.to_location().value());
    e.bx_write_pc(target);
    e.set_term(Terminal::FastDispatchHint);
    Step::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn b_computes_fetch_relative_target() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // B #+8 (imm24 = 2)
        b(&mut e, ArmFields(0xEA00_0002));
        assert_eq!(
            block.terminal,
            Terminal::LinkBlock { next: A32LocationDescriptor::at(0x1010).to_location() }
        );
    }

    #[test]
    fn bl_links_and_pushes_rsb() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        bl(&mut e, ArmFields(0xEB00_0000));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::PushRSB));
        // LR = 0x1004
        let set = block
            .iter_live()
            .find(|(_, i)| i.opcode == Opcode::A32SetRegister)
            .unwrap()
            .1;
        assert_eq!(set.arg(1), Value::ImmU32(0x1004));
    }

    #[test]
    fn blx_imm_switches_to_thumb() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        blx_imm(&mut e, ArmFields(0xFA00_0000));
        match block.terminal {
            Terminal::LinkBlock { next } => {
                assert!(A32LocationDescriptor::from_location(next).t_flag());
                assert_eq!(A32LocationDescriptor::from_location(next).pc(), 0x1008);
            }
            ref other => panic!("unexpected terminal {other}"),
        }
    }
}
