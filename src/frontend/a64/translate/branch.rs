use crate::frontend::a64::translate::helpers::*;
use crate::frontend::a64::translate::Step;
use crate::frontend::a64::types::Reg;
use crate::ir::a64_emitter::A64IrEmitter;
use crate::ir::cond::Cond;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

pub fn b(e: &mut A64IrEmitter, word: u32) -> Step {
    let offset = sign_extend((word & 0x03FF_FFFF) as u64, 26) * 4;
    let target = e.pc().wrapping_add(offset as u64);
    let next = e.current_location.set_pc(target).to_location();
    e.set_term(Terminal::LinkBlock { next });
    Step::Stop
}

pub fn bl(e: &mut A64IrEmitter, word: u32) -> Step {
    let offset = sign_extend((word & 0x03FF_FFFF) as u64, 26) * 4;
    let target = e.pc().wrapping_add(offset as u64);
    let lr = e.pc().wrapping_add(4);
    e.set_x(Reg::LR, Value::ImmU64(lr));
    let ret = e.current_location.advance_pc(4);
    e.ir.push_rsb(ret.to_location().value());
    let next = e.current_location.set_pc(target).to_location();
    e.set_term(Terminal::LinkBlock { next });
    Step::Stop
}

pub fn b_cond(e: &mut A64IrEmitter, word: u32) -> Step {
    let cond = Cond::from_bits(word);
    let offset = sign_extend(((word >> 5) & 0x7FFFF) as u64, 19) * 4;
    let target = e.pc().wrapping_add(offset as u64);
    let taken = e.current_location.set_pc(target).to_location();
    let not_taken = e.current_location.advance_pc(4).to_location();
    e.set_term(Terminal::if_then_else(
        cond,
        Terminal::LinkBlock { next: taken },
        Terminal::LinkBlock { next: not_taken },
    ));
    Step::Stop
}

pub fn cbz(e: &mut A64IrEmitter, word: u32, branch_if_zero: bool) -> Step {
    let sf64 = sf(word);
    let offset = sign_extend(((word >> 5) & 0x7FFFF) as u64, 19) * 4;
    let target = e.pc().wrapping_add(offset as u64);
    let operand = get_reg(e, sf64, rt(word));
    let is_zero = if sf64 {
        e.ir.is_zero_64(operand)
    } else {
        e.ir.is_zero_32(operand)
    };
    e.set_check_bit(is_zero);

    let taken = e.current_location.set_pc(target).to_location();
    let not_taken = e.current_location.advance_pc(4).to_location();
    let (then_, else_) = if branch_if_zero {
        (Terminal::LinkBlock { next: taken }, Terminal::LinkBlock { next: not_taken })
    } else {
        (Terminal::LinkBlock { next: not_taken }, Terminal::LinkBlock { next: taken })
    };
    e.set_term(Terminal::check_bit(then_, else_));
    Step::Stop
}

pub fn tbz(e: &mut A64IrEmitter, word: u32, branch_if_zero: bool) -> Step {
    let bit = ((word >> 31) << 5) | ((word >> 19) & 0x1F);
    let offset = sign_extend(((word >> 5) & 0x3FFF) as u64, 14) * 4;
    let target = e.pc().wrapping_add(offset as u64);
    let operand = e.get_x(rt(word));
    let bit_set = e.ir.test_bit(operand, Value::ImmU8(bit as u8));
    e.set_check_bit(bit_set);

    let taken = e.current_location.set_pc(target).to_location();
    let not_taken = e.current_location.advance_pc(4).to_location();
    // check_bit branches to `then_` when the bit is set.
    let (then_, else_) = if branch_if_zero {
        (Terminal::LinkBlock { next: not_taken }, Terminal::LinkBlock { next: taken })
    } else {
        (Terminal::LinkBlock { next: taken }, Terminal::LinkBlock { next: not_taken })
    };
    e.set_term(Terminal::check_bit(then_, else_));
    Step::Stop
}

pub fn br(e: &mut A64IrEmitter, word: u32) -> Step {
    let target = e.get_x(rn(word));
    e.set_pc(target);
    e.set_term(Terminal::FastDispatchHint);
    Step::Stop
}

pub fn blr(e: &mut A64IrEmitter, word: u32) -> Step {
    let target = e.get_x(rn(word));
    let lr = e.pc().wrapping_add(4);
    e.set_x(Reg::LR, Value::ImmU64(lr));
    let ret = e.current_location.advance_pc(4);
    e.ir.push_rsb(ret.to_location().value());
    e.set_pc(target);
    e.set_term(Terminal::FastDispatchHint);
    Step::Stop
}

pub fn ret(e: &mut A64IrEmitter, word: u32) -> Step {
    let target = e.get_x(rn(word));
    e.set_pc(target);
    e.set_term(Terminal::PopRSBHint);
    Step::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A64LocationDescriptor;

    fn emitter_block() -> (Block, A64LocationDescriptor) {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        (Block::new(loc.to_location()), loc)
    }

    #[test]
    fn backward_branch() {
        let (mut block, loc) = emitter_block();
        let mut e = A64IrEmitter::new(&mut block, loc);
        // B #-4
        b(&mut e, 0x17FF_FFFF);
        assert_eq!(
            block.terminal,
            Terminal::LinkBlock { next: A64LocationDescriptor::new(0xFFC, 0, false).to_location() }
        );
    }

    #[test]
    fn tbz_polarity() {
        let (mut block, loc) = emitter_block();
        let mut e = A64IrEmitter::new(&mut block, loc);
        // TBZ X0, #0, #+8
        tbz(&mut e, 0x3600_0040, true);
        match &block.terminal {
            Terminal::CheckBit { then_, else_ } => {
                // Bit set -> fall through; bit clear -> taken.
                assert_eq!(
                    **then_,
                    Terminal::LinkBlock {
                        next: A64LocationDescriptor::new(0x1004, 0, false).to_location()
                    }
                );
                assert_eq!(
                    **else_,
                    Terminal::LinkBlock {
                        next: A64LocationDescriptor::new(0x1008, 0, false).to_location()
                    }
                );
            }
            other => panic!("unexpected terminal {other}"),
        }
    }
}
