use crate::ir::block::Block;
use crate::ir::cond::Cond;
use crate::ir::terminal::Terminal;

/// A32 condition folding.
///
/// A block whose instructions all share one non-AL condition carries that
/// condition in `block.cond`. This pass folds it into the terminal:
/// `If { cond, then: <original terminal>, else: LinkBlock(cond_failed) }`.
/// The backend sees `block.cond` and emits the matching prelude branch
/// that skips the instruction body when the condition fails, landing on
/// the else arm.
pub fn a32_condition_folding(block: &mut Block) {
    let cond = match block.cond {
        Some(c) if c != Cond::AL => c,
        _ => return,
    };
    let fail_location = block
        .cond_failed_location
        .expect("conditional block requires a cond_failed_location");

    if matches!(block.terminal, Terminal::If { .. }) {
        return;
    }

    let then_ = std::mem::replace(&mut block.terminal, Terminal::Invalid);
    block.terminal =
        Terminal::if_then_else(cond, then_, Terminal::LinkBlock { next: fail_location });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::location::LocationDescriptor;

    #[test]
    fn wraps_terminal_for_conditional_block() {
        let mut block = Block::new(LocationDescriptor::new(0x1000));
        block.cond = Some(Cond::EQ);
        block.cond_failed_location = Some(LocationDescriptor::new(0x1004));
        block.set_terminal(Terminal::LinkBlock { next: LocationDescriptor::new(0x2000) });

        a32_condition_folding(&mut block);

        match &block.terminal {
            Terminal::If { cond, then_, else_ } => {
                assert_eq!(*cond, Cond::EQ);
                assert_eq!(**then_, Terminal::LinkBlock { next: LocationDescriptor::new(0x2000) });
                assert_eq!(**else_, Terminal::LinkBlock { next: LocationDescriptor::new(0x1004) });
            }
            other => panic!("expected If terminal, got {other}"),
        }
    }

    #[test]
    fn unconditional_block_is_untouched() {
        let mut block = Block::new(LocationDescriptor::new(0x1000));
        block.set_terminal(Terminal::ReturnToDispatch);
        a32_condition_folding(&mut block);
        assert_eq!(block.terminal, Terminal::ReturnToDispatch);
    }
}
