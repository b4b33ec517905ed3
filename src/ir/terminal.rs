use std::fmt;

use crate::ir::cond::Cond;
use crate::ir::location::LocationDescriptor;

/// How control leaves a translated block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// Unset. Reaching this at runtime is a translator bug.
    Invalid,

    /// Hand `num_instructions` guest instructions at `next` to the
    /// embedder's interpreter, then return to the dispatcher.
    Interpret {
        next: LocationDescriptor,
        num_instructions: usize,
    },

    /// Return to the dispatcher, which re-keys on live state.
    ReturnToDispatch,

    /// Jump straight to `next`'s host code while the cycle budget lasts;
    /// the jump is patched in once `next` is compiled.
    LinkBlock { next: LocationDescriptor },

    /// Unconditionally jump to `next`'s host code (no budget check).
    LinkBlockFast { next: LocationDescriptor },

    /// Predict a guest return through the return stack buffer.
    PopRSBHint,

    /// Predict an indirect target through the fast dispatch table.
    FastDispatchHint,

    /// Conditional terminal.
    If {
        cond: Cond,
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },

    /// Branch on the check bit stored in the dispatch frame.
    CheckBit {
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },

    /// Return to the host if a halt is pending, otherwise continue.
    CheckHalt { else_: Box<Terminal> },
}

impl Terminal {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Terminal::Invalid)
    }

    pub fn if_then_else(cond: Cond, then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::If { cond, then_: Box::new(then_), else_: Box::new(else_) }
    }

    pub fn check_bit(then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::CheckBit { then_: Box::new(then_), else_: Box::new(else_) }
    }

    pub fn check_halt(else_: Terminal) -> Terminal {
        Terminal::CheckHalt { else_: Box::new(else_) }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Invalid => write!(f, "<invalid>"),
            Terminal::Interpret { next, num_instructions } => {
                write!(f, "Interpret({next}, n={num_instructions})")
            }
            Terminal::ReturnToDispatch => write!(f, "ReturnToDispatch"),
            Terminal::LinkBlock { next } => write!(f, "LinkBlock({next})"),
            Terminal::LinkBlockFast { next } => write!(f, "LinkBlockFast({next})"),
            Terminal::PopRSBHint => write!(f, "PopRSBHint"),
            Terminal::FastDispatchHint => write!(f, "FastDispatchHint"),
            Terminal::If { cond, then_, else_ } => write!(f, "If({cond}, {then_}, {else_})"),
            Terminal::CheckBit { then_, else_ } => write!(f, "CheckBit({then_}, {else_})"),
            Terminal::CheckHalt { else_ } => write!(f, "CheckHalt({else_})"),
        }
    }
}
