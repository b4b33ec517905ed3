use std::collections::HashMap;

use iced_x86::code_asm::CodeLabel;

use crate::backend::x64::block_of_code::{PATCH_JG_SIZE, PATCH_JMP_SIZE, PATCH_MOV_RCX_SIZE};
use crate::ir::location::LocationDescriptor;

/// What a link slot contains once its target is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// `jg rel32` taken while cycle budget remains (LinkBlock).
    Jg,
    /// `jz rel32` taken while no halt is pending (LinkBlock without
    /// cycle counting).
    Jz,
    /// `jmp rel32` (LinkBlockFast).
    Jmp,
    /// `mov rcx, imm64` holding an RSB code pointer.
    MovRcx,
}

impl PatchType {
    pub fn slot_size(self) -> usize {
        match self {
            PatchType::Jg | PatchType::Jz => PATCH_JG_SIZE,
            PatchType::Jmp => PATCH_JMP_SIZE,
            PatchType::MovRcx => PATCH_MOV_RCX_SIZE,
        }
    }
}

/// A slot recorded during block emission, pending resolution of its
/// in-block label to an arena offset.
pub struct PendingPatch {
    pub label: CodeLabel,
    pub target: LocationDescriptor,
    pub patch_type: PatchType,
}

/// All link slots referring to one target location.
#[derive(Debug, Default, Clone)]
pub struct PatchInformation {
    pub jg: Vec<usize>,
    pub jz: Vec<usize>,
    pub jmp: Vec<usize>,
    pub mov_rcx: Vec<usize>,
}

impl PatchInformation {
    pub fn is_empty(&self) -> bool {
        self.jg.is_empty() && self.jz.is_empty() && self.jmp.is_empty() && self.mov_rcx.is_empty()
    }
}

/// Map from target location to every slot that jumps there.
pub type PatchTable = HashMap<LocationDescriptor, PatchInformation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_sizes() {
        assert_eq!(PatchType::Jg.slot_size(), 6);
        assert_eq!(PatchType::Jmp.slot_size(), 5);
        assert_eq!(PatchType::MovRcx.slot_size(), 10);
    }
}
