use iced_x86::code_asm::{
    AsmRegister16, AsmRegister32, AsmRegister64, AsmRegister8, AsmRegisterXmm,
};
use iced_x86::code_asm::registers::gpr16::*;
use iced_x86::code_asm::registers::gpr32::*;
use iced_x86::code_asm::registers::gpr64::*;
use iced_x86::code_asm::registers::gpr8::*;
use iced_x86::code_asm::registers::xmm::*;

/// A host location: a general-purpose register, an XMM register, or a
/// spill slot in the dispatch frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostLoc {
    Gpr(u8),
    Xmm(u8),
    Spill(u8),
}

pub const GPR64: [AsmRegister64; 16] =
    [rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15];
pub const GPR32: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];
pub const GPR16: [AsmRegister16; 16] =
    [ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w];
pub const GPR8: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];
pub const XMM: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13,
    xmm14, xmm15,
];

impl HostLoc {
    pub fn is_gpr(self) -> bool {
        matches!(self, HostLoc::Gpr(_))
    }
    pub fn is_xmm(self) -> bool {
        matches!(self, HostLoc::Xmm(_))
    }
    pub fn is_spill(self) -> bool {
        matches!(self, HostLoc::Spill(_))
    }
    pub fn is_register(self) -> bool {
        self.is_gpr() || self.is_xmm()
    }

    pub fn bit_width(self) -> usize {
        match self {
            HostLoc::Gpr(_) => 64,
            HostLoc::Xmm(_) | HostLoc::Spill(_) => 128,
        }
    }

    pub fn gpr_index(self) -> usize {
        match self {
            HostLoc::Gpr(i) => i as usize,
            other => panic!("gpr_index on {other:?}"),
        }
    }

    pub fn r64(self) -> AsmRegister64 {
        GPR64[self.gpr_index()]
    }
    pub fn r32(self) -> AsmRegister32 {
        GPR32[self.gpr_index()]
    }
    pub fn r16(self) -> AsmRegister16 {
        GPR16[self.gpr_index()]
    }
    pub fn r8(self) -> AsmRegister8 {
        GPR8[self.gpr_index()]
    }

    pub fn xmm(self) -> AsmRegisterXmm {
        match self {
            HostLoc::Xmm(i) => XMM[i as usize],
            other => panic!("xmm on {other:?}"),
        }
    }
}

pub const HOST_RAX: HostLoc = HostLoc::Gpr(0);
pub const HOST_RCX: HostLoc = HostLoc::Gpr(1);
pub const HOST_RDX: HostLoc = HostLoc::Gpr(2);
pub const HOST_RBX: HostLoc = HostLoc::Gpr(3);
pub const HOST_RSP: HostLoc = HostLoc::Gpr(4);
pub const HOST_RBP: HostLoc = HostLoc::Gpr(5);
pub const HOST_RSI: HostLoc = HostLoc::Gpr(6);
pub const HOST_RDI: HostLoc = HostLoc::Gpr(7);
pub const HOST_R8: HostLoc = HostLoc::Gpr(8);
pub const HOST_R9: HostLoc = HostLoc::Gpr(9);
pub const HOST_R10: HostLoc = HostLoc::Gpr(10);
pub const HOST_R11: HostLoc = HostLoc::Gpr(11);
pub const HOST_R12: HostLoc = HostLoc::Gpr(12);
pub const HOST_R13: HostLoc = HostLoc::Gpr(13);
pub const HOST_R14: HostLoc = HostLoc::Gpr(14);
pub const HOST_R15: HostLoc = HostLoc::Gpr(15);

/// GPRs available to the allocator. RSP is the stack pointer and R15
/// holds the JIT state pointer; neither may be allocated.
pub const ANY_GPR: &[HostLoc] = &[
    HOST_RAX, HOST_RBX, HOST_RCX, HOST_RDX, HOST_RSI, HOST_RDI, HOST_RBP, HOST_R8, HOST_R9,
    HOST_R10, HOST_R11, HOST_R12, HOST_R13, HOST_R14,
];

/// XMM registers available to the allocator. XMM0 is kept free as an
/// implicit scratch for trampolines.
pub const ANY_XMM: &[HostLoc] = &[
    HostLoc::Xmm(1),
    HostLoc::Xmm(2),
    HostLoc::Xmm(3),
    HostLoc::Xmm(4),
    HostLoc::Xmm(5),
    HostLoc::Xmm(6),
    HostLoc::Xmm(7),
    HostLoc::Xmm(8),
    HostLoc::Xmm(9),
    HostLoc::Xmm(10),
    HostLoc::Xmm(11),
    HostLoc::Xmm(12),
    HostLoc::Xmm(13),
    HostLoc::Xmm(14),
    HostLoc::Xmm(15),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_pools_exclude_reserved() {
        assert!(!ANY_GPR.contains(&HOST_RSP));
        assert!(!ANY_GPR.contains(&HOST_R15));
        assert_eq!(ANY_GPR.len(), 14);
        assert!(!ANY_XMM.contains(&HostLoc::Xmm(0)));
    }

    #[test]
    fn width_views_agree() {
        let loc = HOST_RCX;
        assert_eq!(loc.r64(), rcx);
        assert_eq!(loc.r32(), ecx);
        assert_eq!(loc.r8(), cl);
    }
}
