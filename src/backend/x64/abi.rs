//! System V x86-64 calling convention constants.

use crate::backend::x64::hostloc::*;

/// Integer return register.
pub const ABI_RETURN: HostLoc = HOST_RAX;

/// Integer parameter registers, in order.
pub const ABI_PARAMS: [HostLoc; 6] = [HOST_RDI, HOST_RSI, HOST_RDX, HOST_RCX, HOST_R8, HOST_R9];

/// Registers the callee may clobber.
pub const CALLER_SAVE_GPRS: &[HostLoc] = &[
    HOST_RAX, HOST_RCX, HOST_RDX, HOST_RDI, HOST_RSI, HOST_R8, HOST_R9, HOST_R10, HOST_R11,
];

/// All XMM registers are caller-saved on System V.
pub const CALLER_SAVE_XMMS: &[HostLoc] = &[
    HostLoc::Xmm(0),
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

/// Registers the dispatcher prologue saves and restores.
pub const CALLEE_SAVE_GPRS: &[HostLoc] =
    &[HOST_RBX, HOST_RBP, HOST_R12, HOST_R13, HOST_R14, HOST_R15];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_sets_partition_the_file() {
        for loc in CALLEE_SAVE_GPRS {
            assert!(!CALLER_SAVE_GPRS.contains(loc));
        }
        // Everything except RSP is covered.
        assert_eq!(CALLER_SAVE_GPRS.len() + CALLEE_SAVE_GPRS.len(), 15);
    }
}
