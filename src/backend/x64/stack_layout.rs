/// Spill slots available to the register allocator.
pub const SPILL_COUNT: usize = 64;

/// The dispatch frame, living at RSP while guest code runs.
///
/// Emitted code addresses these fields as `[rsp + offset]`; the offsets
/// are compile-time constants baked into generated instructions.
#[repr(C, align(16))]
pub struct StackLayout {
    /// Remaining cycle budget for this run.
    pub cycles_remaining: i64,
    /// Cycle budget the run started with.
    pub cycles_to_run: i64,
    /// Register allocator spill area (128-bit slots).
    pub spill: [[u64; 2]; SPILL_COUNT],
    /// Host MXCSR saved across guest execution.
    pub save_host_mxcsr: u32,
    _pad: [u32; 3],
}

impl StackLayout {
    pub const fn cycles_remaining_offset() -> usize {
        core::mem::offset_of!(StackLayout, cycles_remaining)
    }

    pub const fn cycles_to_run_offset() -> usize {
        core::mem::offset_of!(StackLayout, cycles_to_run)
    }

    pub const fn spill_offset(index: usize) -> usize {
        core::mem::offset_of!(StackLayout, spill) + index * 16
    }

    pub const fn save_host_mxcsr_offset() -> usize {
        core::mem::offset_of!(StackLayout, save_host_mxcsr)
    }
}

const _: () = assert!(core::mem::size_of::<StackLayout>() % 16 == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spill_slots_are_xmm_sized() {
        assert_eq!(StackLayout::spill_offset(1) - StackLayout::spill_offset(0), 16);
    }
}
