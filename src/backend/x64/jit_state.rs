use crate::backend::x64::nzcv;
use crate::ir::location::{A64LocationDescriptor, LocationDescriptor};

/// Return stack buffer size; must be a power of two.
pub const RSB_SIZE: usize = 8;
pub const RSB_PTR_MASK: u32 = RSB_SIZE as u32 - 1;

/// Offsets into a guest state struct, captured once at construction and
/// used as displacement immediates by the emitter. This is the ABI
/// between generated code and the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct JitStateInfo {
    pub offset_of_pc: usize,
    /// 8 for A64, 4 for A32 (where PC is regs[15]).
    pub pc_width: usize,
    /// A32 only: the upper half of the location descriptor.
    pub offset_of_upper_location_descriptor: Option<usize>,
    pub offset_of_cpsr_nzcv: usize,
    pub offset_of_halt_reason: usize,
    pub offset_of_check_bit: usize,
    pub offset_of_guest_mxcsr: usize,
    pub offset_of_rsb_ptr: usize,
    pub offset_of_rsb_location_descriptors: usize,
    pub offset_of_rsb_codeptrs: usize,
}

// ---------------------------------------------------------------------------
// A64
// ---------------------------------------------------------------------------

/// Guest state for an A64 core. `R15` points here while guest code runs;
/// the layout is `#[repr(C)]` so field offsets are stable.
#[repr(C, align(16))]
pub struct A64JitState {
    pub reg: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    /// NZCV in host flag layout (see [`crate::backend::x64::nzcv`]).
    pub cpsr_nzcv: u32,
    pub guest_mxcsr: u32,
    pub halt_reason: u32,
    pub check_bit: u8,
    _pad: [u8; 3],

    pub rsb_ptr: u32,
    _pad2: u32,
    pub rsb_location_descriptors: [u64; RSB_SIZE],
    pub rsb_codeptrs: [u64; RSB_SIZE],

    /// Vector registers V0-V31 as pairs of u64.
    pub vec: [u64; 64],

    pub fpcr: u32,
    /// FPSR.QC sticky saturation bit.
    pub fpsr_qc: u32,
    pub single_stepping: bool,
    _pad3: [u8; 7],
}

impl A64JitState {
    pub fn new() -> Self {
        let mut state = Self {
            reg: [0; 31],
            sp: 0,
            pc: 0,
            cpsr_nzcv: 0,
            guest_mxcsr: 0x1F80,
            halt_reason: 0,
            check_bit: 0,
            _pad: [0; 3],
            rsb_ptr: 0,
            _pad2: 0,
            rsb_location_descriptors: [0; RSB_SIZE],
            rsb_codeptrs: [0; RSB_SIZE],
            vec: [0; 64],
            fpcr: 0,
            fpsr_qc: 0,
            single_stepping: false,
            _pad3: [0; 7],
        };
        state.reset_rsb();
        state
    }

    pub fn reset_rsb(&mut self) {
        // An all-ones descriptor can never match a live location.
        self.rsb_location_descriptors.fill(u64::MAX);
        self.rsb_codeptrs.fill(0);
    }

    pub fn pstate(&self) -> u32 {
        nzcv::from_host(self.cpsr_nzcv)
    }

    pub fn set_pstate(&mut self, pstate: u32) {
        self.cpsr_nzcv = nzcv::to_host(pstate);
    }

    pub fn fpsr(&self) -> u32 {
        ((self.fpsr_qc != 0) as u32) << 27
    }

    pub fn set_fpsr(&mut self, value: u32) {
        self.fpsr_qc = (value >> 27) & 1;
    }

    pub fn current_location(&self) -> LocationDescriptor {
        A64LocationDescriptor::new(self.pc, self.fpcr, self.single_stepping).to_location()
    }

    pub fn info() -> JitStateInfo {
        JitStateInfo {
            offset_of_pc: core::mem::offset_of!(A64JitState, pc),
            pc_width: 8,
            offset_of_upper_location_descriptor: None,
            offset_of_cpsr_nzcv: core::mem::offset_of!(A64JitState, cpsr_nzcv),
            offset_of_halt_reason: core::mem::offset_of!(A64JitState, halt_reason),
            offset_of_check_bit: core::mem::offset_of!(A64JitState, check_bit),
            offset_of_guest_mxcsr: core::mem::offset_of!(A64JitState, guest_mxcsr),
            offset_of_rsb_ptr: core::mem::offset_of!(A64JitState, rsb_ptr),
            offset_of_rsb_location_descriptors: core::mem::offset_of!(
                A64JitState,
                rsb_location_descriptors
            ),
            offset_of_rsb_codeptrs: core::mem::offset_of!(A64JitState, rsb_codeptrs),
        }
    }

    pub const fn reg_offset(index: usize) -> usize {
        core::mem::offset_of!(A64JitState, reg) + index * 8
    }

    pub const fn sp_offset() -> usize {
        core::mem::offset_of!(A64JitState, sp)
    }

    pub const fn vec_offset(index: usize) -> usize {
        core::mem::offset_of!(A64JitState, vec) + index * 16
    }

    pub const fn fpsr_qc_offset() -> usize {
        core::mem::offset_of!(A64JitState, fpsr_qc)
    }
}

impl Default for A64JitState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// A32
// ---------------------------------------------------------------------------

/// Guest state for an A32 core.
#[repr(C, align(16))]
pub struct A32JitState {
    pub regs: [u32; 16],
    /// T/E/IT/FPSCR-mode bits, matching the high word of the location
    /// descriptor.
    pub upper_location_descriptor: u32,
    /// NZCV in host flag layout.
    pub cpsr_nzcv: u32,
    /// Q sticky flag (0 or 1).
    pub cpsr_q: u32,
    /// GE bits (architectural value in bits 3:0).
    pub cpsr_ge: u32,
    pub guest_mxcsr: u32,
    pub halt_reason: u32,
    pub check_bit: u8,
    _pad: [u8; 3],

    pub rsb_ptr: u32,
    pub rsb_location_descriptors: [u64; RSB_SIZE],
    pub rsb_codeptrs: [u64; RSB_SIZE],

    /// VFP extension registers (S0-S63 view).
    pub ext_regs: [u32; 64],
    /// FPSCR without the mode bits mirrored in
    /// `upper_location_descriptor`.
    pub fpscr: u32,
}

impl A32JitState {
    pub fn new() -> Self {
        let mut state = Self {
            regs: [0; 16],
            upper_location_descriptor: 0,
            cpsr_nzcv: 0,
            cpsr_q: 0,
            cpsr_ge: 0,
            guest_mxcsr: 0x1F80,
            halt_reason: 0,
            check_bit: 0,
            _pad: [0; 3],
            rsb_ptr: 0,
            rsb_location_descriptors: [0; RSB_SIZE],
            rsb_codeptrs: [0; RSB_SIZE],
            ext_regs: [0; 64],
            fpscr: 0,
        };
        state.reset_rsb();
        state
    }

    pub fn reset_rsb(&mut self) {
        self.rsb_location_descriptors.fill(u64::MAX);
        self.rsb_codeptrs.fill(0);
    }

    /// Assemble the architectural CPSR from its split storage.
    pub fn cpsr(&self) -> u32 {
        let mut cpsr = nzcv::from_host(self.cpsr_nzcv);
        cpsr |= (self.cpsr_q & 1) << 27;
        cpsr |= (self.cpsr_ge & 0xF) << 16;
        // T, E and IT come from the upper location descriptor.
        let upper = self.upper_location_descriptor;
        cpsr |= (upper & 1) << 5;
        cpsr |= (upper & 2) << 8;
        let it = (upper >> 8) & 0xFF;
        cpsr |= (it & 0x3) << 25;
        cpsr |= (it >> 2) << 10;
        cpsr | 0x0000_0010 // User mode.
    }

    pub fn set_cpsr(&mut self, cpsr: u32) {
        self.cpsr_nzcv = nzcv::to_host(cpsr);
        self.cpsr_q = (cpsr >> 27) & 1;
        self.cpsr_ge = (cpsr >> 16) & 0xF;
        let it = ((cpsr >> 25) & 0x3) | (((cpsr >> 10) & 0x3F) << 2);
        let mut upper = self.upper_location_descriptor & crate::frontend::a32::fpscr::FPSCR_MODE_MASK;
        upper |= (cpsr >> 5) & 1;
        upper |= (cpsr >> 8) & 2;
        upper |= it << 8;
        // Single-step bit is owned by the run loop.
        upper |= self.upper_location_descriptor & 4;
        self.upper_location_descriptor = upper;
    }

    pub fn fpscr(&self) -> u32 {
        let mode = self.upper_location_descriptor & crate::frontend::a32::fpscr::FPSCR_MODE_MASK;
        self.fpscr | mode
    }

    pub fn set_fpscr(&mut self, value: u32) {
        let mode_mask = crate::frontend::a32::fpscr::FPSCR_MODE_MASK;
        self.fpscr = value & !mode_mask;
        self.upper_location_descriptor =
            (self.upper_location_descriptor & !mode_mask) | (value & mode_mask);
    }

    pub fn current_location(&self) -> LocationDescriptor {
        LocationDescriptor::new(
            self.regs[15] as u64 | ((self.upper_location_descriptor as u64) << 32),
        )
    }

    pub fn set_single_stepping(&mut self, ss: bool) {
        self.upper_location_descriptor =
            (self.upper_location_descriptor & !4) | ((ss as u32) << 2);
    }

    pub fn info() -> JitStateInfo {
        JitStateInfo {
            offset_of_pc: Self::reg_offset(15),
            pc_width: 4,
            offset_of_upper_location_descriptor: Some(core::mem::offset_of!(
                A32JitState,
                upper_location_descriptor
            )),
            offset_of_cpsr_nzcv: core::mem::offset_of!(A32JitState, cpsr_nzcv),
            offset_of_halt_reason: core::mem::offset_of!(A32JitState, halt_reason),
            offset_of_check_bit: core::mem::offset_of!(A32JitState, check_bit),
            offset_of_guest_mxcsr: core::mem::offset_of!(A32JitState, guest_mxcsr),
            offset_of_rsb_ptr: core::mem::offset_of!(A32JitState, rsb_ptr),
            offset_of_rsb_location_descriptors: core::mem::offset_of!(
                A32JitState,
                rsb_location_descriptors
            ),
            offset_of_rsb_codeptrs: core::mem::offset_of!(A32JitState, rsb_codeptrs),
        }
    }

    pub const fn reg_offset(index: usize) -> usize {
        core::mem::offset_of!(A32JitState, regs) + index * 4
    }

    pub const fn cpsr_q_offset() -> usize {
        core::mem::offset_of!(A32JitState, cpsr_q)
    }

    pub const fn cpsr_ge_offset() -> usize {
        core::mem::offset_of!(A32JitState, cpsr_ge)
    }
}

impl Default for A32JitState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::location::A32LocationDescriptor;

    #[test]
    fn a64_pstate_round_trips() {
        let mut state = A64JitState::new();
        for bits in 0u32..16 {
            state.set_pstate(bits << 28);
            assert_eq!(state.pstate(), bits << 28);
        }
    }

    #[test]
    fn a32_cpsr_round_trips_flags_and_state() {
        let mut state = A32JitState::new();
        state.set_cpsr(0xF800_0030 | (0xA << 16) | (1 << 5));
        let cpsr = state.cpsr();
        assert_eq!(cpsr & 0xF000_0000, 0xF000_0000);
        assert_eq!((cpsr >> 27) & 1, 1);
        assert_eq!((cpsr >> 16) & 0xF, 0xA);
        assert_eq!((cpsr >> 5) & 1, 1, "T bit");
    }

    #[test]
    fn a32_location_matches_descriptor_packing() {
        let mut state = A32JitState::new();
        state.regs[15] = 0x8000;
        state.set_cpsr(1 << 5); // Thumb
        let loc = state.current_location();
        let desc = A32LocationDescriptor::from_location(loc);
        assert_eq!(desc.pc(), 0x8000);
        assert!(desc.t_flag());
    }

    #[test]
    fn a64_location_packs_fpcr() {
        let mut state = A64JitState::new();
        state.pc = 0x1000;
        state.fpcr = 0x0040_0000;
        let a = state.current_location();
        state.fpcr = 0;
        let b = state.current_location();
        assert_ne!(a, b);
    }

    #[test]
    fn a32_fpscr_mode_bits_live_in_upper() {
        let mut state = A32JitState::new();
        state.set_fpscr(0x0300_001F);
        assert_eq!(state.fpscr() & 0x0300_0000, 0x0300_0000);
        assert_ne!(state.upper_location_descriptor & 0x0300_0000, 0);
    }
}
