use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::exclusive_monitor::ExclusiveMonitor;

/// Errors that can occur while constructing a JIT instance.
///
/// Everything past construction is either a guest-observable condition
/// (reported through callbacks) or a translator invariant violation
/// (fatal panic); neither is surfaced as a `JitError`.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("failed to allocate code cache: {0}")]
    CodeBufferAllocation(#[from] std::io::Error),
    #[error("assembler error while generating dispatcher: {0}")]
    Assembler(String),
    #[error("host CPU is missing a required feature: {0}")]
    MissingHostFeature(&'static str),
}

bitflags! {
    /// Which optimization passes and runtime shortcuts are enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptimizationFlag: u32 {
        /// Patch direct jumps between compiled blocks.
        const BLOCK_LINKING       = 1 << 0;
        /// Return stack buffer prediction for guest call/return pairs.
        const RETURN_STACK_BUFFER = 1 << 1;
        /// CRC-indexed fast dispatch hint table.
        const FAST_DISPATCH       = 1 << 2;
        /// Guest register get/set coalescing.
        const GET_SET_ELIMINATION = 1 << 3;
        /// Constant propagation and folding.
        const CONST_PROP          = 1 << 4;
        /// Lower memory accesses to direct host loads/stores, recovered
        /// through the fault handler.
        const FASTMEM             = 1 << 5;
    }
}

impl Default for OptimizationFlag {
    fn default() -> Self {
        OptimizationFlag::BLOCK_LINKING
            | OptimizationFlag::RETURN_STACK_BUFFER
            | OptimizationFlag::GET_SET_ELIMINATION
            | OptimizationFlag::CONST_PROP
    }
}

/// Guest exception kinds reported through `exception_raised`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Exception {
    UndefinedInstruction = 0,
    UnpredictableInstruction = 1,
    Breakpoint = 2,
    WaitForInterrupt = 3,
    WaitForEvent = 4,
    Yield = 5,
    SendEvent = 6,
    PreloadData = 7,
    PreloadInstruction = 8,
    NoExecuteFault = 9,
}

impl Exception {
    pub fn from_u64(v: u64) -> Self {
        match v {
            0 => Exception::UndefinedInstruction,
            1 => Exception::UnpredictableInstruction,
            2 => Exception::Breakpoint,
            3 => Exception::WaitForInterrupt,
            4 => Exception::WaitForEvent,
            5 => Exception::Yield,
            6 => Exception::SendEvent,
            7 => Exception::PreloadData,
            8 => Exception::PreloadInstruction,
            _ => Exception::NoExecuteFault,
        }
    }
}

// ---------------------------------------------------------------------------
// Coprocessor interface (A32)
// ---------------------------------------------------------------------------

/// A coprocessor register index (CRn / CRm / CRd), 0..=15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoprocReg(pub u8);

/// A host function invoked from generated code on behalf of a coprocessor.
///
/// The function receives the configured `user_arg` followed by up to two
/// word arguments; two-word results are packed into the u64 return value
/// (low word first).
#[derive(Debug, Clone, Copy)]
pub struct CoprocCallback {
    pub function: unsafe extern "C" fn(user_arg: u64, arg0: u32, arg1: u32) -> u64,
    pub user_arg: u64,
}

/// What the JIT should compile for a one-word coprocessor transfer.
pub enum CoprocOneWord {
    /// No handler: compile the coprocessor-undefined exception sequence.
    Unhandled,
    /// Call into the embedder at runtime.
    Callback(CoprocCallback),
    /// Load/store directly through this pointer into the embedder.
    Ptr(*mut u32),
}

/// What the JIT should compile for a two-word coprocessor transfer.
pub enum CoprocTwoWords {
    Unhandled,
    Callback(CoprocCallback),
    Ptrs(*mut u32, *mut u32),
}

/// What the JIT should compile for LDC/STC word streams.
pub enum CoprocLoadStore {
    Unhandled,
    Callback(CoprocCallback),
}

/// An A32 coprocessor supplied by the embedder (CP0-CP15).
///
/// Each `compile_*` hook is consulted at translation time; the returned
/// action is baked into the block.
pub trait Coprocessor: Send {
    fn compile_internal_operation(
        &mut self, two: bool, opc1: u32, crd: CoprocReg, crn: CoprocReg, crm: CoprocReg, opc2: u32,
    ) -> CoprocLoadStore {
        let _ = (two, opc1, crd, crn, crm, opc2);
        CoprocLoadStore::Unhandled
    }

    fn compile_send_one_word(
        &mut self, two: bool, opc1: u32, crn: CoprocReg, crm: CoprocReg, opc2: u32,
    ) -> CoprocOneWord;

    fn compile_send_two_words(&mut self, two: bool, opc: u32, crm: CoprocReg) -> CoprocTwoWords;

    fn compile_get_one_word(
        &mut self, two: bool, opc1: u32, crn: CoprocReg, crm: CoprocReg, opc2: u32,
    ) -> CoprocOneWord;

    fn compile_get_two_words(&mut self, two: bool, opc: u32, crm: CoprocReg) -> CoprocTwoWords;

    fn compile_load_words(
        &mut self, two: bool, long_transfer: bool, crd: CoprocReg, option: Option<u8>,
    ) -> CoprocLoadStore {
        let _ = (two, long_transfer, crd, option);
        CoprocLoadStore::Unhandled
    }

    fn compile_store_words(
        &mut self, two: bool, long_transfer: bool, crd: CoprocReg, option: Option<u8>,
    ) -> CoprocLoadStore {
        let _ = (two, long_transfer, crd, option);
        CoprocLoadStore::Unhandled
    }
}

// ---------------------------------------------------------------------------
// Embedder callbacks
// ---------------------------------------------------------------------------

/// Host environment for an A32 guest.
///
/// Invoked from generated code through trampolines; reads may have side
/// effects in the embedder (MMIO).
pub trait A32Callbacks: Send {
    /// Fetch a 32-bit instruction word. `None` stops block formation.
    fn memory_read_code(&self, vaddr: u32) -> Option<u32>;

    fn memory_read_8(&self, vaddr: u32) -> u8;
    fn memory_read_16(&self, vaddr: u32) -> u16;
    fn memory_read_32(&self, vaddr: u32) -> u32;
    fn memory_read_64(&self, vaddr: u32) -> u64;

    fn memory_write_8(&mut self, vaddr: u32, value: u8);
    fn memory_write_16(&mut self, vaddr: u32, value: u16);
    fn memory_write_32(&mut self, vaddr: u32, value: u32);
    fn memory_write_64(&mut self, vaddr: u32, value: u64);

    /// Execute `num_instructions` guest instructions starting at `pc` in an
    /// interpreter, updating the JIT state in place.
    fn interpreter_fallback(&mut self, pc: u32, num_instructions: usize) {
        let _ = (pc, num_instructions);
    }

    fn call_supervisor(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u32, exception: Exception);

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&self) -> u64;
}

/// Host environment for an A64 guest.
pub trait A64Callbacks: Send {
    fn memory_read_code(&self, vaddr: u64) -> Option<u32>;

    fn memory_read_8(&self, vaddr: u64) -> u8;
    fn memory_read_16(&self, vaddr: u64) -> u16;
    fn memory_read_32(&self, vaddr: u64) -> u32;
    fn memory_read_64(&self, vaddr: u64) -> u64;

    fn memory_write_8(&mut self, vaddr: u64, value: u8);
    fn memory_write_16(&mut self, vaddr: u64, value: u16);
    fn memory_write_32(&mut self, vaddr: u64, value: u32);
    fn memory_write_64(&mut self, vaddr: u64, value: u64);

    fn call_supervisor(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u64, exception: u64);

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for an [`crate::jit::A32Jit`] instance.
pub struct A32Config {
    pub callbacks: Box<dyn A32Callbacks>,
    /// CP0-CP15. Accesses to an absent coprocessor raise an exception.
    pub coprocessors: [Option<Box<dyn Coprocessor>>; 16],
    /// Base of a flat 4 KiB page table (`table[vaddr >> 12]` is a host
    /// pointer to the page, or null). When present, memory accesses walk
    /// this table inline and only fall back to callbacks on a null entry.
    pub page_table: Option<*mut *mut u8>,
    /// Base host address such that guest address `v` lives at
    /// `fastmem_pointer + v`. Enables fastmem lowering.
    pub fastmem_pointer: Option<*mut u8>,
    /// Treat all data accesses as little-endian regardless of CPSR.E.
    pub always_little_endian: bool,
    pub optimizations: OptimizationFlag,
    pub enable_fast_dispatch: bool,
    pub enable_cycle_counting: bool,
    /// Identifies this core to the global exclusive monitor.
    pub processor_id: usize,
    pub global_monitor: Option<Arc<ExclusiveMonitor>>,
    /// Code cache size in bytes. 0 selects the default (128 MiB).
    pub code_cache_size: usize,
}

impl A32Config {
    pub fn new(callbacks: Box<dyn A32Callbacks>) -> Self {
        Self {
            callbacks,
            coprocessors: Default::default(),
            page_table: None,
            fastmem_pointer: None,
            always_little_endian: false,
            optimizations: OptimizationFlag::default(),
            enable_fast_dispatch: true,
            enable_cycle_counting: true,
            processor_id: 0,
            global_monitor: None,
            code_cache_size: 0,
        }
    }
}

/// Configuration for an [`crate::jit::A64Jit`] instance.
pub struct A64Config {
    pub callbacks: Box<dyn A64Callbacks>,
    pub page_table: Option<*mut *mut u8>,
    /// Number of meaningful guest address bits when walking the page table.
    pub page_table_address_space_bits: u32,
    pub fastmem_pointer: Option<*mut u8>,
    pub optimizations: OptimizationFlag,
    pub enable_fast_dispatch: bool,
    pub enable_cycle_counting: bool,
    pub processor_id: usize,
    pub global_monitor: Option<Arc<ExclusiveMonitor>>,
    pub code_cache_size: usize,
}

impl A64Config {
    pub fn new(callbacks: Box<dyn A64Callbacks>) -> Self {
        Self {
            callbacks,
            page_table: None,
            page_table_address_space_bits: 36,
            fastmem_pointer: None,
            optimizations: OptimizationFlag::default(),
            enable_fast_dispatch: true,
            enable_cycle_counting: true,
            processor_id: 0,
            global_monitor: None,
            code_cache_size: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_optimizations_are_safe_set() {
        let f = OptimizationFlag::default();
        assert!(f.contains(OptimizationFlag::BLOCK_LINKING));
        assert!(f.contains(OptimizationFlag::GET_SET_ELIMINATION));
        assert!(!f.contains(OptimizationFlag::FASTMEM));
    }

    #[test]
    fn exception_round_trips_through_u64() {
        for v in 0..=9u64 {
            assert_eq!(Exception::from_u64(v) as u64, v);
        }
    }
}
