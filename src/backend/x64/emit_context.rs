use std::cell::RefCell;

use crate::backend::x64::block_of_code::DispatcherLabels;
use crate::backend::x64::callback::Callback;
use crate::backend::x64::fastmem::FastmemConfig;
use crate::backend::x64::jit_state::JitStateInfo;
use crate::backend::x64::patch_info::PendingPatch;
use crate::ir::block::CoprocAction;
use crate::ir::location::{A32LocationDescriptor, A64LocationDescriptor, LocationDescriptor};

/// Which guest architecture a block belongs to. Decides how location
/// descriptors unpack and which state fields terminals touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchKind {
    A32,
    A64,
}

impl ArchKind {
    pub fn extract_pc(self, loc: LocationDescriptor) -> u64 {
        match self {
            ArchKind::A32 => A32LocationDescriptor::from_location(loc).pc() as u64,
            ArchKind::A64 => A64LocationDescriptor::from_location(loc).pc(),
        }
    }

    pub fn extract_upper(self, loc: LocationDescriptor) -> u32 {
        match self {
            ArchKind::A32 => A32LocationDescriptor::from_location(loc).upper_location_descriptor(),
            ArchKind::A64 => 0,
        }
    }

    pub fn single_stepping(self, loc: LocationDescriptor) -> bool {
        match self {
            ArchKind::A32 => A32LocationDescriptor::from_location(loc).single_stepping(),
            ArchKind::A64 => A64LocationDescriptor::from_location(loc).single_stepping(),
        }
    }
}

/// Host-side entry points reachable from emitted code.
pub struct EmitCallbacks {
    pub memory_read_8: Box<dyn Callback>,
    pub memory_read_16: Box<dyn Callback>,
    pub memory_read_32: Box<dyn Callback>,
    pub memory_read_64: Box<dyn Callback>,
    pub memory_write_8: Box<dyn Callback>,
    pub memory_write_16: Box<dyn Callback>,
    pub memory_write_32: Box<dyn Callback>,
    pub memory_write_64: Box<dyn Callback>,

    pub exclusive_read_8: Box<dyn Callback>,
    pub exclusive_read_16: Box<dyn Callback>,
    pub exclusive_read_32: Box<dyn Callback>,
    pub exclusive_read_64: Box<dyn Callback>,
    pub exclusive_write_8: Box<dyn Callback>,
    pub exclusive_write_16: Box<dyn Callback>,
    pub exclusive_write_32: Box<dyn Callback>,
    pub exclusive_write_64: Box<dyn Callback>,
    pub exclusive_clear: Box<dyn Callback>,

    pub call_supervisor: Box<dyn Callback>,
    pub exception_raised: Box<dyn Callback>,
    pub interpreter_fallback: Box<dyn Callback>,
}

/// Long-lived emitter configuration shared by every block.
pub struct EmitConfig {
    pub callbacks: EmitCallbacks,
    pub enable_cycle_counting: bool,
    /// Flat 4 KiB page table to walk inline, if the embedder has one.
    pub page_table: Option<u64>,
    /// Direct-mapped guest memory base for fastmem lowering.
    pub fastmem: Option<FastmemConfig>,
    /// Scalar AES routine addresses (used when the host lacks AES-NI).
    pub host_has_aes: bool,
    /// Host SSE4.2 (hardware CRC32); otherwise the helper routines run.
    pub host_has_sse42: bool,
}

/// Everything an emission routine needs while lowering one block.
pub struct EmitContext<'a> {
    pub location: LocationDescriptor,
    pub arch: ArchKind,
    pub config: &'a EmitConfig,
    pub jsi: JitStateInfo,
    /// Arena base, for computing absolute jump targets.
    pub base_address: u64,
    pub dispatcher: DispatcherLabels,
    /// Prelude offsets of the memory fallback thunks.
    pub memory_thunks: Option<crate::backend::x64::emit_memory::MemoryThunks>,
    /// Prelude offsets of the PopRSBHint / FastDispatchHint handlers.
    pub rsb_handler: Option<usize>,
    pub fast_dispatch_handler: Option<usize>,
    pub enable_block_linking: bool,
    pub single_stepping: bool,
    /// Resolves an already-compiled target to its entrypoint.
    pub block_lookup: Option<Box<dyn Fn(LocationDescriptor) -> Option<*const u8> + 'a>>,
    /// Link slots recorded while emitting, resolved after commit.
    pub pending_patches: RefCell<Vec<PendingPatch>>,
    /// Fastmem sites recorded while emitting.
    pub pending_fastmem: RefCell<Vec<crate::backend::x64::fastmem::PendingFastmemSite>>,
    /// Coprocessor actions referenced by the block being emitted.
    pub coproc_actions: &'a [CoprocAction],
    /// Sites the fault handler demoted in a previous incarnation of this
    /// block; they must not use fastmem again.
    pub do_not_fastmem: &'a dyn Fn(LocationDescriptor, u32) -> bool,
}

impl<'a> EmitContext<'a> {
    pub fn dispatcher_address(&self, offset: usize) -> u64 {
        self.base_address + offset as u64
    }
}
