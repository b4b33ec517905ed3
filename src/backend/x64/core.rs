//! The per-instance compilation core: translate -> optimize -> emit ->
//! cache, plus linking, invalidation, and the prelude handlers.

use iced_x86::code_asm::*;

use crate::backend::x64::block_cache::{BlockCache, CachedBlock};
use crate::backend::x64::block_of_code::{
    BlockOfCode, DispatcherLabels, RunCodeCallbacks, RunCodeFn,
};
use crate::backend::x64::emit::emit_block;
use crate::backend::x64::emit_context::{ArchKind, EmitConfig, EmitContext};
use crate::backend::x64::emit_memory::MemoryThunks;
use crate::backend::x64::fast_dispatch::{FastDispatchTable, FAST_DISPATCH_INDEX_MASK};
use crate::backend::x64::fastmem::{self, FastmemSite, OwnerId};
use crate::backend::x64::jit_state::{JitStateInfo, RSB_PTR_MASK};
use crate::backend::x64::patch_info::{PatchTable, PatchType};
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::config::{JitError, OptimizationFlag};
use crate::ir::block::Block;
use crate::ir::location::LocationDescriptor;
use crate::ir::opt;

/// Refuse to compile into the last sliver of the arena; clear instead.
const MIN_SPACE_REMAINING: usize = 1024 * 1024;

pub struct JitCore {
    pub code: BlockOfCode,
    pub emit_config: EmitConfig,
    cache: BlockCache,
    dispatcher: DispatcherLabels,
    thunks: MemoryThunks,
    rsb_handler: Option<usize>,
    fast_dispatch_handler: Option<usize>,
    fast_dispatch: Option<FastDispatchTable>,
    patch_table: PatchTable,
    optimizations: OptimizationFlag,
    arch: ArchKind,
    owner: OwnerId,
}

impl JitCore {
    pub fn new(
        arch: ArchKind,
        jsi: JitStateInfo,
        emit_config: EmitConfig,
        run_callbacks: RunCodeCallbacks,
        optimizations: OptimizationFlag,
        enable_fast_dispatch: bool,
        cache_size: usize,
    ) -> Result<Self, JitError> {
        let mut code = BlockOfCode::new(cache_size, jsi)?;
        let dispatcher = code.gen_run_code(&run_callbacks)?;

        let mut core = Self {
            code,
            emit_config,
            cache: BlockCache::new(),
            dispatcher,
            thunks: MemoryThunks { read: [0; 4], write: [0; 4] },
            rsb_handler: None,
            fast_dispatch_handler: None,
            fast_dispatch: None,
            patch_table: PatchTable::new(),
            optimizations,
            arch,
            owner: OwnerId::next(),
        };

        core.thunks = core.gen_memory_thunks()?;
        if core.optimizations.contains(OptimizationFlag::RETURN_STACK_BUFFER) {
            core.rsb_handler = Some(core.gen_rsb_handler()?);
        }
        if enable_fast_dispatch && core.emit_config.host_has_sse42 {
            let table = FastDispatchTable::new();
            core.fast_dispatch_handler = Some(core.gen_fast_dispatch_handler(&table)?);
            core.fast_dispatch = Some(table);
        }
        core.code.mark_prelude_complete();

        if core.emit_config.fastmem.is_some() {
            fastmem::install_exception_handler();
        }

        Ok(core)
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn dispatcher(&self) -> DispatcherLabels {
        self.dispatcher
    }

    /// # Safety
    /// Callers must only run the returned code against the jit state this
    /// core was configured for.
    pub unsafe fn run_code_fn(&mut self) -> Result<RunCodeFn, JitError> {
        self.code.disable_writing()?;
        Ok(unsafe { self.code.run_code_fn(self.dispatcher) })
    }

    /// # Safety
    /// As [`Self::run_code_fn`].
    pub unsafe fn step_code_fn(&mut self) -> Result<RunCodeFn, JitError> {
        self.code.disable_writing()?;
        Ok(unsafe { self.code.step_code_fn(self.dispatcher) })
    }

    /// Look up the block for `location`, compiling via `translate` on a
    /// miss. The arena must be writable.
    pub fn get_or_compile(
        &mut self,
        location: LocationDescriptor,
        translate: impl FnOnce() -> Block,
    ) -> *const u8 {
        // Fastmem demotions queued by the fault handler force their
        // blocks to recompile without the demoted sites.
        let pending = fastmem::take_pending_invalidations(self.owner);
        if !pending.is_empty() {
            self.remove_blocks(&pending);
        }

        if let Some(cached) = self.cache.get(&location) {
            return cached.entrypoint;
        }

        if self.code.space_remaining() < MIN_SPACE_REMAINING {
            log::debug!("code cache exhausted; clearing");
            self.clear_cache();
        }

        let mut block = translate();
        self.optimize(&mut block);
        self.compile(location, &block)
    }

    fn optimize(&mut self, block: &mut Block) {
        if self.optimizations.contains(OptimizationFlag::GET_SET_ELIMINATION) {
            match self.arch {
                ArchKind::A32 => opt::a32_get_set_elimination(block),
                ArchKind::A64 => opt::a64_get_set_elimination(block),
            }
            opt::dead_code_elimination(block);
        }
        if self.optimizations.contains(OptimizationFlag::CONST_PROP) {
            opt::constant_propagation(block);
            opt::dead_code_elimination(block);
        }
        if self.arch == ArchKind::A32 {
            opt::a32_condition_folding(block);
        }
        if cfg!(debug_assertions) {
            opt::verify(block);
        }
    }

    fn compile(&mut self, location: LocationDescriptor, block: &Block) -> *const u8 {
        log::trace!("compiling block at {location} ({} insts)", block.live_inst_count());

        let inst_info: Vec<(u32, usize)> = block
            .instructions
            .iter()
            .map(|inst| {
                let width = inst.return_type().bit_width();
                (inst.use_count, if width == 0 { 64 } else { width })
            })
            .collect();

        let mut asm = CodeAssembler::new(64).expect("assembler");
        let (pending_patches, pending_fastmem) = {
            let owner = self.owner;
            let cache_ptr: *const BlockCache = &self.cache;
            let ctx = EmitContext {
                location,
                arch: self.arch,
                config: &self.emit_config,
                jsi: self.code.jsi,
                base_address: self.code.base_address(),
                dispatcher: self.dispatcher,
                memory_thunks: Some(self.thunks),
                rsb_handler: self.rsb_handler,
                fast_dispatch_handler: self.fast_dispatch_handler,
                enable_block_linking: self.optimizations.contains(OptimizationFlag::BLOCK_LINKING),
                single_stepping: self.arch.single_stepping(location),
                block_lookup: Some(Box::new(move |loc| {
                    // The cache is not mutated during emission.
                    unsafe { (*cache_ptr).get(&loc).map(|b| b.entrypoint) }
                })),
                pending_patches: Default::default(),
                pending_fastmem: Default::default(),
                coproc_actions: &block.coproc_actions,
                do_not_fastmem: &move |loc, inst| fastmem::is_demoted(owner, loc, inst),
            };

            let mut ra = RegAlloc::new(&mut asm, inst_info);
            emit_block(&ctx, &mut ra, block);
            (ctx.pending_patches.into_inner(), ctx.pending_fastmem.into_inner())
        };

        let region = self.code.commit(asm).expect("block assembly failed");
        let entrypoint = unsafe { self.code.base_ptr().add(region.offset) };

        // Resolve link slots and remember them for later (un)patching.
        for pending in pending_patches {
            let offset = region.label_offset(&pending.label);
            let info = self.patch_table.entry(pending.target).or_default();
            match pending.patch_type {
                PatchType::Jg => info.jg.push(offset),
                PatchType::Jz => info.jz.push(offset),
                PatchType::Jmp => info.jmp.push(offset),
                PatchType::MovRcx => info.mov_rcx.push(offset),
            }
            // Link immediately if the target is already compiled.
            if let Some(target) = self.cache.get(&pending.target).map(|b| b.entrypoint) {
                self.apply_one_patch(pending.patch_type, offset, Some(target));
            }
        }

        // Register fastmem sites with the fault handler.
        if !pending_fastmem.is_empty() {
            let base = self.code.base_address();
            let sites: Vec<FastmemSite> = pending_fastmem
                .iter()
                .map(|site| {
                    let start = region.label_offset(&site.site);
                    let end = region.label_offset(&site.site_end);
                    FastmemSite {
                        owner: self.owner,
                        site: base + start as u64,
                        site_len: (end - start) as u32,
                        fallback: base + region.label_offset(&site.fallback) as u64,
                        location: site.location,
                        inst_offset: site.inst_offset,
                    }
                })
                .collect();
            fastmem::register_sites(sites);
        }

        self.cache.insert(
            location,
            block.pc_range,
            CachedBlock { entrypoint, entrypoint_offset: region.offset, size: region.size },
        );
        if let Some(table) = &mut self.fast_dispatch {
            table.insert(location, entrypoint);
        }

        // Point every earlier link slot for this location at the new code.
        self.patch(location, Some(entrypoint));

        entrypoint
    }

    fn apply_one_patch(&mut self, patch_type: PatchType, offset: usize, target: Option<*const u8>) {
        match (patch_type, target) {
            (PatchType::Jg, Some(t)) => self.code.patch_jg(offset, t as u64),
            (PatchType::Jz, Some(t)) => self.code.patch_jz(offset, t as u64),
            (PatchType::Jmp, Some(t)) => self.code.patch_jmp(offset, t as u64),
            (PatchType::MovRcx, Some(t)) => self.code.patch_mov_rcx(offset, t as u64),
            (PatchType::MovRcx, None) => {
                let fallback = self.code.address_of(self.dispatcher.return_from_run_code);
                self.code.patch_mov_rcx(offset, fallback);
            }
            (kind, None) => self.code.unpatch(offset, kind.slot_size()),
        }
    }

    fn patch(&mut self, target: LocationDescriptor, entrypoint: Option<*const u8>) {
        let Some(info) = self.patch_table.get(&target).cloned() else {
            return;
        };
        for &offset in &info.jg {
            self.apply_one_patch(PatchType::Jg, offset, entrypoint);
        }
        for &offset in &info.jz {
            self.apply_one_patch(PatchType::Jz, offset, entrypoint);
        }
        for &offset in &info.jmp {
            self.apply_one_patch(PatchType::Jmp, offset, entrypoint);
        }
        for &offset in &info.mov_rcx {
            self.apply_one_patch(PatchType::MovRcx, offset, entrypoint);
        }
    }

    // -------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------

    pub fn invalidate_range(&mut self, start: u64, length: u64) {
        let victims = self.cache.overlapping(start, length);
        if victims.is_empty() {
            return;
        }
        log::debug!("invalidating {} blocks for [{start:#x}, +{length:#x})", victims.len());
        self.remove_blocks(&victims);
    }

    fn remove_blocks(&mut self, victims: &[LocationDescriptor]) {
        for &victim in victims {
            // Restore every link slot that pointed at the dead block.
            self.patch(victim, None);
            if let Some(table) = &mut self.fast_dispatch {
                table.invalidate(victim);
            }
        }
        fastmem::unregister_blocks(self.owner, victims);
        self.cache.remove(victims);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.patch_table.clear();
        if let Some(table) = &mut self.fast_dispatch {
            table.clear();
        }
        fastmem::unregister_owner(self.owner);
        self.code.clear_cache();
    }

    // -------------------------------------------------------------------
    // Prelude handlers
    // -------------------------------------------------------------------

    /// Build the live location descriptor into RBX from guest state.
    fn emit_current_descriptor(&self, a: &mut CodeAssembler) -> Result<(), iced_x86::IcedError> {
        let jsi = self.code.jsi;
        match self.arch {
            ArchKind::A32 => {
                a.mov(ebx, dword_ptr(r15 + jsi.offset_of_pc as i32))?;
                a.mov(
                    edx,
                    dword_ptr(r15 + jsi.offset_of_upper_location_descriptor.unwrap() as i32),
                )?;
                a.shl(rdx, 32)?;
                a.or(rbx, rdx)?;
            }
            ArchKind::A64 => {
                use crate::backend::x64::jit_state::A64JitState;
                use crate::ir::location::A64LocationDescriptor;
                a.mov(rbx, qword_ptr(r15 + jsi.offset_of_pc as i32))?;
                a.mov(rdx, A64LocationDescriptor::PC_MASK)?;
                a.and(rbx, rdx)?;
                let fpcr_off = core::mem::offset_of!(A64JitState, fpcr) as i32;
                a.mov(edx, dword_ptr(r15 + fpcr_off))?;
                a.and(edx, A64LocationDescriptor::FPCR_MODE_MASK as i32)?;
                a.shl(rdx, A64LocationDescriptor::FPCR_SHIFT)?;
                a.or(rbx, rdx)?;
            }
        }
        Ok(())
    }

    /// The PopRSBHint handler: verify the top RSB entry against the live
    /// descriptor and tail-jump to its code pointer on a hit.
    fn gen_rsb_handler(&mut self) -> Result<usize, JitError> {
        let jsi = self.code.jsi;
        let mut a = CodeAssembler::new(64).map_err(err)?;
        let mut miss = a.create_label();

        self.emit_current_descriptor(&mut a).map_err(err)?;

        a.mov(eax, dword_ptr(r15 + jsi.offset_of_rsb_ptr as i32)).map_err(err)?;
        a.mov(
            rcx,
            qword_ptr(r15 + rax * 8 + jsi.offset_of_rsb_location_descriptors as i32),
        )
        .map_err(err)?;
        a.mov(rdx, qword_ptr(r15 + rax * 8 + jsi.offset_of_rsb_codeptrs as i32))
            .map_err(err)?;

        // Pop regardless of hit or miss.
        a.mov(esi, eax).map_err(err)?;
        a.sub(esi, 1).map_err(err)?;
        a.and(esi, RSB_PTR_MASK as i32).map_err(err)?;
        a.mov(dword_ptr(r15 + jsi.offset_of_rsb_ptr as i32), esi).map_err(err)?;

        a.cmp(rcx, rbx).map_err(err)?;
        a.jne(miss).map_err(err)?;
        a.jmp(rdx).map_err(err)?;

        a.set_label(&mut miss).map_err(err)?;
        // Invalidate the mismatched entry.
        a.mov(rcx, -1i64).map_err(err)?;
        a.mov(
            qword_ptr(r15 + rax * 8 + jsi.offset_of_rsb_location_descriptors as i32),
            rcx,
        )
        .map_err(err)?;
        let slow = match self.fast_dispatch_handler {
            Some(handler) => self.code.address_of(handler),
            None => self.code.address_of(self.dispatcher.return_from_run_code),
        };
        a.jmp(slow).map_err(err)?;

        let region = self.code.commit(a)?;
        Ok(region.offset)
    }

    /// The FastDispatchHint handler: CRC32C the live descriptor, probe
    /// the hint table, jump on hit, fall back to the dispatcher on miss.
    fn gen_fast_dispatch_handler(&mut self, table: &FastDispatchTable) -> Result<usize, JitError> {
        let table_base = table.base_ptr() as u64;
        let mut a = CodeAssembler::new(64).map_err(err)?;
        let mut miss = a.create_label();

        self.emit_current_descriptor(&mut a).map_err(err)?;

        a.xor(eax, eax).map_err(err)?;
        a.crc32(rax, rbx).map_err(err)?;
        a.and(eax, FAST_DISPATCH_INDEX_MASK as i32).map_err(err)?;
        a.shl(rax, 4).map_err(err)?;
        a.mov(rcx, table_base).map_err(err)?;
        a.add(rcx, rax).map_err(err)?;
        a.cmp(qword_ptr(rcx), rbx).map_err(err)?;
        a.jne(miss).map_err(err)?;
        a.jmp(qword_ptr(rcx + 8)).map_err(err)?;

        a.set_label(&mut miss).map_err(err)?;
        a.jmp(self.code.address_of(self.dispatcher.return_from_run_code)).map_err(err)?;

        let region = self.code.commit(a)?;
        Ok(region.offset)
    }

    /// Out-of-line memory fallback thunks (see [`MemoryThunks`]).
    fn gen_memory_thunks(&mut self) -> Result<MemoryThunks, JitError> {
        let mut thunks = MemoryThunks { read: [0; 4], write: [0; 4] };
        for (i, _) in [8usize, 16, 32, 64].iter().enumerate() {
            thunks.read[i] = self.gen_memory_thunk(i, false)?;
            thunks.write[i] = self.gen_memory_thunk(i, true)?;
        }
        Ok(thunks)
    }

    fn gen_memory_thunk(&mut self, width_index: usize, is_write: bool) -> Result<usize, JitError> {
        let callbacks = &self.emit_config.callbacks;
        let callback: &dyn crate::backend::x64::callback::Callback = match (is_write, width_index) {
            (false, 0) => &*callbacks.memory_read_8,
            (false, 1) => &*callbacks.memory_read_16,
            (false, 2) => &*callbacks.memory_read_32,
            (false, _) => &*callbacks.memory_read_64,
            (true, 0) => &*callbacks.memory_write_8,
            (true, 1) => &*callbacks.memory_write_16,
            (true, 2) => &*callbacks.memory_write_32,
            (true, _) => &*callbacks.memory_write_64,
        };

        let mut a = CodeAssembler::new(64).map_err(err)?;

        // Preserve every caller-saved register except RAX (the result).
        for reg in [rcx, rdx, rsi, rdi, r8, r9, r10, r11] {
            a.push(reg).map_err(err)?;
        }
        a.sub(rsp, 264).map_err(err)?;
        for (i, xmm) in crate::backend::x64::hostloc::XMM.iter().enumerate() {
            a.movups(xmmword_ptr(rsp + (i * 16) as i32), *xmm).map_err(err)?;
        }

        // Arguments arrive in RAX (vaddr) and RCX (store value) — but RCX
        // was just pushed, so reload it from the stack.
        if is_write {
            a.mov(rdx, qword_ptr(rsp + 264 + 7 * 8)).map_err(err)?;
        }
        callback
            .emit_call(&mut a, &mut |a, params| {
                a.mov(params[0].r64(), rax)?;
                if is_write {
                    a.mov(params[1].r64(), rdx)?;
                }
                Ok(())
            })
            .map_err(err)?;

        for (i, xmm) in crate::backend::x64::hostloc::XMM.iter().enumerate() {
            a.movups(*xmm, xmmword_ptr(rsp + (i * 16) as i32)).map_err(err)?;
        }
        a.add(rsp, 264).map_err(err)?;
        for reg in [r11, r10, r9, r8, rdi, rsi, rdx, rcx] {
            a.pop(reg).map_err(err)?;
        }
        a.ret().map_err(err)?;

        let region = self.code.commit(a)?;
        Ok(region.offset)
    }
}

fn err(e: iced_x86::IcedError) -> JitError {
    JitError::Assembler(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::callback::SimpleCallback;
    use crate::backend::x64::emit_context::EmitCallbacks;
    use crate::backend::x64::jit_state::A64JitState;

    extern "C" fn nop0() -> u64 {
        0
    }

    fn stub() -> Box<SimpleCallback> {
        Box::new(SimpleCallback::new(nop0 as usize as u64))
    }

    fn stub_callbacks() -> EmitCallbacks {
        EmitCallbacks {
            memory_read_8: stub(),
            memory_read_16: stub(),
            memory_read_32: stub(),
            memory_read_64: stub(),
            memory_write_8: stub(),
            memory_write_16: stub(),
            memory_write_32: stub(),
            memory_write_64: stub(),
            exclusive_read_8: stub(),
            exclusive_read_16: stub(),
            exclusive_read_32: stub(),
            exclusive_read_64: stub(),
            exclusive_write_8: stub(),
            exclusive_write_16: stub(),
            exclusive_write_32: stub(),
            exclusive_write_64: stub(),
            exclusive_clear: stub(),
            call_supervisor: stub(),
            exception_raised: stub(),
            interpreter_fallback: stub(),
        }
    }

    #[test]
    fn core_construction_generates_prelude() {
        let config = EmitConfig {
            callbacks: stub_callbacks(),
            enable_cycle_counting: true,
            page_table: None,
            fastmem: None,
            host_has_aes: false,
            host_has_sse42: false,
        };
        let run_callbacks = RunCodeCallbacks {
            lookup_block: stub(),
            add_ticks: stub(),
            get_ticks_remaining: stub(),
            enable_cycle_counting: true,
        };
        let core = JitCore::new(
            ArchKind::A64,
            A64JitState::info(),
            config,
            run_callbacks,
            OptimizationFlag::default(),
            false,
            4 * 1024 * 1024,
        )
        .unwrap();
        // Prelude, thunks and handlers all landed in the arena.
        assert!(core.code.cursor_offset() > 0);
    }
}
