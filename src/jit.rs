//! The embedder-facing JIT facades.
//!
//! Each facade owns the guest state, the compilation core, and the
//! embedder callbacks, and wires the generated dispatcher to the
//! callbacks through `extern "C"` trampolines that receive a stable
//! pointer to the boxed inner state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::x64::callback::ArgCallback;
use crate::backend::x64::core::JitCore;
use crate::backend::x64::block_of_code::RunCodeCallbacks;
use crate::backend::x64::emit_context::{ArchKind, EmitCallbacks, EmitConfig};
use crate::backend::x64::fastmem::FastmemConfig;
use crate::backend::x64::jit_state::{A32JitState, A64JitState};
use crate::config::{A32Config, A64Config, Coprocessor, Exception, JitError};
use crate::exclusive_monitor::ExclusiveMonitor;
use crate::frontend::a32::translate as a32_translate;
use crate::frontend::a64::translate as a64_translate;
use crate::halt_reason::HaltReason;
use crate::ir::location::{A32LocationDescriptor, A64LocationDescriptor};

fn detect_host_features() -> (bool, bool) {
    #[cfg(target_arch = "x86_64")]
    {
        (
            std::is_x86_feature_detected!("aes"),
            std::is_x86_feature_detected!("sse4.2"),
        )
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        (false, false)
    }
}

fn atomic_halt(halt: &u32) -> &AtomicU32 {
    // The dispatcher and emitted code access this field with plain
    // loads/stores; cross-thread halt requests go through atomics.
    unsafe { &*(halt as *const u32 as *const AtomicU32) }
}

// ===========================================================================
// A64
// ===========================================================================

struct A64Inner {
    state: A64JitState,
    core: Option<JitCore>,
    callbacks: Box<dyn crate::config::A64Callbacks>,
    monitor: Option<Arc<ExclusiveMonitor>>,
    processor_id: usize,
    is_executing: bool,
}

/// A JIT instance executing A64 guest code.
pub struct A64Jit {
    inner: Box<A64Inner>,
}

impl A64Jit {
    pub fn new(config: A64Config) -> Result<Self, JitError> {
        let (host_has_aes, host_has_sse42) = detect_host_features();
        if !host_has_sse42 && config.enable_fast_dispatch {
            log::debug!("fast dispatch disabled: host lacks SSE4.2");
        }

        let mut inner = Box::new(A64Inner {
            state: A64JitState::new(),
            core: None,
            callbacks: config.callbacks,
            monitor: config.global_monitor,
            processor_id: config.processor_id,
            is_executing: false,
        });
        let ctx = &mut *inner as *mut A64Inner as u64;

        let run_callbacks = RunCodeCallbacks {
            lookup_block: Box::new(ArgCallback::new(a64_lookup_block as usize as u64, ctx)),
            add_ticks: Box::new(ArgCallback::new(a64_add_ticks as usize as u64, ctx)),
            get_ticks_remaining: Box::new(ArgCallback::new(
                a64_get_ticks_remaining as usize as u64,
                ctx,
            )),
            enable_cycle_counting: config.enable_cycle_counting,
        };

        macro_rules! cb {
            ($f:ident) => {
                Box::new(ArgCallback::new($f as usize as u64, ctx))
            };
        }
        let emit_callbacks = EmitCallbacks {
            memory_read_8: cb!(a64_read_8),
            memory_read_16: cb!(a64_read_16),
            memory_read_32: cb!(a64_read_32),
            memory_read_64: cb!(a64_read_64),
            memory_write_8: cb!(a64_write_8),
            memory_write_16: cb!(a64_write_16),
            memory_write_32: cb!(a64_write_32),
            memory_write_64: cb!(a64_write_64),
            exclusive_read_8: cb!(a64_exclusive_read_8),
            exclusive_read_16: cb!(a64_exclusive_read_16),
            exclusive_read_32: cb!(a64_exclusive_read_32),
            exclusive_read_64: cb!(a64_exclusive_read_64),
            exclusive_write_8: cb!(a64_exclusive_write_8),
            exclusive_write_16: cb!(a64_exclusive_write_16),
            exclusive_write_32: cb!(a64_exclusive_write_32),
            exclusive_write_64: cb!(a64_exclusive_write_64),
            exclusive_clear: cb!(a64_exclusive_clear),
            call_supervisor: cb!(a64_call_supervisor),
            exception_raised: cb!(a64_exception_raised),
            interpreter_fallback: cb!(a64_interpreter_fallback),
        };

        let emit_config = EmitConfig {
            callbacks: emit_callbacks,
            enable_cycle_counting: config.enable_cycle_counting,
            page_table: config.page_table.map(|p| p as u64),
            fastmem: config
                .fastmem_pointer
                .filter(|_| config.optimizations.contains(crate::config::OptimizationFlag::FASTMEM))
                .map(|p| FastmemConfig { base: p as u64 }),
            host_has_aes,
            host_has_sse42,
        };

        let core = JitCore::new(
            ArchKind::A64,
            A64JitState::info(),
            emit_config,
            run_callbacks,
            config.optimizations,
            config.enable_fast_dispatch && host_has_sse42,
            config.code_cache_size,
        )?;
        inner.core = Some(core);

        Ok(Self { inner })
    }

    /// Execute until a halt is requested or the cycle budget runs out.
    pub fn run(&mut self) -> HaltReason {
        assert!(!self.inner.is_executing, "recursive JIT execution");
        self.inner.is_executing = true;

        let ctx = &mut *self.inner as *mut A64Inner as u64;
        let entry = a64_lookup_block(ctx);
        let run_fn = {
            let core = self.inner.core.as_mut().unwrap();
            unsafe { core.run_code_fn().expect("code protection") }
        };
        let bits = unsafe { run_fn(&mut self.inner.state as *mut _ as *mut u8, entry as *const u8) };

        self.inner.is_executing = false;
        HaltReason::from_bits_truncate(bits)
    }

    /// Execute one guest instruction.
    pub fn step(&mut self) -> HaltReason {
        assert!(!self.inner.is_executing, "recursive JIT execution");
        self.inner.is_executing = true;
        self.inner.state.single_stepping = true;
        atomic_halt(&self.inner.state.halt_reason).fetch_or(HaltReason::STEP.bits(), Ordering::Release);

        let ctx = &mut *self.inner as *mut A64Inner as u64;
        let entry = a64_lookup_block(ctx);
        let step_fn = {
            let core = self.inner.core.as_mut().unwrap();
            unsafe { core.step_code_fn().expect("code protection") }
        };
        let bits = unsafe { step_fn(&mut self.inner.state as *mut _ as *mut u8, entry as *const u8) };

        self.inner.state.single_stepping = false;
        self.inner.is_executing = false;
        HaltReason::from_bits_truncate(bits)
    }

    /// Request a stop from any thread.
    pub fn halt_execution(&self, reason: HaltReason) {
        atomic_halt(&self.inner.state.halt_reason).fetch_or(reason.bits(), Ordering::Release);
    }

    pub fn clear_halt(&self, reason: HaltReason) {
        atomic_halt(&self.inner.state.halt_reason).fetch_and(!reason.bits(), Ordering::Release);
    }

    // --- State accessors ---

    pub fn get_register(&self, index: usize) -> u64 {
        self.inner.state.reg[index]
    }

    pub fn set_register(&mut self, index: usize, value: u64) {
        self.inner.state.reg[index] = value;
    }

    pub fn get_sp(&self) -> u64 {
        self.inner.state.sp
    }

    pub fn set_sp(&mut self, value: u64) {
        self.inner.state.sp = value;
    }

    pub fn get_pc(&self) -> u64 {
        self.inner.state.pc
    }

    pub fn set_pc(&mut self, value: u64) {
        self.inner.state.pc = value;
    }

    pub fn pstate(&self) -> u32 {
        self.inner.state.pstate()
    }

    pub fn set_pstate(&mut self, value: u32) {
        self.inner.state.set_pstate(value);
    }

    pub fn get_vector(&self, index: usize) -> (u64, u64) {
        (self.inner.state.vec[index * 2], self.inner.state.vec[index * 2 + 1])
    }

    pub fn set_vector(&mut self, index: usize, lo: u64, hi: u64) {
        self.inner.state.vec[index * 2] = lo;
        self.inner.state.vec[index * 2 + 1] = hi;
    }

    pub fn fpcr(&self) -> u32 {
        self.inner.state.fpcr
    }

    pub fn set_fpcr(&mut self, value: u32) {
        self.inner.state.fpcr = value;
    }

    pub fn fpsr(&self) -> u32 {
        self.inner.state.fpsr()
    }

    pub fn set_fpsr(&mut self, value: u32) {
        self.inner.state.set_fpsr(value);
    }

    // --- Cache management ---

    pub fn clear_cache(&mut self) {
        let core = self.inner.core.as_mut().unwrap();
        core.code.enable_writing().expect("code protection");
        core.clear_cache();
    }

    pub fn invalidate_cache_range(&mut self, start: u64, length: u64) {
        let core = self.inner.core.as_mut().unwrap();
        core.code.enable_writing().expect("code protection");
        core.invalidate_range(start, length);
    }
}

// --- A64 trampolines -------------------------------------------------------

unsafe fn a64_inner<'a>(ctx: u64) -> &'a mut A64Inner {
    unsafe { &mut *(ctx as *mut A64Inner) }
}

extern "C" fn a64_lookup_block(ctx: u64) -> u64 {
    let inner = unsafe { a64_inner(ctx) };
    let location = inner.state.current_location();

    let core = inner.core.as_mut().unwrap();
    core.code.enable_writing().expect("code protection");

    let callbacks = &inner.callbacks;
    let single_stepping = inner.state.single_stepping;
    let entry = core.get_or_compile(location, || {
        let tctx = a64_translate::TranslateContext { single_stepping };
        a64_translate::translate(
            A64LocationDescriptor::from_location(location),
            &|vaddr| callbacks.memory_read_code(vaddr),
            &tctx,
        )
    });
    core.code.disable_writing().expect("code protection");
    entry as u64
}

extern "C" fn a64_add_ticks(ctx: u64, ticks: u64) {
    let inner = unsafe { a64_inner(ctx) };
    inner.callbacks.add_ticks(ticks);
}

extern "C" fn a64_get_ticks_remaining(ctx: u64) -> u64 {
    let inner = unsafe { a64_inner(ctx) };
    inner.callbacks.get_ticks_remaining()
}

macro_rules! a64_read {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(ctx: u64, vaddr: u64) -> u64 {
            let inner = unsafe { a64_inner(ctx) };
            inner.callbacks.$method(vaddr) as u64
        }
    };
}
a64_read!(a64_read_8, memory_read_8);
a64_read!(a64_read_16, memory_read_16);
a64_read!(a64_read_32, memory_read_32);
a64_read!(a64_read_64, memory_read_64);

macro_rules! a64_write {
    ($name:ident, $method:ident, $ty:ty) => {
        extern "C" fn $name(ctx: u64, vaddr: u64, value: u64) {
            let inner = unsafe { a64_inner(ctx) };
            if let Some(monitor) = &inner.monitor {
                monitor.clear_exclusive_address(vaddr);
            }
            inner.callbacks.$method(vaddr, value as $ty);
        }
    };
}
a64_write!(a64_write_8, memory_write_8, u8);
a64_write!(a64_write_16, memory_write_16, u16);
a64_write!(a64_write_32, memory_write_32, u32);
a64_write!(a64_write_64, memory_write_64, u64);

macro_rules! a64_exclusive_read {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(ctx: u64, vaddr: u64) -> u64 {
            let inner = unsafe { a64_inner(ctx) };
            match &inner.monitor {
                Some(monitor) => {
                    let callbacks = &inner.callbacks;
                    monitor.read_and_mark(inner.processor_id, vaddr, || callbacks.$method(vaddr))
                        as u64
                }
                None => inner.callbacks.$method(vaddr) as u64,
            }
        }
    };
}
a64_exclusive_read!(a64_exclusive_read_8, memory_read_8);
a64_exclusive_read!(a64_exclusive_read_16, memory_read_16);
a64_exclusive_read!(a64_exclusive_read_32, memory_read_32);
a64_exclusive_read!(a64_exclusive_read_64, memory_read_64);

macro_rules! a64_exclusive_write {
    ($name:ident, $method:ident, $ty:ty) => {
        /// Returns 0 on success, 1 on a lost reservation.
        extern "C" fn $name(ctx: u64, vaddr: u64, value: u64) -> u64 {
            let inner = unsafe { a64_inner(ctx) };
            match &inner.monitor {
                Some(monitor) => {
                    let callbacks = &mut inner.callbacks;
                    let ok = monitor.do_exclusive_operation(inner.processor_id, vaddr, |_| {
                        callbacks.$method(vaddr, value as $ty);
                    });
                    if ok { 0 } else { 1 }
                }
                None => {
                    inner.callbacks.$method(vaddr, value as $ty);
                    0
                }
            }
        }
    };
}
a64_exclusive_write!(a64_exclusive_write_8, memory_write_8, u8);
a64_exclusive_write!(a64_exclusive_write_16, memory_write_16, u16);
a64_exclusive_write!(a64_exclusive_write_32, memory_write_32, u32);
a64_exclusive_write!(a64_exclusive_write_64, memory_write_64, u64);

extern "C" fn a64_exclusive_clear(ctx: u64) {
    let inner = unsafe { a64_inner(ctx) };
    if let Some(monitor) = &inner.monitor {
        monitor.clear_processor(inner.processor_id);
    }
}

extern "C" fn a64_call_supervisor(ctx: u64, imm: u64) {
    let inner = unsafe { a64_inner(ctx) };
    inner.callbacks.call_supervisor(imm as u32);
}

extern "C" fn a64_exception_raised(ctx: u64, pc: u64, exception: u64) {
    let inner = unsafe { a64_inner(ctx) };
    inner.callbacks.exception_raised(pc, exception);
}

extern "C" fn a64_interpreter_fallback(_ctx: u64, _pc: u64, _num: u64) {
    // The A64 frontend never emits Interpret terminals.
}

// ===========================================================================
// A32
// ===========================================================================

struct A32Inner {
    state: A32JitState,
    core: Option<JitCore>,
    callbacks: Box<dyn crate::config::A32Callbacks>,
    coprocessors: [Option<Box<dyn Coprocessor>>; 16],
    monitor: Option<Arc<ExclusiveMonitor>>,
    processor_id: usize,
    is_executing: bool,
}

/// A JIT instance executing A32 (ARM/Thumb) guest code.
pub struct A32Jit {
    inner: Box<A32Inner>,
}

impl A32Jit {
    pub fn new(config: A32Config) -> Result<Self, JitError> {
        let (host_has_aes, host_has_sse42) = detect_host_features();

        let mut inner = Box::new(A32Inner {
            state: A32JitState::new(),
            core: None,
            callbacks: config.callbacks,
            coprocessors: config.coprocessors,
            monitor: config.global_monitor,
            processor_id: config.processor_id,
            is_executing: false,
        });
        let ctx = &mut *inner as *mut A32Inner as u64;

        let run_callbacks = RunCodeCallbacks {
            lookup_block: Box::new(ArgCallback::new(a32_lookup_block as usize as u64, ctx)),
            add_ticks: Box::new(ArgCallback::new(a32_add_ticks as usize as u64, ctx)),
            get_ticks_remaining: Box::new(ArgCallback::new(
                a32_get_ticks_remaining as usize as u64,
                ctx,
            )),
            enable_cycle_counting: config.enable_cycle_counting,
        };

        macro_rules! cb {
            ($f:ident) => {
                Box::new(ArgCallback::new($f as usize as u64, ctx))
            };
        }
        let emit_callbacks = EmitCallbacks {
            memory_read_8: cb!(a32_read_8),
            memory_read_16: cb!(a32_read_16),
            memory_read_32: cb!(a32_read_32),
            memory_read_64: cb!(a32_read_64),
            memory_write_8: cb!(a32_write_8),
            memory_write_16: cb!(a32_write_16),
            memory_write_32: cb!(a32_write_32),
            memory_write_64: cb!(a32_write_64),
            exclusive_read_8: cb!(a32_exclusive_read_8),
            exclusive_read_16: cb!(a32_exclusive_read_16),
            exclusive_read_32: cb!(a32_exclusive_read_32),
            exclusive_read_64: cb!(a32_exclusive_read_64),
            exclusive_write_8: cb!(a32_exclusive_write_8),
            exclusive_write_16: cb!(a32_exclusive_write_16),
            exclusive_write_32: cb!(a32_exclusive_write_32),
            exclusive_write_64: cb!(a32_exclusive_write_64),
            exclusive_clear: cb!(a32_exclusive_clear),
            call_supervisor: cb!(a32_call_supervisor),
            exception_raised: cb!(a32_exception_raised),
            interpreter_fallback: cb!(a32_interpreter_fallback),
        };

        let emit_config = EmitConfig {
            callbacks: emit_callbacks,
            enable_cycle_counting: config.enable_cycle_counting,
            page_table: config.page_table.map(|p| p as u64),
            fastmem: config
                .fastmem_pointer
                .filter(|_| config.optimizations.contains(crate::config::OptimizationFlag::FASTMEM))
                .map(|p| FastmemConfig { base: p as u64 }),
            host_has_aes,
            host_has_sse42,
        };

        let core = JitCore::new(
            ArchKind::A32,
            A32JitState::info(),
            emit_config,
            run_callbacks,
            config.optimizations,
            config.enable_fast_dispatch && host_has_sse42,
            config.code_cache_size,
        )?;
        inner.core = Some(core);

        Ok(Self { inner })
    }

    pub fn run(&mut self) -> HaltReason {
        assert!(!self.inner.is_executing, "recursive JIT execution");
        self.inner.is_executing = true;

        let ctx = &mut *self.inner as *mut A32Inner as u64;
        let entry = a32_lookup_block(ctx);
        let run_fn = {
            let core = self.inner.core.as_mut().unwrap();
            unsafe { core.run_code_fn().expect("code protection") }
        };
        let bits = unsafe { run_fn(&mut self.inner.state as *mut _ as *mut u8, entry as *const u8) };

        self.inner.is_executing = false;
        HaltReason::from_bits_truncate(bits)
    }

    pub fn step(&mut self) -> HaltReason {
        assert!(!self.inner.is_executing, "recursive JIT execution");
        self.inner.is_executing = true;
        self.inner.state.set_single_stepping(true);
        atomic_halt(&self.inner.state.halt_reason).fetch_or(HaltReason::STEP.bits(), Ordering::Release);

        let ctx = &mut *self.inner as *mut A32Inner as u64;
        let entry = a32_lookup_block(ctx);
        let step_fn = {
            let core = self.inner.core.as_mut().unwrap();
            unsafe { core.step_code_fn().expect("code protection") }
        };
        let bits = unsafe { step_fn(&mut self.inner.state as *mut _ as *mut u8, entry as *const u8) };

        self.inner.state.set_single_stepping(false);
        self.inner.is_executing = false;
        HaltReason::from_bits_truncate(bits)
    }

    pub fn halt_execution(&self, reason: HaltReason) {
        atomic_halt(&self.inner.state.halt_reason).fetch_or(reason.bits(), Ordering::Release);
    }

    pub fn clear_halt(&self, reason: HaltReason) {
        atomic_halt(&self.inner.state.halt_reason).fetch_and(!reason.bits(), Ordering::Release);
    }

    // --- State accessors ---

    pub fn regs(&self) -> &[u32; 16] {
        &self.inner.state.regs
    }

    pub fn regs_mut(&mut self) -> &mut [u32; 16] {
        &mut self.inner.state.regs
    }

    pub fn ext_regs(&self) -> &[u32; 64] {
        &self.inner.state.ext_regs
    }

    pub fn ext_regs_mut(&mut self) -> &mut [u32; 64] {
        &mut self.inner.state.ext_regs
    }

    pub fn cpsr(&self) -> u32 {
        self.inner.state.cpsr()
    }

    pub fn set_cpsr(&mut self, value: u32) {
        self.inner.state.set_cpsr(value);
    }

    pub fn fpscr(&self) -> u32 {
        self.inner.state.fpscr()
    }

    pub fn set_fpscr(&mut self, value: u32) {
        self.inner.state.set_fpscr(value);
    }

    // --- Cache management ---

    pub fn clear_cache(&mut self) {
        let core = self.inner.core.as_mut().unwrap();
        core.code.enable_writing().expect("code protection");
        core.clear_cache();
    }

    pub fn invalidate_cache_range(&mut self, start: u32, length: u32) {
        let core = self.inner.core.as_mut().unwrap();
        core.code.enable_writing().expect("code protection");
        core.invalidate_range(start as u64, length as u64);
    }
}

// --- A32 trampolines -------------------------------------------------------

unsafe fn a32_inner<'a>(ctx: u64) -> &'a mut A32Inner {
    unsafe { &mut *(ctx as *mut A32Inner) }
}

extern "C" fn a32_lookup_block(ctx: u64) -> u64 {
    let inner = unsafe { a32_inner(ctx) };
    let location = inner.state.current_location();

    // Split borrows: the core compiles while the translate closure reads
    // code and consults coprocessors.
    let inner_ptr = inner as *mut A32Inner;
    let core = inner.core.as_mut().unwrap();
    core.code.enable_writing().expect("code protection");

    let entry = core.get_or_compile(location, || {
        let inner = unsafe { &mut *inner_ptr };
        let mut tctx = a32_translate::TranslateContext {
            coprocessors: &mut inner.coprocessors,
            single_stepping: A32LocationDescriptor::from_location(location).single_stepping(),
        };
        a32_translate::translate(
            A32LocationDescriptor::from_location(location),
            &|vaddr| inner.callbacks.memory_read_code(vaddr),
            &mut tctx,
        )
    });
    core.code.disable_writing().expect("code protection");
    entry as u64
}

extern "C" fn a32_add_ticks(ctx: u64, ticks: u64) {
    let inner = unsafe { a32_inner(ctx) };
    inner.callbacks.add_ticks(ticks);
}

extern "C" fn a32_get_ticks_remaining(ctx: u64) -> u64 {
    let inner = unsafe { a32_inner(ctx) };
    inner.callbacks.get_ticks_remaining()
}

macro_rules! a32_read {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(ctx: u64, vaddr: u64) -> u64 {
            let inner = unsafe { a32_inner(ctx) };
            inner.callbacks.$method(vaddr as u32) as u64
        }
    };
}
a32_read!(a32_read_8, memory_read_8);
a32_read!(a32_read_16, memory_read_16);
a32_read!(a32_read_32, memory_read_32);
a32_read!(a32_read_64, memory_read_64);

macro_rules! a32_write {
    ($name:ident, $method:ident, $ty:ty) => {
        extern "C" fn $name(ctx: u64, vaddr: u64, value: u64) {
            let inner = unsafe { a32_inner(ctx) };
            if let Some(monitor) = &inner.monitor {
                monitor.clear_exclusive_address(vaddr);
            }
            inner.callbacks.$method(vaddr as u32, value as $ty);
        }
    };
}
a32_write!(a32_write_8, memory_write_8, u8);
a32_write!(a32_write_16, memory_write_16, u16);
a32_write!(a32_write_32, memory_write_32, u32);
a32_write!(a32_write_64, memory_write_64, u64);

macro_rules! a32_exclusive_read {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(ctx: u64, vaddr: u64) -> u64 {
            let inner = unsafe { a32_inner(ctx) };
            match &inner.monitor {
                Some(monitor) => {
                    let callbacks = &inner.callbacks;
                    monitor
                        .read_and_mark(inner.processor_id, vaddr, || callbacks.$method(vaddr as u32))
                        as u64
                }
                None => inner.callbacks.$method(vaddr as u32) as u64,
            }
        }
    };
}
a32_exclusive_read!(a32_exclusive_read_8, memory_read_8);
a32_exclusive_read!(a32_exclusive_read_16, memory_read_16);
a32_exclusive_read!(a32_exclusive_read_32, memory_read_32);
a32_exclusive_read!(a32_exclusive_read_64, memory_read_64);

macro_rules! a32_exclusive_write {
    ($name:ident, $method:ident, $ty:ty) => {
        extern "C" fn $name(ctx: u64, vaddr: u64, value: u64) -> u64 {
            let inner = unsafe { a32_inner(ctx) };
            match &inner.monitor {
                Some(monitor) => {
                    let callbacks = &mut inner.callbacks;
                    let ok = monitor.do_exclusive_operation(inner.processor_id, vaddr, |_| {
                        callbacks.$method(vaddr as u32, value as $ty);
                    });
                    if ok { 0 } else { 1 }
                }
                None => {
                    inner.callbacks.$method(vaddr as u32, value as $ty);
                    0
                }
            }
        }
    };
}
a32_exclusive_write!(a32_exclusive_write_8, memory_write_8, u8);
a32_exclusive_write!(a32_exclusive_write_16, memory_write_16, u16);
a32_exclusive_write!(a32_exclusive_write_32, memory_write_32, u32);
a32_exclusive_write!(a32_exclusive_write_64, memory_write_64, u64);

extern "C" fn a32_exclusive_clear(ctx: u64) {
    let inner = unsafe { a32_inner(ctx) };
    if let Some(monitor) = &inner.monitor {
        monitor.clear_processor(inner.processor_id);
    }
}

extern "C" fn a32_call_supervisor(ctx: u64, imm: u64) {
    let inner = unsafe { a32_inner(ctx) };
    inner.callbacks.call_supervisor(imm as u32);
}

extern "C" fn a32_exception_raised(ctx: u64, pc: u64, exception: u64) {
    let inner = unsafe { a32_inner(ctx) };
    inner.callbacks.exception_raised(pc as u32, Exception::from_u64(exception));
}

extern "C" fn a32_interpreter_fallback(ctx: u64, pc: u64, num: u64) {
    let inner = unsafe { a32_inner(ctx) };
    inner.callbacks.interpreter_fallback(pc as u32, num as usize);
}

// ===========================================================================
// End-to-end tests
// ===========================================================================

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::config::{A32Callbacks, A64Callbacks};

    struct Env {
        memory: Vec<u8>,
        base: u64,
        ticks: u64,
        svcs: Vec<u32>,
    }

    impl Env {
        fn new(base: u64, words: &[u32]) -> Self {
            let mut memory = vec![0u8; 0x10000];
            for (i, word) in words.iter().enumerate() {
                memory[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            Self { memory, base, ticks: 10_000, svcs: Vec::new() }
        }

        fn offset(&self, vaddr: u64) -> Option<usize> {
            let off = vaddr.wrapping_sub(self.base) as usize;
            if off < self.memory.len() { Some(off) } else { None }
        }

        fn read<const N: usize>(&self, vaddr: u64) -> [u8; N] {
            match self.offset(vaddr) {
                Some(off) if off + N <= self.memory.len() => {
                    self.memory[off..off + N].try_into().unwrap()
                }
                _ => [0; N],
            }
        }

        fn write(&mut self, vaddr: u64, bytes: &[u8]) {
            if let Some(off) = self.offset(vaddr) {
                if off + bytes.len() <= self.memory.len() {
                    self.memory[off..off + bytes.len()].copy_from_slice(bytes);
                }
            }
        }
    }

    impl A64Callbacks for Env {
        fn memory_read_code(&self, vaddr: u64) -> Option<u32> {
            self.offset(vaddr)?;
            Some(u32::from_le_bytes(self.read::<4>(vaddr)))
        }
        fn memory_read_8(&self, vaddr: u64) -> u8 {
            self.read::<1>(vaddr)[0]
        }
        fn memory_read_16(&self, vaddr: u64) -> u16 {
            u16::from_le_bytes(self.read::<2>(vaddr))
        }
        fn memory_read_32(&self, vaddr: u64) -> u32 {
            u32::from_le_bytes(self.read::<4>(vaddr))
        }
        fn memory_read_64(&self, vaddr: u64) -> u64 {
            u64::from_le_bytes(self.read::<8>(vaddr))
        }
        fn memory_write_8(&mut self, vaddr: u64, value: u8) {
            self.write(vaddr, &[value]);
        }
        fn memory_write_16(&mut self, vaddr: u64, value: u16) {
            self.write(vaddr, &value.to_le_bytes());
        }
        fn memory_write_32(&mut self, vaddr: u64, value: u32) {
            self.write(vaddr, &value.to_le_bytes());
        }
        fn memory_write_64(&mut self, vaddr: u64, value: u64) {
            self.write(vaddr, &value.to_le_bytes());
        }
        fn call_supervisor(&mut self, swi: u32) {
            self.svcs.push(swi);
        }
        fn exception_raised(&mut self, _pc: u64, _exception: u64) {}
        fn add_ticks(&mut self, ticks: u64) {
            self.ticks = self.ticks.saturating_sub(ticks);
        }
        fn get_ticks_remaining(&self) -> u64 {
            self.ticks
        }
    }

    impl A32Callbacks for Env {
        fn memory_read_code(&self, vaddr: u32) -> Option<u32> {
            A64Callbacks::memory_read_code(self, vaddr as u64)
        }
        fn memory_read_8(&self, vaddr: u32) -> u8 {
            A64Callbacks::memory_read_8(self, vaddr as u64)
        }
        fn memory_read_16(&self, vaddr: u32) -> u16 {
            A64Callbacks::memory_read_16(self, vaddr as u64)
        }
        fn memory_read_32(&self, vaddr: u32) -> u32 {
            A64Callbacks::memory_read_32(self, vaddr as u64)
        }
        fn memory_read_64(&self, vaddr: u32) -> u64 {
            A64Callbacks::memory_read_64(self, vaddr as u64)
        }
        fn memory_write_8(&mut self, vaddr: u32, value: u8) {
            A64Callbacks::memory_write_8(self, vaddr as u64, value)
        }
        fn memory_write_16(&mut self, vaddr: u32, value: u16) {
            A64Callbacks::memory_write_16(self, vaddr as u64, value)
        }
        fn memory_write_32(&mut self, vaddr: u32, value: u32) {
            A64Callbacks::memory_write_32(self, vaddr as u64, value)
        }
        fn memory_write_64(&mut self, vaddr: u32, value: u64) {
            A64Callbacks::memory_write_64(self, vaddr as u64, value)
        }
        fn call_supervisor(&mut self, swi: u32) {
            self.svcs.push(swi);
        }
        fn exception_raised(&mut self, _pc: u32, _exception: Exception) {}
        fn add_ticks(&mut self, ticks: u64) {
            A64Callbacks::add_ticks(self, ticks)
        }
        fn get_ticks_remaining(&self) -> u64 {
            A64Callbacks::get_ticks_remaining(self)
        }
    }

    fn a32_jit(words: &[u32]) -> A32Jit {
        let mut config = A32Config::new(Box::new(Env::new(0, words)));
        config.code_cache_size = 4 * 1024 * 1024;
        A32Jit::new(config).unwrap()
    }

    fn a64_jit(words: &[u32]) -> A64Jit {
        let mut config = A64Config::new(Box::new(Env::new(0, words)));
        config.code_cache_size = 4 * 1024 * 1024;
        A64Jit::new(config).unwrap()
    }

    #[test]
    fn a32_mov_add_bx_lr() {
        // MOV R0, #1; ADD R0, R0, #2; BX LR (LR = 0 halts at an
        // undefined word, which raises and returns).
        let mut jit = a32_jit(&[0xE3A0_0001, 0xE280_0002, 0xE12F_FF1E]);
        jit.regs_mut()[14] = 0x2_0000; // Unmapped: the run winds down there.
        jit.regs_mut()[15] = 0;
        let _ = jit.run();
        assert_eq!(jit.regs()[0], 3);
        assert_eq!(jit.regs()[15], 0x2_0000);
        // BX to an even address stays in ARM state.
        assert_eq!(jit.cpsr() & (1 << 5), 0);
    }

    #[test]
    fn a32_qadd_saturates_and_sets_q() {
        // QADD R0, R1, R2 with R1 = 0x7FFFFFFF, R2 = 1.
        let mut jit = a32_jit(&[0xE102_0051, 0xE12F_FF1E]);
        jit.regs_mut()[1] = 0x7FFF_FFFF;
        jit.regs_mut()[2] = 1;
        jit.regs_mut()[14] = 0x2_0000;
        let _ = jit.run();
        assert_eq!(jit.regs()[0], 0x7FFF_FFFF);
        assert_ne!(jit.cpsr() & (1 << 27), 0, "Q flag must be set");
    }

    #[test]
    fn a64_add_wraps_unsigned() {
        // ADD X0, X1, X2 with X1 = u64::MAX, X2 = 1; RET to X30 = out of
        // code.
        let mut jit = a64_jit(&[0x8B02_0020, 0xD65F_03C0]);
        jit.set_register(1, u64::MAX);
        jit.set_register(2, 1);
        jit.set_register(30, 0x2_0000);
        jit.set_pc(0);
        let _ = jit.run();
        assert_eq!(jit.get_register(0), 0);
        assert_eq!(jit.get_pc(), 0x2_0000);
        // Non-flag-setting form: PSTATE stays clear.
        assert_eq!(jit.pstate(), 0);
    }

    #[test]
    fn a64_svc_reports_to_embedder() {
        // MOVZ X0, #7; SVC #0x42
        let mut jit = a64_jit(&[0xD280_00E0, 0xD400_0841]);
        jit.set_pc(0);
        jit.set_register(30, 0x2_0000);
        let _ = jit.run();
        assert_eq!(jit.get_register(0), 7);
    }

    #[test]
    fn a32_invalidation_recompiles_modified_code() {
        // MOV R0, #1; BX LR — then patch the MOV to MOV R0, #5.
        let mut jit = a32_jit(&[0xE3A0_0001, 0xE12F_FF1E]);
        jit.regs_mut()[14] = 0x2_0000;
        let _ = jit.run();
        assert_eq!(jit.regs()[0], 1);

        // Guest writes new code; the embedder reports the write.
        {
            let inner = &mut jit.inner;
            let env: &mut Env = unsafe {
                &mut *(&mut *inner.callbacks as *mut dyn A32Callbacks as *mut Env)
            };
            env.write(0, &0xE3A0_0005u32.to_le_bytes());
        }
        jit.invalidate_cache_range(0, 4);

        jit.regs_mut()[15] = 0;
        let _ = jit.run();
        assert_eq!(jit.regs()[0], 5);
    }

    #[test]
    fn a64_link_block_fast_path_executes_chain() {
        // B +8; (skipped MOVZ X0,#9); MOVZ X0, #3; RET
        let mut jit = a64_jit(&[0x1400_0002, 0xD280_0120, 0xD280_0060, 0xD65F_03C0]);
        jit.set_register(30, 0x2_0000);
        jit.set_pc(0);
        let _ = jit.run();
        assert_eq!(jit.get_register(0), 3);
        // Run again through the now-warm cache and patched links.
        jit.set_pc(0);
        jit.set_register(0, 0);
        let _ = jit.run();
        assert_eq!(jit.get_register(0), 3);
    }
}
