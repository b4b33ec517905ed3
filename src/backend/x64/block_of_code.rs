use std::io;
use std::ptr;

use iced_x86::code_asm::*;
use iced_x86::{BlockEncoderOptions, IcedError};

use crate::backend::x64::callback::Callback;
use crate::backend::x64::jit_state::JitStateInfo;
use crate::backend::x64::stack_layout::StackLayout;
use crate::config::JitError;

/// Default code cache size (128 MiB).
pub const DEFAULT_CODE_CACHE_SIZE: usize = 128 * 1024 * 1024;

/// Fixed sizes of the raw-byte link slots. Patching rewrites exactly
/// these bytes; unpatching restores NOP fill.
pub const PATCH_JG_SIZE: usize = 6; // 0F 8F rel32
pub const PATCH_JMP_SIZE: usize = 5; // E9 rel32
pub const PATCH_MOV_RCX_SIZE: usize = 10; // 48 B9 imm64

/// Signature of the generated `run_code` entry:
/// `(jit_state, entrypoint) -> halt reason bits`.
pub type RunCodeFn = unsafe extern "sysv64" fn(*mut u8, *const u8) -> u32;

/// Host callbacks wired into the dispatcher loop.
pub struct RunCodeCallbacks {
    /// Returns the host code pointer for the current guest state in RAX.
    pub lookup_block: Box<dyn Callback>,
    /// `(ticks)` consumed by the ending run slice.
    pub add_ticks: Box<dyn Callback>,
    /// Returns the tick budget for the next run slice in RAX.
    pub get_ticks_remaining: Box<dyn Callback>,
    pub enable_cycle_counting: bool,
}

/// Offsets of the dispatcher entry/exit points within the arena.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherLabels {
    pub run_code: usize,
    /// Like `run_code` but without the pre-entry halt check, so a
    /// single-step request (which pre-sets a halt bit) still executes
    /// its one instruction.
    pub step_code: usize,
    /// Re-dispatch: check halt and budget, look up the next block, jump.
    pub return_from_run_code: usize,
    /// Force return to the host (restores MXCSR, reports halt bits).
    pub force_return_from_run_code: usize,
}

// ---------------------------------------------------------------------------
// The mmap'd arena
// ---------------------------------------------------------------------------

struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
}

// The buffer owns its mapping exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    fn new(size: usize) -> io::Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let size = (size + page - 1) & !(page - 1);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { ptr: ptr as *mut u8, size, offset: 0 })
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.size, "code cache overflow");
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

// ---------------------------------------------------------------------------
// BlockOfCode
// ---------------------------------------------------------------------------

/// Owns the host code arena. Blocks are assembled into a scratch
/// [`CodeAssembler`] pinned at the arena cursor and committed as bytes;
/// link sites are later rewritten in place through the patch methods.
///
/// The mapping is either writable or executable, never both
/// (`enable_writing` / `disable_writing`).
pub struct BlockOfCode {
    buffer: CodeBuffer,
    writable: bool,
    /// Where compiled blocks start; `clear_cache` resets to this.
    code_begin_offset: usize,
    pub jsi: JitStateInfo,
}

impl BlockOfCode {
    pub fn new(total_size: usize, jsi: JitStateInfo) -> Result<Self, JitError> {
        let size = if total_size == 0 { DEFAULT_CODE_CACHE_SIZE } else { total_size };
        Ok(Self {
            buffer: CodeBuffer::new(size)?,
            writable: true,
            code_begin_offset: 0,
            jsi,
        })
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.buffer.ptr
    }

    pub fn base_address(&self) -> u64 {
        self.buffer.ptr as u64
    }

    pub fn cursor_offset(&self) -> usize {
        self.buffer.offset
    }

    pub fn cursor_address(&self) -> u64 {
        self.base_address() + self.buffer.offset as u64
    }

    pub fn space_remaining(&self) -> usize {
        self.buffer.size - self.buffer.offset
    }

    pub fn mark_prelude_complete(&mut self) {
        self.code_begin_offset = self.buffer.offset;
    }

    /// Drop every compiled block, keeping the prelude.
    pub fn clear_cache(&mut self) {
        self.buffer.offset = self.code_begin_offset;
    }

    pub fn enable_writing(&mut self) -> Result<(), JitError> {
        if !self.writable {
            self.buffer.protect(libc::PROT_READ | libc::PROT_WRITE)?;
            self.writable = true;
        }
        Ok(())
    }

    pub fn disable_writing(&mut self) -> Result<(), JitError> {
        if self.writable {
            self.buffer.protect(libc::PROT_READ | libc::PROT_EXEC)?;
            self.writable = false;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Assembling
    // -------------------------------------------------------------------

    /// Assemble `asm` at the current cursor and append the bytes.
    /// Returns the region offset/size and the assembler result (which
    /// resolves labels to addresses).
    pub fn commit(
        &mut self,
        mut asm: CodeAssembler,
    ) -> Result<CommittedRegion, JitError> {
        assert!(self.writable, "commit requires a writable arena");
        let rip = self.cursor_address();
        let result = asm
            .assemble_options(rip, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
            .map_err(|e: IcedError| JitError::Assembler(e.to_string()))?;
        let bytes = &result.inner.code_buffer;
        let offset = self.buffer.offset;
        self.buffer.write_bytes(offset, bytes);
        self.buffer.offset += bytes.len();
        Ok(CommittedRegion { offset, size: bytes.len(), base: rip, result })
    }

    // -------------------------------------------------------------------
    // Raw patch slots
    // -------------------------------------------------------------------

    /// `jg rel32` to an absolute target.
    pub fn patch_jg(&mut self, offset: usize, target: u64) {
        let disp = self.rel32(offset, PATCH_JG_SIZE, target);
        let mut bytes = [0x0Fu8, 0x8F, 0, 0, 0, 0];
        bytes[2..].copy_from_slice(&disp.to_le_bytes());
        self.buffer.write_bytes(offset, &bytes);
    }

    /// `jz rel32` to an absolute target.
    pub fn patch_jz(&mut self, offset: usize, target: u64) {
        let disp = self.rel32(offset, PATCH_JG_SIZE, target);
        let mut bytes = [0x0Fu8, 0x84, 0, 0, 0, 0];
        bytes[2..].copy_from_slice(&disp.to_le_bytes());
        self.buffer.write_bytes(offset, &bytes);
    }

    /// `jmp rel32` to an absolute target.
    pub fn patch_jmp(&mut self, offset: usize, target: u64) {
        let disp = self.rel32(offset, PATCH_JMP_SIZE, target);
        let mut bytes = [0xE9u8, 0, 0, 0, 0];
        bytes[1..].copy_from_slice(&disp.to_le_bytes());
        self.buffer.write_bytes(offset, &bytes);
    }

    /// `mov rcx, imm64` (RSB code pointer slots).
    pub fn patch_mov_rcx(&mut self, offset: usize, value: u64) {
        let mut bytes = [0x48u8, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[2..].copy_from_slice(&value.to_le_bytes());
        self.buffer.write_bytes(offset, &bytes);
    }

    /// Restore a slot to NOP fill (the unpatched state).
    pub fn unpatch(&mut self, offset: usize, len: usize) {
        let nops = [0x90u8; PATCH_MOV_RCX_SIZE];
        self.buffer.write_bytes(offset, &nops[..len]);
    }

    fn rel32(&self, offset: usize, insn_len: usize, target: u64) -> i32 {
        let next = self.base_address() + (offset + insn_len) as u64;
        let disp = target.wrapping_sub(next) as i64;
        assert!(
            (i32::MIN as i64..=i32::MAX as i64).contains(&disp),
            "patch target out of rel32 range"
        );
        disp as i32
    }

    // -------------------------------------------------------------------
    // Dispatcher prelude
    // -------------------------------------------------------------------

    /// Emit the `run_code` entry and the `return_from_run_code` exits.
    /// Must run before any block is compiled.
    pub fn gen_run_code(&mut self, cb: &RunCodeCallbacks) -> Result<DispatcherLabels, JitError> {
        assert_eq!(self.code_begin_offset, 0, "prelude already generated");

        let frame = frame_size();
        let halt = self.jsi.offset_of_halt_reason as i32;
        let mxcsr = self.jsi.offset_of_guest_mxcsr as i32;
        let remaining = StackLayout::cycles_remaining_offset() as i32;
        let to_run = StackLayout::cycles_to_run_offset() as i32;
        let host_mxcsr = StackLayout::save_host_mxcsr_offset() as i32;

        let mut a = CodeAssembler::new(64).map_err(iced_err)?;
        let mut lbl_rfrc = a.create_label();
        let mut lbl_force = a.create_label();
        let mut lbl_return_only = a.create_label();

        // --- run_code entry ---
        a.push(rbx).map_err(iced_err)?;
        a.push(rbp).map_err(iced_err)?;
        a.push(r12).map_err(iced_err)?;
        a.push(r13).map_err(iced_err)?;
        a.push(r14).map_err(iced_err)?;
        a.push(r15).map_err(iced_err)?;
        a.sub(rsp, frame as i32).map_err(iced_err)?;

        a.mov(r15, rdi).map_err(iced_err)?;
        a.mov(rbx, rsi).map_err(iced_err)?;

        if cb.enable_cycle_counting {
            cb.get_ticks_remaining.emit_call_simple(&mut a).map_err(iced_err)?;
            a.mov(qword_ptr(rsp + to_run), rax).map_err(iced_err)?;
            a.mov(qword_ptr(rsp + remaining), rax).map_err(iced_err)?;
        }

        a.cmp(dword_ptr(r15 + halt), 0).map_err(iced_err)?;
        a.jne(lbl_return_only).map_err(iced_err)?;

        a.stmxcsr(dword_ptr(rsp + host_mxcsr)).map_err(iced_err)?;
        a.ldmxcsr(dword_ptr(r15 + mxcsr)).map_err(iced_err)?;
        a.jmp(rbx).map_err(iced_err)?;

        // --- step_code entry: no pre-entry halt check ---
        let mut lbl_step = a.create_label();
        a.set_label(&mut lbl_step).map_err(iced_err)?;
        a.push(rbx).map_err(iced_err)?;
        a.push(rbp).map_err(iced_err)?;
        a.push(r12).map_err(iced_err)?;
        a.push(r13).map_err(iced_err)?;
        a.push(r14).map_err(iced_err)?;
        a.push(r15).map_err(iced_err)?;
        a.sub(rsp, frame as i32).map_err(iced_err)?;
        a.mov(r15, rdi).map_err(iced_err)?;
        a.mov(rbx, rsi).map_err(iced_err)?;
        if cb.enable_cycle_counting {
            cb.get_ticks_remaining.emit_call_simple(&mut a).map_err(iced_err)?;
            a.mov(qword_ptr(rsp + to_run), rax).map_err(iced_err)?;
            a.mov(qword_ptr(rsp + remaining), rax).map_err(iced_err)?;
        }
        a.stmxcsr(dword_ptr(rsp + host_mxcsr)).map_err(iced_err)?;
        a.ldmxcsr(dword_ptr(r15 + mxcsr)).map_err(iced_err)?;
        a.jmp(rbx).map_err(iced_err)?;

        // --- return_from_run_code: re-dispatch ---
        a.set_label(&mut lbl_rfrc).map_err(iced_err)?;
        a.cmp(dword_ptr(r15 + halt), 0).map_err(iced_err)?;
        a.jne(lbl_force).map_err(iced_err)?;
        if cb.enable_cycle_counting {
            a.cmp(qword_ptr(rsp + remaining), 0).map_err(iced_err)?;
            a.jle(lbl_force).map_err(iced_err)?;
        }
        cb.lookup_block.emit_call_simple(&mut a).map_err(iced_err)?;
        a.jmp(rax).map_err(iced_err)?;

        // --- force return: leave guest MXCSR mode ---
        a.set_label(&mut lbl_force).map_err(iced_err)?;
        a.stmxcsr(dword_ptr(r15 + mxcsr)).map_err(iced_err)?;
        a.ldmxcsr(dword_ptr(rsp + host_mxcsr)).map_err(iced_err)?;

        // --- epilogue ---
        a.set_label(&mut lbl_return_only).map_err(iced_err)?;
        if cb.enable_cycle_counting {
            a.mov(rax, qword_ptr(rsp + to_run)).map_err(iced_err)?;
            a.sub(rax, qword_ptr(rsp + remaining)).map_err(iced_err)?;
            cb.add_ticks
                .emit_call(&mut a, &mut |a, params| {
                    a.mov(params[0].r64(), rax)?;
                    Ok(())
                })
                .map_err(iced_err)?;
        }
        a.mov(eax, dword_ptr(r15 + halt)).map_err(iced_err)?;
        a.mov(dword_ptr(r15 + halt), 0).map_err(iced_err)?;
        a.add(rsp, frame as i32).map_err(iced_err)?;
        a.pop(r15).map_err(iced_err)?;
        a.pop(r14).map_err(iced_err)?;
        a.pop(r13).map_err(iced_err)?;
        a.pop(r12).map_err(iced_err)?;
        a.pop(rbp).map_err(iced_err)?;
        a.pop(rbx).map_err(iced_err)?;
        a.ret().map_err(iced_err)?;

        let region = self.commit(a)?;
        let labels = DispatcherLabels {
            run_code: region.offset,
            step_code: region.label_offset(&lbl_step),
            return_from_run_code: region.label_offset(&lbl_rfrc),
            force_return_from_run_code: region.label_offset(&lbl_force),
        };
        Ok(labels)
    }

    /// Resolve a dispatcher offset to its absolute address.
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base_address() + offset as u64
    }

    /// Function pointer for `run_code`. The arena must be executable.
    ///
    /// # Safety
    /// The returned function runs arbitrary generated code; the caller
    /// must uphold the dispatcher's ABI.
    pub unsafe fn run_code_fn(&self, labels: DispatcherLabels) -> RunCodeFn {
        debug_assert!(!self.writable);
        unsafe { std::mem::transmute(self.base_ptr().add(labels.run_code)) }
    }

    /// Function pointer for `step_code`.
    ///
    /// # Safety
    /// As [`Self::run_code_fn`].
    pub unsafe fn step_code_fn(&self, labels: DispatcherLabels) -> RunCodeFn {
        debug_assert!(!self.writable);
        unsafe { std::mem::transmute(self.base_ptr().add(labels.step_code)) }
    }
}

/// The dispatch frame plus padding keeping RSP 16-byte aligned (6 pushes
/// and the return address occupy 56 bytes).
pub fn frame_size() -> usize {
    let base = core::mem::size_of::<StackLayout>();
    if (base + 56) % 16 == 0 {
        base
    } else {
        base + 8
    }
}

pub struct CommittedRegion {
    pub offset: usize,
    pub size: usize,
    base: u64,
    result: CodeAssemblerResult,
}

impl CommittedRegion {
    /// Arena offset a label landed at.
    pub fn label_offset(&self, label: &CodeLabel) -> usize {
        let ip = self
            .result
            .label_ip(label)
            .expect("label was not bound in the committed region");
        (ip - self.base) as usize + self.offset
    }
}

fn iced_err(e: IcedError) -> JitError {
    JitError::Assembler(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::jit_state::A64JitState;

    #[test]
    fn arena_allocates_and_tracks_cursor() {
        let mut code = BlockOfCode::new(64 * 1024, A64JitState::info()).unwrap();
        assert_eq!(code.cursor_offset(), 0);

        let mut a = CodeAssembler::new(64).unwrap();
        a.ret().unwrap();
        let region = code.commit(a).unwrap();
        assert_eq!(region.offset, 0);
        assert_eq!(region.size, 1);
        assert_eq!(code.cursor_offset(), 1);
    }

    #[test]
    fn patch_slots_write_expected_bytes() {
        let mut code = BlockOfCode::new(64 * 1024, A64JitState::info()).unwrap();
        // Reserve some space.
        let mut a = CodeAssembler::new(64).unwrap();
        a.db(&[0x90u8; 32]).unwrap();
        code.commit(a).unwrap();

        let target = code.base_address() + 32;
        code.patch_jmp(0, target);
        let bytes = unsafe { std::slice::from_raw_parts(code.base_ptr(), 5) };
        assert_eq!(bytes[0], 0xE9);
        assert_eq!(i32::from_le_bytes(bytes[1..5].try_into().unwrap()), 27);

        code.unpatch(0, PATCH_JMP_SIZE);
        let bytes = unsafe { std::slice::from_raw_parts(code.base_ptr(), 5) };
        assert_eq!(bytes, &[0x90; 5]);
    }

    #[test]
    fn clear_cache_keeps_prelude() {
        let mut code = BlockOfCode::new(64 * 1024, A64JitState::info()).unwrap();
        let mut a = CodeAssembler::new(64).unwrap();
        a.ret().unwrap();
        code.commit(a).unwrap();
        code.mark_prelude_complete();

        let mut a = CodeAssembler::new(64).unwrap();
        a.db(&[0xCC; 16]).unwrap();
        code.commit(a).unwrap();
        assert!(code.cursor_offset() > 1);
        code.clear_cache();
        assert_eq!(code.cursor_offset(), 1);
    }
}
