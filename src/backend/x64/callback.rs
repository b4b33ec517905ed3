use iced_x86::code_asm::CodeAssembler;
use iced_x86::code_asm::rax;
use iced_x86::IcedError;

use crate::backend::x64::abi;
use crate::backend::x64::hostloc::HostLoc;

/// Argument-setup hook handed the parameter registers still free for the
/// caller to fill.
pub type SetupFn<'a> = &'a mut dyn FnMut(&mut CodeAssembler, &[HostLoc]) -> Result<(), IcedError>;

/// A host function callable from generated code.
pub trait Callback: Send {
    /// Emit the call. `setup` runs first with the parameter registers
    /// available to the caller (any fixed context argument is loaded
    /// afterwards by the implementation).
    fn emit_call(&self, a: &mut CodeAssembler, setup: SetupFn) -> Result<(), IcedError>;

    fn emit_call_simple(&self, a: &mut CodeAssembler) -> Result<(), IcedError> {
        self.emit_call(a, &mut |_, _| Ok(()))
    }
}

/// Call a bare function pointer; the caller supplies every argument.
pub struct SimpleCallback {
    fn_ptr: u64,
}

impl SimpleCallback {
    pub fn new(fn_ptr: u64) -> Self {
        Self { fn_ptr }
    }
}

impl Callback for SimpleCallback {
    fn emit_call(&self, a: &mut CodeAssembler, setup: SetupFn) -> Result<(), IcedError> {
        setup(a, &abi::ABI_PARAMS[..4])?;
        emit_call_to(a, self.fn_ptr)
    }
}

/// Call with a fixed context word loaded into the first parameter
/// register; the caller's arguments start at the second.
pub struct ArgCallback {
    fn_ptr: u64,
    arg: u64,
}

impl ArgCallback {
    pub fn new(fn_ptr: u64, arg: u64) -> Self {
        Self { fn_ptr, arg }
    }
}

impl Callback for ArgCallback {
    fn emit_call(&self, a: &mut CodeAssembler, setup: SetupFn) -> Result<(), IcedError> {
        setup(a, &abi::ABI_PARAMS[1..4])?;
        a.mov(abi::ABI_PARAMS[0].r64(), self.arg)?;
        emit_call_to(a, self.fn_ptr)
    }
}

/// Far call through RAX; host functions are rarely within rel32 range of
/// the arena.
pub fn emit_call_to(a: &mut CodeAssembler, address: u64) -> Result<(), IcedError> {
    a.mov(rax, address)?;
    a.call(rax)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_callback_loads_context_last() {
        let cb = ArgCallback::new(0xDEAD_BEEF, 42);
        let mut a = CodeAssembler::new(64).unwrap();
        let mut saw_params = 0;
        cb.emit_call(&mut a, &mut |_, params| {
            saw_params = params.len();
            Ok(())
        })
        .unwrap();
        // RDI is reserved for the context, so three registers remain.
        assert_eq!(saw_params, 3);
        assert!(a.instructions().len() >= 3);
    }
}
