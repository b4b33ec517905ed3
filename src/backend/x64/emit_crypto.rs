//! AES lowering: single host instructions when AES-NI is present,
//! otherwise trampolines into the scalar routines with the 128-bit state
//! passed through a stack shadow slot.

use iced_x86::code_asm::*;

use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::common::aes;
use crate::ir::block::Block;
use crate::ir::value::Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesOp {
    EncryptSingleRound,
    DecryptSingleRound,
    MixColumns,
    InverseMixColumns,
}

pub fn emit_vector_eor(ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    let result = ra.use_scratch_xmm(&mut args[0]);
    let op2 = ra.use_xmm(&mut args[1]);
    ra.asm.pxor(result.xmm(), op2.xmm()).expect("asm");
    ra.define_value(inst, result);
}

pub fn emit_aes(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index, op: AesOp) {
    if ctx.config.host_has_aes {
        let mut args = ra.get_argument_info(block.get(inst).args());
        let state = ra.use_scratch_xmm(&mut args[0]);
        let zero = ra.scratch_xmm();
        ra.asm.pxor(zero.xmm(), zero.xmm()).expect("asm");
        match op {
            // ARM AESE is SubBytes(ShiftRows(x)): AESENCLAST with a zero
            // round key.
            AesOp::EncryptSingleRound => {
                ra.asm.aesenclast(state.xmm(), zero.xmm()).expect("asm")
            }
            AesOp::DecryptSingleRound => {
                ra.asm.aesdeclast(state.xmm(), zero.xmm()).expect("asm")
            }
            // MixColumns = aesenc . aesdeclast (the SubBytes/ShiftRows
            // halves cancel).
            AesOp::MixColumns => {
                ra.asm.aesdeclast(state.xmm(), zero.xmm()).expect("asm");
                ra.asm.aesenc(state.xmm(), zero.xmm()).expect("asm");
            }
            AesOp::InverseMixColumns => ra.asm.aesimc(state.xmm(), state.xmm()).expect("asm"),
        }
        ra.release(zero);
        ra.define_value(inst, state);
        return;
    }

    // Software fallback: spill the state to a shadow slot and call the
    // scalar routine on it.
    let mut args = ra.get_argument_info(block.get(inst).args());
    let state = ra.use_scratch_xmm(&mut args[0]);
    ra.host_call(None, &mut []);

    let shim: u64 = match op {
        AesOp::EncryptSingleRound => aes_shim_encrypt as usize as u64,
        AesOp::DecryptSingleRound => aes_shim_decrypt as usize as u64,
        AesOp::MixColumns => aes_shim_mix as usize as u64,
        AesOp::InverseMixColumns => aes_shim_inverse_mix as usize as u64,
    };

    ra.asm.sub(rsp, 16).expect("asm");
    ra.asm.movdqu(xmmword_ptr(rsp), state.xmm()).expect("asm");
    ra.asm.mov(rdi, rsp).expect("asm");
    crate::backend::x64::callback::emit_call_to(ra.asm, shim).expect("asm");
    ra.asm.movdqu(state.xmm(), xmmword_ptr(rsp)).expect("asm");
    ra.asm.add(rsp, 16).expect("asm");

    ra.define_value(inst, state);
}

extern "C" fn aes_shim_encrypt(state: *mut u8) {
    let state = unsafe { &mut *(state as *mut [u8; aes::STATE_SIZE]) };
    aes::encrypt_single_round(state);
}

extern "C" fn aes_shim_decrypt(state: *mut u8) {
    let state = unsafe { &mut *(state as *mut [u8; aes::STATE_SIZE]) };
    aes::decrypt_single_round(state);
}

extern "C" fn aes_shim_mix(state: *mut u8) {
    let state = unsafe { &mut *(state as *mut [u8; aes::STATE_SIZE]) };
    aes::mix_columns(state);
}

extern "C" fn aes_shim_inverse_mix(state: *mut u8) {
    let state = unsafe { &mut *(state as *mut [u8; aes::STATE_SIZE]) };
    aes::inverse_mix_columns(state);
}
