//! Emission of the A32 coprocessor opcodes. The action for each access
//! was resolved against the embedder at translation time and interned in
//! the block.

use iced_x86::code_asm::*;

use crate::backend::x64::callback::emit_call_to;
use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::reg_alloc::RegAlloc;
use crate::ir::block::{Block, CoprocAction};
use crate::ir::value::Index;

fn action(ctx: &EmitContext, block: &Block, inst: Index) -> CoprocAction {
    let index = block.get(inst).arg(0).coproc_info() as usize;
    ctx.coproc_actions[index]
}

fn emit_callback_call(ra: &mut RegAlloc, function: u64, user_arg: u64) {
    ra.asm.mov(rdi, user_arg).expect("asm");
    emit_call_to(ra.asm, function).expect("asm");
}

pub fn emit_internal_operation(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            ra.host_call(None, &mut []);
            emit_callback_call(ra, function, user_arg);
        }
        other => panic!("invalid action for coproc internal operation: {other:?}"),
    }
}

pub fn emit_send_one_word(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            let (_, rest) = args.split_at_mut(1);
            ra.host_call(None, &mut [Some(&mut rest[0])]);
            emit_callback_call(ra, function, user_arg);
        }
        CoprocAction::OneWordPtr(ptr) => {
            let value = ra.use_gpr(&mut args[1]);
            let addr = ra.scratch_gpr();
            ra.asm.mov(addr.r64(), ptr).expect("asm");
            ra.asm.mov(dword_ptr(addr.r64()), value.r32()).expect("asm");
            ra.release(addr);
        }
        other => panic!("invalid action for coproc send-one-word: {other:?}"),
    }
}

pub fn emit_send_two_words(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            let (_, rest) = args.split_at_mut(1);
            let (w1, w2) = rest.split_at_mut(1);
            ra.host_call(None, &mut [Some(&mut w1[0]), Some(&mut w2[0])]);
            emit_callback_call(ra, function, user_arg);
        }
        CoprocAction::TwoWordPtrs(p1, p2) => {
            let w1 = ra.use_gpr(&mut args[1]);
            let w2 = ra.use_gpr(&mut args[2]);
            let addr = ra.scratch_gpr();
            ra.asm.mov(addr.r64(), p1).expect("asm");
            ra.asm.mov(dword_ptr(addr.r64()), w1.r32()).expect("asm");
            ra.asm.mov(addr.r64(), p2).expect("asm");
            ra.asm.mov(dword_ptr(addr.r64()), w2.r32()).expect("asm");
            ra.release(addr);
        }
        other => panic!("invalid action for coproc send-two-words: {other:?}"),
    }
}

pub fn emit_get_one_word(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            ra.host_call(Some(inst), &mut []);
            emit_callback_call(ra, function, user_arg);
        }
        CoprocAction::OneWordPtr(ptr) => {
            let result = ra.scratch_gpr();
            ra.asm.mov(result.r64(), ptr).expect("asm");
            ra.asm.mov(result.r32(), dword_ptr(result.r64())).expect("asm");
            ra.define_value(inst, result);
        }
        other => panic!("invalid action for coproc get-one-word: {other:?}"),
    }
}

pub fn emit_get_two_words(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            ra.host_call(Some(inst), &mut []);
            emit_callback_call(ra, function, user_arg);
        }
        CoprocAction::TwoWordPtrs(p1, p2) => {
            let result = ra.scratch_gpr();
            let tmp = ra.scratch_gpr();
            ra.asm.mov(result.r64(), p2).expect("asm");
            ra.asm.mov(result.r32(), dword_ptr(result.r64())).expect("asm");
            ra.asm.shl(result.r64(), 32).expect("asm");
            ra.asm.mov(tmp.r64(), p1).expect("asm");
            ra.asm.mov(tmp.r32(), dword_ptr(tmp.r64())).expect("asm");
            ra.asm.or(result.r64(), tmp.r64()).expect("asm");
            ra.release(tmp);
            ra.define_value(inst, result);
        }
        other => panic!("invalid action for coproc get-two-words: {other:?}"),
    }
}

pub fn emit_load_words(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            let (_, rest) = args.split_at_mut(1);
            ra.host_call(None, &mut [Some(&mut rest[0])]);
            emit_callback_call(ra, function, user_arg);
        }
        other => panic!("invalid action for coproc load-words: {other:?}"),
    }
}

pub fn emit_store_words(ctx: &EmitContext, ra: &mut RegAlloc, block: &Block, inst: Index) {
    let mut args = ra.get_argument_info(block.get(inst).args());
    match action(ctx, block, inst) {
        CoprocAction::Callback { function, user_arg } => {
            let (_, rest) = args.split_at_mut(1);
            ra.host_call(None, &mut [Some(&mut rest[0])]);
            emit_callback_call(ra, function, user_arg);
        }
        other => panic!("invalid action for coproc store-words: {other:?}"),
    }
}
