//! Terminal lowering. Runs after the block body, when no IR values are
//! live; terminals may clobber any register.

use iced_x86::code_asm::*;

use crate::backend::x64::block_of_code::PATCH_JMP_SIZE;
use crate::backend::x64::emit_context::EmitContext;
use crate::backend::x64::patch_info::{PatchType, PendingPatch};
use crate::backend::x64::stack_layout::StackLayout;
use crate::ir::cond::Cond;
use crate::ir::location::LocationDescriptor;
use crate::ir::terminal::Terminal;

pub fn emit_terminal(ctx: &EmitContext, a: &mut CodeAssembler, terminal: &Terminal) {
    match terminal {
        Terminal::Invalid => {
            // A block must never run off its end.
            a.int3().expect("asm");
        }
        Terminal::Interpret { next, num_instructions } => {
            emit_interpret(ctx, a, *next, *num_instructions);
        }
        Terminal::ReturnToDispatch => {
            emit_jmp_dispatcher(ctx, a, false);
        }
        Terminal::LinkBlock { next } => emit_link_block(ctx, a, *next),
        Terminal::LinkBlockFast { next } => emit_link_block_fast(ctx, a, *next),
        Terminal::PopRSBHint => emit_pop_rsb_hint(ctx, a),
        Terminal::FastDispatchHint => emit_fast_dispatch_hint(ctx, a),
        Terminal::If { cond, then_, else_ } => emit_if(ctx, a, *cond, then_, else_),
        Terminal::CheckBit { then_, else_ } => emit_check_bit(ctx, a, then_, else_),
        Terminal::CheckHalt { else_ } => emit_check_halt(ctx, a, else_),
    }
}

/// Store the guest PC (and, for A32, the upper location descriptor) of a
/// statically known destination.
pub fn emit_set_location(ctx: &EmitContext, a: &mut CodeAssembler, next: LocationDescriptor) {
    let pc = ctx.arch.extract_pc(next);
    let pc_off = ctx.jsi.offset_of_pc as i32;
    if ctx.jsi.pc_width == 8 {
        if pc <= i32::MAX as u64 {
            a.mov(qword_ptr(r15 + pc_off), pc as i32).expect("asm");
        } else {
            a.mov(rax, pc).expect("asm");
            a.mov(qword_ptr(r15 + pc_off), rax).expect("asm");
        }
    } else {
        a.mov(dword_ptr(r15 + pc_off), pc as u32 as i32).expect("asm");
    }
    if let Some(upper_off) = ctx.jsi.offset_of_upper_location_descriptor {
        let upper = ctx.arch.extract_upper(next);
        a.mov(dword_ptr(r15 + upper_off as i32), upper as i32).expect("asm");
    }
}

fn emit_jmp_dispatcher(ctx: &EmitContext, a: &mut CodeAssembler, force_return: bool) {
    let offset = if force_return {
        ctx.dispatcher.force_return_from_run_code
    } else {
        ctx.dispatcher.return_from_run_code
    };
    a.jmp(ctx.dispatcher_address(offset)).expect("asm");
}

fn emit_link_block(ctx: &EmitContext, a: &mut CodeAssembler, next: LocationDescriptor) {
    emit_set_location(ctx, a, next);

    if ctx.enable_block_linking && !ctx.single_stepping {
        if ctx.config.enable_cycle_counting {
            a.cmp(qword_ptr(rsp + StackLayout::cycles_remaining_offset() as i32), 0)
                .expect("asm");
        } else {
            // Halt pending means no linking either.
            a.cmp(dword_ptr(r15 + ctx.jsi.offset_of_halt_reason as i32), 0).expect("asm");
        }
        // Patched to a conditional jump to the entrypoint once the
        // target is compiled: `jg` while cycles remain, or `jz` while
        // no halt is pending.
        let patch_type = if ctx.config.enable_cycle_counting {
            PatchType::Jg
        } else {
            PatchType::Jz
        };
        let mut slot = a.create_label();
        a.set_label(&mut slot).expect("asm");
        a.db(&NOPS[..patch_type.slot_size()]).expect("asm");
        ctx.pending_patches.borrow_mut().push(PendingPatch {
            label: slot,
            target: next,
            patch_type,
        });
    }

    emit_jmp_dispatcher(ctx, a, false);
}

fn emit_link_block_fast(ctx: &EmitContext, a: &mut CodeAssembler, next: LocationDescriptor) {
    emit_set_location(ctx, a, next);

    if ctx.enable_block_linking && !ctx.single_stepping {
        let mut slot = a.create_label();
        a.set_label(&mut slot).expect("asm");
        a.db(&NOPS[..PATCH_JMP_SIZE]).expect("asm");
        ctx.pending_patches.borrow_mut().push(PendingPatch {
            label: slot,
            target: next,
            patch_type: PatchType::Jmp,
        });
    }

    emit_jmp_dispatcher(ctx, a, false);
}

fn emit_interpret(
    ctx: &EmitContext,
    a: &mut CodeAssembler,
    next: LocationDescriptor,
    num_instructions: usize,
) {
    emit_set_location(ctx, a, next);
    // InterpreterFallback(pc, num_instructions): argument registers are
    // free at terminal time.
    let pc = ctx.arch.extract_pc(next);
    ctx.config
        .callbacks
        .interpreter_fallback
        .emit_call(a, &mut |a, params| {
            a.mov(params[0].r64(), pc)?;
            a.mov(params[1].r64(), num_instructions as u64)?;
            Ok(())
        })
        .expect("asm");
    emit_jmp_dispatcher(ctx, a, true);
}

fn emit_pop_rsb_hint(ctx: &EmitContext, a: &mut CodeAssembler) {
    match ctx.rsb_handler {
        Some(handler) if !ctx.single_stepping => {
            a.jmp(ctx.dispatcher_address(handler)).expect("asm");
        }
        _ => emit_jmp_dispatcher(ctx, a, false),
    }
}

fn emit_fast_dispatch_hint(ctx: &EmitContext, a: &mut CodeAssembler) {
    match ctx.fast_dispatch_handler {
        Some(handler) if !ctx.single_stepping => {
            a.jmp(ctx.dispatcher_address(handler)).expect("asm");
        }
        _ => emit_jmp_dispatcher(ctx, a, false),
    }
}

fn emit_if(ctx: &EmitContext, a: &mut CodeAssembler, cond: Cond, then_: &Terminal, else_: &Terminal) {
    if matches!(cond, Cond::AL | Cond::NV) {
        emit_terminal(ctx, a, then_);
        return;
    }

    // Terminals run with no live values; RAX is free for the flag load.
    let nzcv_off = ctx.jsi.offset_of_cpsr_nzcv as i32;
    a.mov(eax, dword_ptr(r15 + nzcv_off)).expect("asm");
    a.add(al, 0x7F).expect("asm");
    a.sahf().expect("asm");

    let mut pass = a.create_label();
    super::emit_data_processing::emit_jcc(a, cond, pass);
    emit_terminal(ctx, a, else_);
    a.set_label(&mut pass).expect("asm");
    emit_terminal(ctx, a, then_);
}

fn emit_check_bit(ctx: &EmitContext, a: &mut CodeAssembler, then_: &Terminal, else_: &Terminal) {
    let off = ctx.jsi.offset_of_check_bit as i32;
    let mut fail = a.create_label();
    a.cmp(byte_ptr(r15 + off), 0).expect("asm");
    a.je(fail).expect("asm");
    emit_terminal(ctx, a, then_);
    a.set_label(&mut fail).expect("asm");
    emit_terminal(ctx, a, else_);
}

fn emit_check_halt(ctx: &EmitContext, a: &mut CodeAssembler, else_: &Terminal) {
    let off = ctx.jsi.offset_of_halt_reason as i32;
    let mut halted = a.create_label();
    a.cmp(dword_ptr(r15 + off), 0).expect("asm");
    a.jne(halted).expect("asm");
    emit_terminal(ctx, a, else_);
    a.set_label(&mut halted).expect("asm");
    emit_jmp_dispatcher(ctx, a, true);
}

const NOPS: [u8; 8] = [0x90; 8];
