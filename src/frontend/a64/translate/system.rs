use crate::config::Exception;
use crate::frontend::a64::translate::helpers::*;
use crate::frontend::a64::translate::{AesOp, Step};
use crate::frontend::a64::types::Vec as VecReg;
use crate::ir::a64_emitter::A64IrEmitter;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

pub fn svc(e: &mut A64IrEmitter, word: u32) -> Step {
    let imm16 = (word >> 5) & 0xFFFF;
    let next_pc = e.pc().wrapping_add(4);
    e.set_pc(Value::ImmU64(next_pc));
    let ret = e.current_location.advance_pc(4);
    e.ir.push_rsb(ret.to_location().value());
    e.call_supervisor(Value::ImmU32(imm16));
    e.set_term(Terminal::check_halt(Terminal::PopRSBHint));
    Step::Stop
}

pub fn brk(e: &mut A64IrEmitter, _word: u32) -> Step {
    e.exception_raised(Exception::Breakpoint);
    e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
    Step::Stop
}

pub fn isb(e: &mut A64IrEmitter) -> Step {
    e.instruction_synchronization_barrier();
    let next = e.current_location.advance_pc(4).to_location();
    e.set_term(Terminal::LinkBlock { next });
    Step::Stop
}

pub fn mrs_nzcv(e: &mut A64IrEmitter, word: u32) -> Step {
    let nzcv = e.get_nzcv_raw();
    let wide = e.ir.zero_extend_word_to_long(nzcv);
    e.set_x(rt(word), wide);
    Step::Continue
}

pub fn msr_nzcv(e: &mut A64IrEmitter, word: u32) -> Step {
    let value = e.get_x(rt(word));
    let low = e.ir.least_significant_word(value);
    e.set_nzcv_raw(low);
    Step::Continue
}

pub fn aes_round(e: &mut A64IrEmitter, word: u32, op: AesOp) -> Step {
    let rd_vec = VecReg::from_bits(word);
    let rn_vec = VecReg::from_bits(word >> 5);
    match op {
        // AESE/AESD operate on `state EOR round_key`.
        AesOp::Encrypt | AesOp::Decrypt => {
            let d = e.get_q(rd_vec);
            let n = e.get_q(rn_vec);
            let mixed = e.ir.vector_eor(d, n);
            let result = if op == AesOp::Encrypt {
                e.ir.aes_encrypt_single_round(mixed)
            } else {
                e.ir.aes_decrypt_single_round(mixed)
            };
            e.set_q(rd_vec, result);
        }
        AesOp::MixColumns => {
            let n = e.get_q(rn_vec);
            let result = e.ir.aes_mix_columns(n);
            e.set_q(rd_vec, result);
        }
        AesOp::InverseMixColumns => {
            let n = e.get_q(rn_vec);
            let result = e.ir.aes_inverse_mix_columns(n);
            e.set_q(rd_vec, result);
        }
    }
    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::location::A64LocationDescriptor;
    use crate::ir::opcode::Opcode;

    #[test]
    fn svc_sets_pc_and_pushes_rsb() {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        let mut block = Block::new(loc.to_location());
        let mut e = A64IrEmitter::new(&mut block, loc);
        svc(&mut e, 0xD400_0841); // SVC #0x42
        assert!(block.iter_live().any(|(_, i)| {
            i.opcode == Opcode::A64CallSupervisor && i.arg(0) == Value::ImmU32(0x42)
        }));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::PushRSB));
    }

    #[test]
    fn aese_xors_state_with_key() {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        let mut block = Block::new(loc.to_location());
        let mut e = A64IrEmitter::new(&mut block, loc);
        aes_round(&mut e, 0x4E28_4820, AesOp::Encrypt); // AESE V0, V1
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::VectorEor));
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::AESEncryptSingleRound));
    }
}
