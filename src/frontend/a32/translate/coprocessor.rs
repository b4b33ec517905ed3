use crate::config::{CoprocLoadStore, CoprocOneWord, CoprocReg, CoprocTwoWords, Exception};
use crate::frontend::a32::decode::ArmFields;
use crate::frontend::a32::translate::{Step, TranslateContext};
use crate::ir::a32_emitter::A32IrEmitter;
use crate::ir::block::CoprocAction;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

fn coproc_num(f: ArmFields) -> usize {
    ((f.0 >> 8) & 0xF) as usize
}

fn two(f: ArmFields) -> bool {
    // cond = 1111 selects the CDP2/MCR2/... forms.
    f.0 >> 28 == 0xF
}

fn raise_coproc_exception(e: &mut A32IrEmitter) -> Step {
    e.exception_raised(Exception::UndefinedInstruction);
    e.set_term(Terminal::check_halt(Terminal::ReturnToDispatch));
    Step::Stop
}

pub fn cdp(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let opc1 = (f.0 >> 20) & 0xF;
    let opc2 = (f.0 >> 5) & 0x7;
    let action = coproc.compile_internal_operation(
        two(f),
        opc1,
        CoprocReg(((f.0 >> 12) & 0xF) as u8),
        CoprocReg(((f.0 >> 16) & 0xF) as u8),
        CoprocReg((f.0 & 0xF) as u8),
        opc2,
    );
    match action {
        CoprocLoadStore::Unhandled => raise_coproc_exception(e),
        CoprocLoadStore::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            e.coproc_internal_operation(info);
            Step::Continue
        }
    }
}

pub fn mcr(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let opc1 = (f.0 >> 21) & 0x7;
    let opc2 = (f.0 >> 5) & 0x7;
    let action = coproc.compile_send_one_word(
        two(f),
        opc1,
        CoprocReg(((f.0 >> 16) & 0xF) as u8),
        CoprocReg((f.0 & 0xF) as u8),
        opc2,
    );
    let rt = e.get_register(f.rd());
    match action {
        CoprocOneWord::Unhandled => raise_coproc_exception(e),
        CoprocOneWord::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            e.coproc_send_one_word(info, rt);
            Step::Continue
        }
        CoprocOneWord::Ptr(ptr) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::OneWordPtr(ptr as u64));
            e.coproc_send_one_word(info, rt);
            Step::Continue
        }
    }
}

pub fn mrc(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let opc1 = (f.0 >> 21) & 0x7;
    let opc2 = (f.0 >> 5) & 0x7;
    let action = coproc.compile_get_one_word(
        two(f),
        opc1,
        CoprocReg(((f.0 >> 16) & 0xF) as u8),
        CoprocReg((f.0 & 0xF) as u8),
        opc2,
    );
    match action {
        CoprocOneWord::Unhandled => raise_coproc_exception(e),
        CoprocOneWord::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            let word = e.coproc_get_one_word(info);
            e.set_register(f.rd(), word);
            Step::Continue
        }
        CoprocOneWord::Ptr(ptr) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::OneWordPtr(ptr as u64));
            let word = e.coproc_get_one_word(info);
            e.set_register(f.rd(), word);
            Step::Continue
        }
    }
}

pub fn mcrr(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let opc = (f.0 >> 4) & 0xF;
    let action = coproc.compile_send_two_words(two(f), opc, CoprocReg((f.0 & 0xF) as u8));
    let rt = e.get_register(f.rd());
    let rt2 = e.get_register(f.rn());
    match action {
        CoprocTwoWords::Unhandled => raise_coproc_exception(e),
        CoprocTwoWords::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            e.coproc_send_two_words(info, rt, rt2);
            Step::Continue
        }
        CoprocTwoWords::Ptrs(p1, p2) => {
            let info =
                e.ir.block.add_coproc_action(CoprocAction::TwoWordPtrs(p1 as u64, p2 as u64));
            e.coproc_send_two_words(info, rt, rt2);
            Step::Continue
        }
    }
}

pub fn mrrc(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let opc = (f.0 >> 4) & 0xF;
    let action = coproc.compile_get_two_words(two(f), opc, CoprocReg((f.0 & 0xF) as u8));
    match action {
        CoprocTwoWords::Unhandled => raise_coproc_exception(e),
        CoprocTwoWords::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            let both = e.coproc_get_two_words(info);
            let lo = e.ir.least_significant_word(both);
            let hi = e.ir.most_significant_word(both);
            e.set_register(f.rd(), lo);
            e.set_register(f.rn(), hi);
            Step::Continue
        }
        CoprocTwoWords::Ptrs(p1, p2) => {
            let info =
                e.ir.block.add_coproc_action(CoprocAction::TwoWordPtrs(p1 as u64, p2 as u64));
            let both = e.coproc_get_two_words(info);
            let lo = e.ir.least_significant_word(both);
            let hi = e.ir.most_significant_word(both);
            e.set_register(f.rd(), lo);
            e.set_register(f.rn(), hi);
            Step::Continue
        }
    }
}

fn ldc_stc_address(e: &mut A32IrEmitter, f: ArmFields) -> Value {
    let rn = e.get_register(f.rn());
    let offset = Value::ImmU32(f.imm8() << 2);
    let offset_addr = if f.u_flag() {
        e.ir.add_32(rn, offset, Value::ImmU1(false))
    } else {
        e.ir.sub_32(rn, offset, Value::ImmU1(true))
    };
    let address = if f.p_flag() { offset_addr } else { rn };
    if !f.p_flag() || f.w_flag() {
        e.set_register(f.rn(), offset_addr);
    }
    address
}

pub fn ldc(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let long_transfer = f.0 & (1 << 22) != 0;
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let option = if !f.p_flag() && !f.w_flag() { Some(f.imm8() as u8) } else { None };
    let action = coproc.compile_load_words(
        two(f),
        long_transfer,
        CoprocReg(((f.0 >> 12) & 0xF) as u8),
        option,
    );
    match action {
        CoprocLoadStore::Unhandled => raise_coproc_exception(e),
        CoprocLoadStore::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            let address = ldc_stc_address(e, f);
            e.coproc_load_words(info, address);
            Step::Continue
        }
    }
}

pub fn stc(e: &mut A32IrEmitter, f: ArmFields, ctx: &mut TranslateContext<'_>) -> Step {
    let long_transfer = f.0 & (1 << 22) != 0;
    let Some(coproc) = ctx.coprocessors[coproc_num(f)].as_mut() else {
        return raise_coproc_exception(e);
    };
    let option = if !f.p_flag() && !f.w_flag() { Some(f.imm8() as u8) } else { None };
    let action = coproc.compile_store_words(
        two(f),
        long_transfer,
        CoprocReg(((f.0 >> 12) & 0xF) as u8),
        option,
    );
    match action {
        CoprocLoadStore::Unhandled => raise_coproc_exception(e),
        CoprocLoadStore::Callback(cb) => {
            let info = e.ir.block.add_coproc_action(CoprocAction::Callback {
                function: cb.function as usize as u64,
                user_arg: cb.user_arg,
            });
            let address = ldc_stc_address(e, f);
            e.coproc_store_words(info, address);
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoprocCallback, Coprocessor};
    use crate::ir::block::Block;
    use crate::ir::location::A32LocationDescriptor;
    use crate::ir::opcode::Opcode;

    unsafe extern "C" fn nop_cb(_: u64, _: u32, _: u32) -> u64 {
        0
    }

    struct TestCp {
        word: u32,
    }

    impl Coprocessor for TestCp {
        fn compile_send_one_word(
            &mut self, _: bool, _: u32, _: CoprocReg, _: CoprocReg, _: u32,
        ) -> CoprocOneWord {
            CoprocOneWord::Ptr(&mut self.word)
        }
        fn compile_send_two_words(&mut self, _: bool, _: u32, _: CoprocReg) -> CoprocTwoWords {
            CoprocTwoWords::Unhandled
        }
        fn compile_get_one_word(
            &mut self, _: bool, _: u32, _: CoprocReg, _: CoprocReg, _: u32,
        ) -> CoprocOneWord {
            CoprocOneWord::Callback(CoprocCallback { function: nop_cb, user_arg: 7 })
        }
        fn compile_get_two_words(&mut self, _: bool, _: u32, _: CoprocReg) -> CoprocTwoWords {
            CoprocTwoWords::Unhandled
        }
    }

    #[test]
    fn mcr_resolves_pointer_action() {
        let mut coprocs: [Option<Box<dyn Coprocessor>>; 16] = Default::default();
        coprocs[15] = Some(Box::new(TestCp { word: 0 }));
        let mut ctx = TranslateContext { coprocessors: &mut coprocs, single_stepping: false };

        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        // MCR p15, 0, R0, c7, c5, 0
        let step = mcr(&mut e, ArmFields(0xEE07_0F15), &mut ctx);
        assert_eq!(step, Step::Continue);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32CoprocSendOneWord));
        assert!(matches!(block.coproc_actions[0], CoprocAction::OneWordPtr(_)));
    }

    #[test]
    fn absent_coprocessor_raises() {
        let mut coprocs: [Option<Box<dyn Coprocessor>>; 16] = Default::default();
        let mut ctx = TranslateContext { coprocessors: &mut coprocs, single_stepping: false };

        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        let step = mcr(&mut e, ArmFields(0xEE07_0F15), &mut ctx);
        assert_eq!(step, Step::Stop);
        assert!(block.iter_live().any(|(_, i)| i.opcode == Opcode::A32ExceptionRaised));
    }
}
