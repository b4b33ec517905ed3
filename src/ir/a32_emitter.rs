use crate::frontend::a32::types::Reg;
use crate::ir::acc_type::AccType;
use crate::ir::block::Block;
use crate::ir::emitter::IrEmitter;
use crate::ir::location::A32LocationDescriptor;
use crate::ir::opcode::Opcode;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

/// IR emitter for the A32 frontend: the shared helpers plus guest
/// context, memory, and coprocessor operations.
pub struct A32IrEmitter<'a> {
    pub ir: IrEmitter<'a>,
    pub current_location: A32LocationDescriptor,
}

impl<'a> A32IrEmitter<'a> {
    pub fn new(block: &'a mut Block, location: A32LocationDescriptor) -> Self {
        Self { ir: IrEmitter::new(block), current_location: location }
    }

    pub fn pc(&self) -> u32 {
        self.current_location.pc()
    }

    pub fn set_term(&mut self, terminal: Terminal) {
        self.ir.set_term(terminal);
    }

    // --- Registers ---

    /// Read a core register. Reads of R15 return the fetch-ahead PC as a
    /// constant (+8 in ARM state, +4 in Thumb state).
    pub fn get_register(&mut self, reg: Reg) -> Value {
        if reg == Reg::R15 {
            let offset = if self.current_location.t_flag() { 4 } else { 8 };
            return Value::ImmU32(self.pc().wrapping_add(offset));
        }
        self.ir.inst(Opcode::A32GetRegister, &[Value::ImmA32Reg(reg)])
    }

    /// Write a core register. Writes to R15 are interworking branches.
    pub fn set_register(&mut self, reg: Reg, value: Value) {
        if reg == Reg::R15 {
            self.bx_write_pc(value);
            return;
        }
        self.ir.inst_void(Opcode::A32SetRegister, &[Value::ImmA32Reg(reg), value]);
    }

    // --- PC writes ---

    /// Branch that may switch between ARM and Thumb state on bit 0.
    pub fn bx_write_pc(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32BXWritePC, &[value]);
    }

    /// Branch that stays in the current instruction set state.
    pub fn branch_write_pc(&mut self, value: Value) {
        let mask = if self.current_location.t_flag() { 0xFFFF_FFFE } else { 0xFFFF_FFFC };
        let masked = self.ir.and_32(value, Value::ImmU32(mask));
        self.ir.inst_void(Opcode::A32SetRegister, &[Value::ImmA32Reg(Reg::R15), masked]);
    }

    /// ALU write to PC (interworking on ARMv7).
    pub fn alu_write_pc(&mut self, value: Value) {
        self.bx_write_pc(value);
    }

    pub fn load_write_pc(&mut self, value: Value) {
        self.bx_write_pc(value);
    }

    /// Record a statically known change of the upper location descriptor
    /// (instruction-set switch, FPSCR mode change) into the guest state.
    pub fn update_upper_location_descriptor(&mut self, new_upper: u32) {
        self.ir
            .inst_void(Opcode::A32UpdateUpperLocationDescriptor, &[Value::ImmU32(new_upper)]);
    }

    // --- Flags ---

    pub fn get_c_flag(&mut self) -> Value {
        self.ir.inst(Opcode::A32GetCFlag, &[])
    }

    pub fn get_cpsr(&mut self) -> Value {
        self.ir.inst(Opcode::A32GetCpsr, &[])
    }

    pub fn set_cpsr(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32SetCpsr, &[value]);
    }

    /// Write N, Z, C, V from a guest-format word (bits 31:28).
    pub fn set_cpsr_nzcv_raw(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32SetCpsrNZCVRaw, &[value]);
    }

    /// Write N, Z, C, V from an Nzcv-typed value.
    pub fn set_cpsr_nzcv(&mut self, nzcv: Value) {
        self.ir.inst_void(Opcode::A32SetCpsrNZCV, &[nzcv]);
    }

    /// Write N and Z only.
    pub fn set_cpsr_nz(&mut self, nzcv: Value) {
        self.ir.inst_void(Opcode::A32SetCpsrNZ, &[nzcv]);
    }

    /// Write N, Z and a separately computed carry (logical ops).
    pub fn set_cpsr_nzc(&mut self, nzcv: Value, carry: Value) {
        self.ir.inst_void(Opcode::A32SetCpsrNZC, &[nzcv, carry]);
    }

    pub fn or_q_flag(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32OrQFlag, &[value]);
    }

    pub fn get_ge_flags(&mut self) -> Value {
        self.ir.inst(Opcode::A32GetGEFlags, &[])
    }

    pub fn set_ge_flags(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32SetGEFlags, &[value]);
    }

    pub fn get_fpscr(&mut self) -> Value {
        self.ir.inst(Opcode::A32GetFpscr, &[])
    }

    pub fn set_fpscr(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32SetFpscr, &[value]);
    }

    pub fn set_check_bit(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A32SetCheckBit, &[value]);
    }

    // --- System ---

    pub fn call_supervisor(&mut self, imm: Value) {
        self.ir.inst_void(Opcode::A32CallSupervisor, &[imm]);
    }

    pub fn exception_raised(&mut self, exception: crate::config::Exception) {
        let pc = Value::ImmU32(self.pc());
        self.ir
            .inst_void(Opcode::A32ExceptionRaised, &[pc, Value::ImmU64(exception as u64)]);
    }

    pub fn data_synchronization_barrier(&mut self) {
        self.ir.inst_void(Opcode::A32DataSynchronizationBarrier, &[]);
    }

    pub fn data_memory_barrier(&mut self) {
        self.ir.inst_void(Opcode::A32DataMemoryBarrier, &[]);
    }

    pub fn instruction_synchronization_barrier(&mut self) {
        self.ir.inst_void(Opcode::A32InstructionSynchronizationBarrier, &[]);
    }

    // --- Memory ---

    pub fn clear_exclusive(&mut self) {
        self.ir.inst_void(Opcode::A32ClearExclusive, &[]);
    }

    pub fn read_memory_8(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ReadMemory8, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_16(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ReadMemory16, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_32(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ReadMemory32, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_64(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ReadMemory64, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn write_memory_8(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A32WriteMemory8, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_16(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A32WriteMemory16, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_32(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A32WriteMemory32, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_64(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A32WriteMemory64, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn exclusive_read_memory_8(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveReadMemory8, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_16(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveReadMemory16, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_32(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveReadMemory32, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_64(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveReadMemory64, &[vaddr, Value::ImmAccType(acc)])
    }

    /// Returns 0 on success, 1 on failure (the STREX status result).
    pub fn exclusive_write_memory_8(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveWriteMemory8, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_16(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveWriteMemory16, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_32(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveWriteMemory32, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_64(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A32ExclusiveWriteMemory64, &[vaddr, value, Value::ImmAccType(acc)])
    }

    // --- Coprocessor ---

    pub fn coproc_internal_operation(&mut self, info: u64) {
        self.ir.inst_void(Opcode::A32CoprocInternalOperation, &[Value::ImmCoprocInfo(info)]);
    }

    pub fn coproc_send_one_word(&mut self, info: u64, word: Value) {
        self.ir.inst_void(Opcode::A32CoprocSendOneWord, &[Value::ImmCoprocInfo(info), word]);
    }

    pub fn coproc_send_two_words(&mut self, info: u64, w1: Value, w2: Value) {
        self.ir.inst_void(Opcode::A32CoprocSendTwoWords, &[Value::ImmCoprocInfo(info), w1, w2]);
    }

    pub fn coproc_get_one_word(&mut self, info: u64) -> Value {
        self.ir.inst(Opcode::A32CoprocGetOneWord, &[Value::ImmCoprocInfo(info)])
    }

    pub fn coproc_get_two_words(&mut self, info: u64) -> Value {
        self.ir.inst(Opcode::A32CoprocGetTwoWords, &[Value::ImmCoprocInfo(info)])
    }

    pub fn coproc_load_words(&mut self, info: u64, address: Value) {
        self.ir.inst_void(Opcode::A32CoprocLoadWords, &[Value::ImmCoprocInfo(info), address]);
    }

    pub fn coproc_store_words(&mut self, info: u64, address: Value) {
        self.ir.inst_void(Opcode::A32CoprocStoreWords, &[Value::ImmCoprocInfo(info), address]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::Index;

    #[test]
    fn pc_reads_are_constants() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        assert_eq!(e.get_register(Reg::R15), Value::ImmU32(0x1008));

        let thumb = loc.set_t_flag(true);
        let mut block2 = Block::new(thumb.to_location());
        let mut e2 = A32IrEmitter::new(&mut block2, thumb);
        assert_eq!(e2.get_register(Reg::R15), Value::ImmU32(0x1004));
    }

    #[test]
    fn pc_writes_become_branches() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        let v = e.get_register(Reg::R0);
        e.set_register(Reg::R15, v);
        assert_eq!(block.instructions.last().unwrap().opcode, Opcode::A32BXWritePC);
    }

    #[test]
    fn simple_add_sequence() {
        let loc = A32LocationDescriptor::at(0x1000);
        let mut block = Block::new(loc.to_location());
        let mut e = A32IrEmitter::new(&mut block, loc);
        let a = e.get_register(Reg::R1);
        let b = e.get_register(Reg::R2);
        let carry = e.ir.imm1(false);
        let sum = e.ir.add_32(a, b, carry);
        e.set_register(Reg::R0, sum);
        e.set_term(Terminal::ReturnToDispatch);

        assert_eq!(block.get(Index(2)).opcode, Opcode::Add32);
        assert_eq!(block.get(Index(3)).opcode, Opcode::A32SetRegister);
    }
}
