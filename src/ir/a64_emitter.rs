use crate::frontend::a64::types::{Reg, Vec as VecReg};
use crate::ir::acc_type::AccType;
use crate::ir::block::Block;
use crate::ir::emitter::IrEmitter;
use crate::ir::location::A64LocationDescriptor;
use crate::ir::opcode::Opcode;
use crate::ir::terminal::Terminal;
use crate::ir::value::Value;

/// IR emitter for the A64 frontend.
///
/// Register 31 resolves to the zero register in `get_w/get_x` and to a
/// discarded write in `set_w/set_x`; SP accesses use the dedicated
/// helpers.
pub struct A64IrEmitter<'a> {
    pub ir: IrEmitter<'a>,
    pub current_location: A64LocationDescriptor,
}

impl<'a> A64IrEmitter<'a> {
    pub fn new(block: &'a mut Block, location: A64LocationDescriptor) -> Self {
        Self { ir: IrEmitter::new(block), current_location: location }
    }

    pub fn pc(&self) -> u64 {
        self.current_location.pc()
    }

    pub fn set_term(&mut self, terminal: Terminal) {
        self.ir.set_term(terminal);
    }

    // --- Registers ---

    pub fn get_w(&mut self, reg: Reg) -> Value {
        if reg.is_r31() {
            return Value::ImmU32(0);
        }
        self.ir.inst(Opcode::A64GetW, &[Value::ImmA64Reg(reg)])
    }

    pub fn get_x(&mut self, reg: Reg) -> Value {
        if reg.is_r31() {
            return Value::ImmU64(0);
        }
        self.ir.inst(Opcode::A64GetX, &[Value::ImmA64Reg(reg)])
    }

    pub fn set_w(&mut self, reg: Reg, value: Value) {
        if reg.is_r31() {
            return;
        }
        self.ir.inst_void(Opcode::A64SetW, &[Value::ImmA64Reg(reg), value]);
    }

    pub fn set_x(&mut self, reg: Reg, value: Value) {
        if reg.is_r31() {
            return;
        }
        self.ir.inst_void(Opcode::A64SetX, &[Value::ImmA64Reg(reg), value]);
    }

    pub fn get_sp(&mut self) -> Value {
        self.ir.inst(Opcode::A64GetSP, &[])
    }

    pub fn set_sp(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A64SetSP, &[value]);
    }

    pub fn set_pc(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A64SetPC, &[value]);
    }

    pub fn get_q(&mut self, reg: VecReg) -> Value {
        self.ir.inst(Opcode::A64GetQ, &[Value::ImmA64Vec(reg)])
    }

    pub fn set_q(&mut self, reg: VecReg, value: Value) {
        self.ir.inst_void(Opcode::A64SetQ, &[Value::ImmA64Vec(reg), value]);
    }

    // --- Flags ---

    pub fn get_c_flag(&mut self) -> Value {
        self.ir.inst(Opcode::A64GetCFlag, &[])
    }

    pub fn get_nzcv_raw(&mut self) -> Value {
        self.ir.inst(Opcode::A64GetNZCVRaw, &[])
    }

    pub fn set_nzcv_raw(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A64SetNZCVRaw, &[value]);
    }

    pub fn set_nzcv(&mut self, nzcv: Value) {
        self.ir.inst_void(Opcode::A64SetNZCV, &[nzcv]);
    }

    pub fn set_check_bit(&mut self, value: Value) {
        self.ir.inst_void(Opcode::A64SetCheckBit, &[value]);
    }

    // --- System ---

    pub fn call_supervisor(&mut self, imm: Value) {
        self.ir.inst_void(Opcode::A64CallSupervisor, &[imm]);
    }

    pub fn exception_raised(&mut self, exception: crate::config::Exception) {
        let pc = Value::ImmU64(self.pc());
        self.ir
            .inst_void(Opcode::A64ExceptionRaised, &[pc, Value::ImmU64(exception as u64)]);
    }

    pub fn data_synchronization_barrier(&mut self) {
        self.ir.inst_void(Opcode::A64DataSynchronizationBarrier, &[]);
    }

    pub fn data_memory_barrier(&mut self) {
        self.ir.inst_void(Opcode::A64DataMemoryBarrier, &[]);
    }

    pub fn instruction_synchronization_barrier(&mut self) {
        self.ir.inst_void(Opcode::A64InstructionSynchronizationBarrier, &[]);
    }

    // --- Memory ---

    pub fn clear_exclusive(&mut self) {
        self.ir.inst_void(Opcode::A64ClearExclusive, &[]);
    }

    pub fn read_memory_8(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ReadMemory8, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_16(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ReadMemory16, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_32(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ReadMemory32, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn read_memory_64(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ReadMemory64, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn write_memory_8(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A64WriteMemory8, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_16(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A64WriteMemory16, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_32(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A64WriteMemory32, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn write_memory_64(&mut self, vaddr: Value, value: Value, acc: AccType) {
        self.ir.inst_void(Opcode::A64WriteMemory64, &[vaddr, value, Value::ImmAccType(acc)]);
    }

    pub fn exclusive_read_memory_8(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveReadMemory8, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_16(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveReadMemory16, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_32(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveReadMemory32, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_read_memory_64(&mut self, vaddr: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveReadMemory64, &[vaddr, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_8(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveWriteMemory8, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_16(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveWriteMemory16, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_32(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveWriteMemory32, &[vaddr, value, Value::ImmAccType(acc)])
    }

    pub fn exclusive_write_memory_64(&mut self, vaddr: Value, value: Value, acc: AccType) -> Value {
        self.ir.inst(Opcode::A64ExclusiveWriteMemory64, &[vaddr, value, Value::ImmAccType(acc)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r31_reads_zero_and_discards_writes() {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        let mut block = Block::new(loc.to_location());
        let mut e = A64IrEmitter::new(&mut block, loc);
        assert_eq!(e.get_x(Reg::R31), Value::ImmU64(0));
        e.set_x(Reg::R31, Value::ImmU64(42));
        assert_eq!(block.inst_count(), 0);
    }

    #[test]
    fn add_with_set_x() {
        let loc = A64LocationDescriptor::new(0x1000, 0, false);
        let mut block = Block::new(loc.to_location());
        let mut e = A64IrEmitter::new(&mut block, loc);
        let a = e.get_x(Reg::from_bits(1));
        let b = e.get_x(Reg::from_bits(2));
        let carry = e.ir.imm1(false);
        let sum = e.ir.add_64(a, b, carry);
        e.set_x(Reg::from_bits(0), sum);
        assert_eq!(block.inst_count(), 4);
    }
}
