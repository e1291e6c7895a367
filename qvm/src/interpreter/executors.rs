//! Instruction execution

use qvm_asm::{FaultReason, Instruction, Opcode};

use tracing::error;

use crate::consts::{OPSTACK_SIZE, OPSTACK_SLACK};
use crate::error::InterpreterError;
use crate::interpreter::{LoadedVm, Vm};
use crate::memory::VmMemory;
use crate::syscall::{EngineCalls, SyscallMemory};

/// Resulting state of a single executed instruction.
enum ExecuteState {
    Proceed,
    Returned,
}

impl<E: EngineCalls> Vm<E> {
    /// Run the module's entry point with the given argument vector and
    /// return its 32-bit result.
    ///
    /// `args[0]` is the entry command by convention; the whole vector is
    /// copied into the entry frame. Any runtime fault unloads the instance
    /// and returns zero, as does calling an unloaded handle.
    pub fn exec(&mut self, args: &[i32]) -> i32 {
        let cmd = args.first().copied().unwrap_or(0);

        let Self { engine, loaded } = self;
        let result = match loaded.as_mut() {
            Some(vm) => Machine::new(vm, engine).run(args),
            None => {
                error!(cmd, "exec called on an unloaded VM");
                return 0;
            }
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                error!(cmd, error = %e, "fatal runtime fault, unloading VM");
                self.unload();
                0
            }
        }
    }
}

/// One `exec` invocation: instruction pointer, the two stacks, and the
/// masked memory they work against.
///
/// The program-stack pointer lives here as a plain local for the duration of
/// the run and is synced back into the instance around engine traps, so a
/// dispatcher that inspects the instance sees a coherent stack.
struct Machine<'a, E> {
    memory: &'a mut VmMemory,
    saved_stack: &'a mut u32,
    engine: &'a mut E,
    /// Next instruction index to execute.
    ip: usize,
    /// Program-stack pointer: byte offset of the current frame in the data
    /// segment.
    frame: u32,
    /// Operand-stack pointer. Grows downward; `OPSTACK_SIZE` is empty.
    sp: usize,
    opstack: [i32; OPSTACK_SIZE + OPSTACK_SLACK],
}

impl<'a, E: EngineCalls> Machine<'a, E> {
    fn new(vm: &'a mut LoadedVm, engine: &'a mut E) -> Self {
        Self {
            memory: &mut vm.memory,
            saved_stack: &mut vm.program_stack,
            engine,
            ip: 0,
            frame: 0,
            sp: OPSTACK_SIZE,
            opstack: [0; OPSTACK_SIZE + OPSTACK_SLACK],
        }
    }

    fn run(mut self, args: &[i32]) -> Result<i32, InterpreterError> {
        let entry_fault = |reason| InterpreterError::Fault {
            reason,
            instruction: 0,
        };

        // entry frame: sentinel return index, frame size, then the argument
        // vector
        let frame_size = (args.len() as u32 + 2) * 4;
        self.frame = self.saved_stack.wrapping_sub(frame_size);
        self.write_cell(0, -1).map_err(entry_fault)?;
        self.write_cell(4, frame_size as i32).map_err(entry_fault)?;
        for (i, arg) in args.iter().enumerate() {
            self.write_cell(8 + 4 * i as u32, *arg).map_err(entry_fault)?;
        }

        loop {
            let index = self.ip;

            // both stack pointers are validated before every instruction;
            // nothing that follows can move them further than one frame or
            // two cells before the next check
            let frame = self.frame as usize;
            if frame < self.memory.program_stack_floor() || frame > self.memory.data_size() {
                return Err(InterpreterError::Fault {
                    reason: FaultReason::ProgramStackOverflow,
                    instruction: index,
                });
            }
            if self.sp == 0 || self.sp > OPSTACK_SIZE {
                return Err(InterpreterError::Fault {
                    reason: FaultReason::OperandStackOverflow,
                    instruction: index,
                });
            }

            let instr = self.memory.instruction(index);
            self.ip += 1;

            let state = self.step(instr).map_err(|reason| InterpreterError::Fault {
                reason,
                instruction: index,
            })?;

            match state {
                ExecuteState::Proceed => (),
                ExecuteState::Returned => break,
            }
        }

        // the entry frame must come back intact before it is popped
        let found = self.read_cell(4).map_err(entry_fault)?;
        if found != frame_size as i32 {
            return Err(InterpreterError::UnbalancedExit {
                expected: frame_size as i32,
                found,
            });
        }
        self.frame = self.frame.wrapping_add(frame_size);
        *self.saved_stack = self.frame;

        // the return value was pushed just before the final Leave
        Ok(self.top())
    }

    fn step(&mut self, instr: Instruction) -> Result<ExecuteState, FaultReason> {
        use ExecuteState::Proceed;

        let param = instr.param();

        match instr.opcode() {
            Opcode::Undef => return Err(FaultReason::UnhandledOpcode),

            Opcode::Nop | Opcode::Break => (),

            Opcode::Enter => {
                self.frame = self.frame.wrapping_sub(param as u32);
                // return index stays blank until a Call in this function
                // fills it
                self.write_cell(0, 0)?;
                self.write_cell(4, param)?;
            }

            Opcode::Leave => {
                if self.read_cell(4)? != param {
                    return Err(FaultReason::FrameSizeMismatch);
                }
                self.frame = self.frame.wrapping_add(param as u32);

                let caller = self.read_cell(0)?;
                if caller < 0 {
                    return Ok(ExecuteState::Returned);
                }
                self.ip = self.memory.mask_jump(caller);
            }

            Opcode::Call => {
                let target = self.pop();

                if target < 0 {
                    self.engine_trap(target);
                } else {
                    // the index of the instruction after Call, for Leave to
                    // come back to
                    self.write_cell(0, self.ip as i32)?;
                    self.ip = self.memory.mask_jump(target);
                }
            }

            Opcode::Push => self.push(0),
            Opcode::Pop => {
                self.pop();
            }
            Opcode::Const => self.push(param),
            Opcode::Local => self.push(self.frame.wrapping_add(param as u32) as i32),

            Opcode::Jump => {
                let target = self.pop();
                self.ip = self.memory.mask_jump(target);
            }

            Opcode::Eq => self.branch_i(param, |a, b| a == b),
            Opcode::Ne => self.branch_i(param, |a, b| a != b),
            Opcode::Lti => self.branch_i(param, |a, b| a < b),
            Opcode::Lei => self.branch_i(param, |a, b| a <= b),
            Opcode::Gti => self.branch_i(param, |a, b| a > b),
            Opcode::Gei => self.branch_i(param, |a, b| a >= b),
            Opcode::Ltu => self.branch_u(param, |a, b| a < b),
            Opcode::Leu => self.branch_u(param, |a, b| a <= b),
            Opcode::Gtu => self.branch_u(param, |a, b| a > b),
            Opcode::Geu => self.branch_u(param, |a, b| a >= b),
            Opcode::Eqf => self.branch_f(param, |a, b| a == b),
            Opcode::Nef => self.branch_f(param, |a, b| a != b),
            Opcode::Ltf => self.branch_f(param, |a, b| a < b),
            Opcode::Lef => self.branch_f(param, |a, b| a <= b),
            Opcode::Gtf => self.branch_f(param, |a, b| a > b),
            Opcode::Gef => self.branch_f(param, |a, b| a >= b),

            Opcode::Load1 => {
                let value = self.memory.read_u8(self.top() as u32)?;
                self.set_top(value as i32);
            }
            Opcode::Load2 => {
                let value = self.memory.read_u16(self.top() as u32)?;
                self.set_top(value as i32);
            }
            Opcode::Load4 => {
                let value = self.memory.read_u32(self.top() as u32)?;
                self.set_top(value as i32);
            }

            Opcode::Store1 => self.store(|mem, addr, v| mem.write_u8(addr, v))?,
            Opcode::Store2 => self.store(|mem, addr, v| mem.write_u16(addr, v))?,
            Opcode::Store4 => self.store(|mem, addr, v| mem.write_u32(addr, v))?,

            Opcode::Arg => {
                // fill an argument slot for the frame an upcoming Call will
                // create
                let value = self.pop();
                self.write_cell(param as u32, value)?;
            }

            Opcode::BlockCopy => {
                let src = self.opstack[self.sp] as u32;
                let dst = self.opstack[self.sp + 1] as u32;
                self.sp += 2;
                self.memory.block_copy(dst, src, param)?;
            }

            Opcode::Sex8 => self.set_top(self.top() as u8 as i8 as i32),
            Opcode::Sex16 => self.set_top(self.top() as u16 as i16 as i32),

            Opcode::Negi => self.set_top(self.top().wrapping_neg()),
            Opcode::Add => self.binop_i(i32::wrapping_add),
            Opcode::Sub => self.binop_i(i32::wrapping_sub),
            Opcode::Divi => {
                self.check_divisor()?;
                self.binop_i(i32::wrapping_div);
            }
            Opcode::Divu => {
                self.check_divisor()?;
                self.binop_u(u32::wrapping_div);
            }
            Opcode::Modi => {
                self.check_divisor()?;
                self.binop_i(i32::wrapping_rem);
            }
            Opcode::Modu => {
                self.check_divisor()?;
                self.binop_u(u32::wrapping_rem);
            }
            Opcode::Muli => self.binop_i(i32::wrapping_mul),
            Opcode::Mulu => self.binop_u(u32::wrapping_mul),
            Opcode::Band => self.binop_i(|a, b| a & b),
            Opcode::Bor => self.binop_i(|a, b| a | b),
            Opcode::Bxor => self.binop_i(|a, b| a ^ b),
            Opcode::Bcom => self.set_top(!self.top()),
            Opcode::Lsh => self.binop_u(|a, b| a.wrapping_shl(b)),
            Opcode::Rshi => self.binop_i(|a, b| a.wrapping_shr(b as u32)),
            Opcode::Rshu => self.binop_u(|a, b| a.wrapping_shr(b)),

            Opcode::Negf => self.set_top(float_unop(self.top(), |a| -a)),
            Opcode::Addf => self.binop_f(|a, b| a + b),
            Opcode::Subf => self.binop_f(|a, b| a - b),
            Opcode::Divf => {
                // both signed zeros count as zero divisors
                let divisor = self.opstack[self.sp];
                if divisor == 0 || divisor as u32 == 0x8000_0000 {
                    return Err(FaultReason::DivisionByZero);
                }
                self.binop_f(|a, b| a / b);
            }
            Opcode::Mulf => self.binop_f(|a, b| a * b),

            Opcode::Cvif => self.set_top((self.top() as f32).to_bits() as i32),
            Opcode::Cvfi => self.set_top(f32::from_bits(self.top() as u32) as i32),
        }

        Ok(Proceed)
    }

    /// Route a negative call target to the engine dispatcher, keeping the
    /// saved program-stack pointer coherent across the call.
    fn engine_trap(&mut self, target: i32) {
        *self.saved_stack = self.frame;

        let number = target.wrapping_neg().wrapping_sub(1) as u32;
        let args_at = self.frame.wrapping_add(8) as usize;
        let memory = SyscallMemory::new(self.memory.data_mut(), args_at);

        let ret = self.engine.syscall(memory, number);

        // the dispatcher may have moved the instance's view of the stack
        self.frame = *self.saved_stack;

        self.push(ret);
    }

    fn push(&mut self, value: i32) {
        self.sp -= 1;
        self.opstack[self.sp] = value;
    }

    fn pop(&mut self) -> i32 {
        let value = self.opstack[self.sp];
        self.sp += 1;
        value
    }

    fn top(&self) -> i32 {
        self.opstack[self.sp]
    }

    fn set_top(&mut self, value: i32) {
        self.opstack[self.sp] = value;
    }

    /// Apply `f` to (second, top), leave the result in the second cell, pop.
    fn binop_i(&mut self, f: impl FnOnce(i32, i32) -> i32) {
        self.opstack[self.sp + 1] = f(self.opstack[self.sp + 1], self.opstack[self.sp]);
        self.sp += 1;
    }

    fn binop_u(&mut self, f: impl FnOnce(u32, u32) -> u32) {
        self.binop_i(|a, b| f(a as u32, b as u32) as i32);
    }

    fn binop_f(&mut self, f: impl FnOnce(f32, f32) -> f32) {
        self.binop_i(|a, b| {
            f(f32::from_bits(a as u32), f32::from_bits(b as u32)).to_bits() as i32
        });
    }

    /// Branch to `target` when `f(second, top)` holds; pop both.
    fn branch_i(&mut self, target: i32, f: impl FnOnce(i32, i32) -> bool) {
        if f(self.opstack[self.sp + 1], self.opstack[self.sp]) {
            self.ip = self.memory.mask_jump(target);
        }
        self.sp += 2;
    }

    fn branch_u(&mut self, target: i32, f: impl FnOnce(u32, u32) -> bool) {
        self.branch_i(target, |a, b| f(a as u32, b as u32));
    }

    fn branch_f(&mut self, target: i32, f: impl FnOnce(f32, f32) -> bool) {
        self.branch_i(target, |a, b| {
            f(f32::from_bits(a as u32), f32::from_bits(b as u32))
        });
    }

    /// Store the top cell through the address in the second cell; pop both.
    fn store(
        &mut self,
        write: impl FnOnce(&mut VmMemory, u32, u32) -> Result<(), FaultReason>,
    ) -> Result<(), FaultReason> {
        let value = self.opstack[self.sp] as u32;
        let addr = self.opstack[self.sp + 1] as u32;
        self.sp += 2;
        write(self.memory, addr, value)
    }

    fn check_divisor(&self) -> Result<(), FaultReason> {
        if self.opstack[self.sp] == 0 {
            return Err(FaultReason::DivisionByZero);
        }
        Ok(())
    }

    /// Read a 32-bit cell of the current program-stack frame.
    fn read_cell(&self, offset: u32) -> Result<i32, FaultReason> {
        Ok(self.memory.read_u32(self.frame.wrapping_add(offset))? as i32)
    }

    /// Write a 32-bit cell of the current program-stack frame.
    fn write_cell(&mut self, offset: u32, value: i32) -> Result<(), FaultReason> {
        self.memory
            .write_u32(self.frame.wrapping_add(offset), value as u32)
    }
}

fn float_unop(bits: i32, f: impl FnOnce(f32) -> f32) -> i32 {
    f(f32::from_bits(bits as u32)).to_bits() as i32
}
