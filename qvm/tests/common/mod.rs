//! Shared helpers that assemble loadable QVM images for tests.

#![allow(dead_code)]

use qvm::consts::{HEADER_SIZE, QVM_MAGIC};
use qvm::prelude::*;

/// Assembles a QVM image from a program and an optional data segment.
///
/// The default bss reserves the standard program stack, which real images
/// always carry.
pub struct ImageBuilder {
    program: Vec<Instruction>,
    data: Vec<u8>,
    lit: Vec<u8>,
    bss_len: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            program: Vec::new(),
            data: Vec::new(),
            lit: Vec::new(),
            bss_len: 0x10000,
        }
    }

    pub fn op(mut self, op: Opcode, param: i32) -> Self {
        self.program.push(Instruction::new(op, param));
        self
    }

    pub fn plain(self, op: Opcode) -> Self {
        self.op(op, 0)
    }

    pub fn ops(mut self, ops: &[(Opcode, i32)]) -> Self {
        for &(op, param) in ops {
            self.program.push(Instruction::new(op, param));
        }
        self
    }

    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn lit(mut self, bytes: &[u8]) -> Self {
        self.lit.extend_from_slice(bytes);
        self
    }

    pub fn bss(mut self, len: u32) -> Self {
        self.bss_len = len;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut code = Vec::new();
        for instr in &self.program {
            instr.encode_into(&mut code);
        }

        let code_offset = HEADER_SIZE as u32;
        let data_offset = code_offset + code.len() as u32;

        let words = [
            QVM_MAGIC,
            self.program.len() as u32,
            code_offset,
            code.len() as u32,
            data_offset,
            self.data.len() as u32,
            self.lit.len() as u32,
            self.bss_len,
        ];

        let mut file = Vec::new();
        for word in words {
            file.extend_from_slice(&word.to_le_bytes());
        }
        file.extend_from_slice(&code);
        file.extend_from_slice(&self.data);
        file.extend_from_slice(&self.lit);
        file
    }
}

/// Dispatcher for programs that never trap.
pub fn no_traps() -> impl FnMut(SyscallMemory<'_>, u32) -> i32 {
    |_: SyscallMemory<'_>, _: u32| 0
}

/// Load `image` into a fresh VM with default options.
pub fn load_vm(image: &[u8]) -> Vm<impl EngineCalls> {
    let mut vm = Vm::new(no_traps());
    vm.load(image, LoadOptions::default()).expect("image loads");
    vm
}

/// Build a program around an `Enter 8 .. Leave 8` shell, run it with the
/// given arguments, and hand back its return value.
pub fn run_body(body: &[(Opcode, i32)], args: &[i32]) -> i32 {
    let image = ImageBuilder::new()
        .op(Opcode::Enter, 8)
        .ops(body)
        .op(Opcode::Leave, 8)
        .build();

    load_vm(&image).exec(args)
}
