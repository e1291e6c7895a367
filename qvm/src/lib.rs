//! QVM bytecode interpreter.
//!
//! Executes the portable gametype modules of Quake III-lineage engines when
//! no native library is available. A QVM image is an untrusted binary file:
//! the loader validates its header and expands the variable-length code
//! stream into fixed-width cells, the memory model folds every module
//! address into a power-of-two segment with a single mask, and the
//! interpreter runs a two-stack machine (program stack for call frames and
//! locals, operand stack for temporaries) that hands negative call targets
//! to the host's engine-trap dispatcher.
//!
//! ```
//! use qvm::prelude::*;
//!
//! // ENTER 8 / LOCAL 20 / LOAD4 / LEAVE 8 — return the entry call's first
//! // argument after the command word
//! let program = [
//!     Instruction::new(Opcode::Enter, 8),
//!     Instruction::new(Opcode::Local, 20),
//!     Instruction::new(Opcode::Load4, 0),
//!     Instruction::new(Opcode::Leave, 8),
//! ];
//!
//! let mut code = Vec::new();
//! for instr in program {
//!     instr.encode_into(&mut code);
//! }
//!
//! let mut file = Vec::new();
//! for word in [
//!     0x12721444u32,          // magic
//!     program.len() as u32,   // instruction count
//!     32,                     // code offset
//!     code.len() as u32,      // code length
//!     32 + code.len() as u32, // data offset
//!     0,                      // data length
//!     0,                      // lit length
//!     0x10000,                // bss length (holds the program stack)
//! ] {
//!     file.extend_from_slice(&word.to_le_bytes());
//! }
//! file.extend_from_slice(&code);
//!
//! let mut vm = Vm::new(|_memory: SyscallMemory<'_>, _number: u32| 0);
//! vm.load(&file, LoadOptions::default())?;
//!
//! assert_eq!(vm.exec(&[0, 42]), 42);
//! # Ok::<(), qvm::error::LoadError>(())
//! ```

pub mod alloc;
pub mod consts;
pub mod error;
pub mod header;
pub mod interpreter;
pub mod memory;
pub mod syscall;

pub mod prelude {
    //! Re-exports of the types most hosts need.

    pub use qvm_asm::{FaultReason, Immediate, Instruction, InvalidOpcode, Opcode};

    pub use crate::alloc::{HeapAlloc, MemoryAlloc};
    pub use crate::error::{InterpreterError, LoadError};
    pub use crate::header::QvmHeader;
    pub use crate::interpreter::{LoadOptions, Vm};
    pub use crate::memory::VmMemory;
    pub use crate::syscall::{EngineCalls, SyscallMemory};
}
