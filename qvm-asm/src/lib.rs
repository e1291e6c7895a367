//! Atomic types of the QVM bytecode format.
//!
//! A QVM image carries a variable-length instruction stream that the loader
//! expands into the fixed-width form defined here. This crate holds only the
//! pieces shared between the loader and the interpreter: the instruction set,
//! the decoded instruction cell, and the runtime fault taxonomy.

#![warn(missing_docs)]

mod fault;
mod instruction;
mod opcode;

pub use fault::FaultReason;
pub use instruction::Instruction;
pub use opcode::{Immediate, InvalidOpcode, Opcode};
