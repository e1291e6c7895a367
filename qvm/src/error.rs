//! Loader and interpreter error implementation

use qvm_asm::FaultReason;
use thiserror::Error;

/// Static rejection of a QVM image. The VM handle is left unloaded and may
/// be handed another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The handle already holds a loaded image; unload it first.
    #[error("the VM is already loaded")]
    AlreadyLoaded,
    /// The file can't even hold the header.
    #[error("file of {0} bytes is too small for the header")]
    FileTooSmall(usize),
    /// The leading magic word is wrong.
    #[error("incorrect magic number {0:#010x}")]
    BadMagic(u32),
    /// The combined segment lengths don't fit in the file.
    #[error("file of {file} bytes is too small for the declared segment sizes")]
    SegmentsExceedFile {
        /// Total file size in bytes.
        file: usize,
    },
    /// A segment's offset/length pair reaches outside the file.
    #[error("{segment} segment offset/length has an invalid value")]
    SegmentOutOfFile {
        /// Which segment was rejected.
        segment: &'static str,
    },
    /// The declared instruction count can't describe the code segment: each
    /// encoded instruction is between one and five bytes.
    #[error("instruction count {count} is implausible for {code_len} code bytes")]
    BadInstructionCount {
        /// Declared instruction count.
        count: u32,
        /// Declared code-segment length in bytes.
        code_len: u32,
    },
    /// The encoded stream ran out before the declared instruction count was
    /// decoded.
    #[error("code stream ended while decoding instruction {index}")]
    TruncatedInstruction {
        /// Index of the instruction that could not be read.
        index: u32,
    },
    /// An opcode byte outside the defined range.
    #[error("invalid opcode value {opcode:#04x} at instruction {index}")]
    InvalidOpcode {
        /// Index of the offending instruction.
        index: u32,
        /// The rejected opcode byte.
        opcode: u8,
    },
}

/// Runtime failure of an `exec` call. Any of these unloads the VM instance;
/// the host sees a zero return and may reload from the original file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum InterpreterError {
    /// An instruction raised a fault.
    #[error("runtime fault at instruction {instruction}: {reason}")]
    Fault {
        /// What went wrong.
        reason: FaultReason,
        /// Index of the faulting instruction.
        instruction: usize,
    },
    /// After the outermost frame returned, its stored frame size no longer
    /// matched the size it was created with.
    #[error("entry stack frame size {found} does not match {expected} after execution")]
    UnbalancedExit {
        /// Frame size written at entry.
        expected: i32,
        /// Frame size found on exit.
        found: i32,
    },
}
