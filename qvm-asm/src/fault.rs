use core::fmt;

/// Runtime fault taxonomy of the interpreter.
///
/// Every fault is fatal for the VM instance that raised it: the interpreter
/// unloads the instance and reports zero to the caller. These reasons exist
/// so the host log can say which contract was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
#[non_exhaustive]
pub enum FaultReason {
    /// Execution reached `Undef` or an undecodable cell, usually by jumping
    /// into the code-segment padding.
    UnhandledOpcode = 0x00,
    /// The program-stack pointer left the stack band at the tail of the data
    /// segment.
    ProgramStackOverflow = 0x01,
    /// The operand-stack pointer left its 1024-cell band.
    OperandStackOverflow = 0x02,
    /// A `Leave` immediate disagreed with the frame-size cell written by the
    /// matching `Enter`.
    FrameSizeMismatch = 0x03,
    /// Integer or float division (or remainder) by zero.
    DivisionByZero = 0x04,
    /// With data verification disabled, an unmasked address fell outside the
    /// data segment.
    BadDataAccess = 0x05,
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnhandledOpcode => write!(f, "unhandled opcode"),
            Self::ProgramStackOverflow => write!(f, "program stack overflow"),
            Self::OperandStackOverflow => write!(f, "operand stack overflow"),
            Self::FrameSizeMismatch => write!(f, "frame size mismatch on leave"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::BadDataAccess => write!(f, "unverified data access out of bounds"),
        }
    }
}

impl std::error::Error for FaultReason {}
