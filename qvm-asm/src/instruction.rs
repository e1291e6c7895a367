use core::fmt;

use crate::opcode::{Immediate, Opcode};

/// A decoded instruction: an opcode plus its 32-bit parameter.
///
/// The loader expands the variable-length encoded stream into one of these
/// per source instruction so the interpreter can index by instruction number
/// instead of scanning bytes. In VM memory each instruction occupies one
/// fixed [`Self::SIZE`]-byte cell: the opcode as a little-endian `u32`
/// followed by the parameter as a little-endian `i32`. An all-zero cell is
/// `Undef`, which is what makes zero-filled code-segment padding trap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    op: Opcode,
    param: i32,
}

impl Instruction {
    /// Size of a decoded instruction cell in VM memory, in bytes.
    pub const SIZE: usize = 8;

    /// Construct an instruction. Parameters of no-immediate opcodes are
    /// forced to zero, matching what the loader produces.
    pub const fn new(op: Opcode, param: i32) -> Self {
        let param = match op.immediate() {
            Immediate::None => 0,
            _ => param,
        };

        Self { op, param }
    }

    /// The opcode.
    pub const fn opcode(&self) -> Opcode {
        self.op
    }

    /// The decoded parameter; zero for opcodes without an immediate.
    pub const fn param(&self) -> i32 {
        self.param
    }

    /// Serialize into the fixed-width in-memory cell form.
    pub fn to_cell(self) -> [u8; Self::SIZE] {
        let mut cell = [0u8; Self::SIZE];
        cell[..4].copy_from_slice(&(self.op as u32).to_le_bytes());
        cell[4..].copy_from_slice(&self.param.to_le_bytes());
        cell
    }

    /// Deserialize from the fixed-width in-memory cell form. Cells that do
    /// not hold a defined opcode decode as `Undef` and trap on execution.
    pub fn from_cell(cell: [u8; Self::SIZE]) -> Self {
        let raw = u32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]);
        let param = i32::from_le_bytes([cell[4], cell[5], cell[6], cell[7]]);

        let op = u8::try_from(raw)
            .ok()
            .and_then(|b| Opcode::try_from(b).ok())
            .unwrap_or(Opcode::Undef);

        Self::new(op, param)
    }

    /// Append the wire encoding of this instruction (opcode byte plus its
    /// immediate, if any) to `buf`.
    pub fn encode_into(self, buf: &mut Vec<u8>) {
        buf.push(self.op as u8);

        match self.op.immediate() {
            Immediate::None => (),
            Immediate::Byte => buf.push(self.param as u8),
            Immediate::Word => buf.extend_from_slice(&self.param.to_le_bytes()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op.immediate() {
            Immediate::None => write!(f, "{}", self.op),
            _ => write!(f, "{} {}", self.op, self.param),
        }
    }
}
