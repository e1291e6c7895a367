use core::fmt;

/// Instruction set of the QVM stack machine.
///
/// The numbering is part of the binary format and must not change: the
/// on-disk code stream stores these values as single opcode bytes, in the
/// order fixed by the original q3asm toolchain.
///
/// Binary operations consume the top two operand-stack cells and leave their
/// result in the second-from-top cell before popping once. The operand-stack
/// cell is a 32-bit container; whether it is read as signed, unsigned or an
/// IEEE-754 binary32 is decided per opcode, by reinterpretation of the bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Opcode {
    /// Never emitted by the assembler; fills the code-segment padding so a
    /// masked jump past the last real instruction traps instead of running
    /// off into arbitrary memory.
    Undef = 0x00,
    /// No operation.
    Nop = 0x01,
    /// Debugger breakpoint. Treated as a no-op.
    Break = 0x02,
    /// Enter a function: grow the program stack by `param` bytes and
    /// initialize the new frame's return-index and frame-size cells.
    Enter = 0x03,
    /// Leave a function: validate the frame-size cell against `param`, drop
    /// the frame, and jump to the caller's stored return index. A negative
    /// return index ends execution.
    Leave = 0x04,
    /// Call the instruction index popped from the operand stack. Negative
    /// targets are engine traps and are routed to the syscall dispatcher.
    Call = 0x05,
    /// Push a zero cell (placeholder for an unused return value).
    Push = 0x06,
    /// Pop and discard the top cell.
    Pop = 0x07,
    /// Push the 32-bit immediate.
    Const = 0x08,
    /// Push the data-segment-relative address of `param` bytes above the
    /// current frame.
    Local = 0x09,
    /// Jump to the instruction index popped from the operand stack.
    Jump = 0x0a,
    /// Branch to `param` if the two top cells compare equal (signed).
    Eq = 0x0b,
    /// Branch to `param` if the two top cells compare unequal (signed).
    Ne = 0x0c,
    /// Branch to `param` on signed less-than.
    Lti = 0x0d,
    /// Branch to `param` on signed less-or-equal.
    Lei = 0x0e,
    /// Branch to `param` on signed greater-than.
    Gti = 0x0f,
    /// Branch to `param` on signed greater-or-equal.
    Gei = 0x10,
    /// Branch to `param` on unsigned less-than.
    Ltu = 0x11,
    /// Branch to `param` on unsigned less-or-equal.
    Leu = 0x12,
    /// Branch to `param` on unsigned greater-than.
    Gtu = 0x13,
    /// Branch to `param` on unsigned greater-or-equal.
    Geu = 0x14,
    /// Branch to `param` on float equality.
    Eqf = 0x15,
    /// Branch to `param` on float inequality.
    Nef = 0x16,
    /// Branch to `param` on float less-than.
    Ltf = 0x17,
    /// Branch to `param` on float less-or-equal.
    Lef = 0x18,
    /// Branch to `param` on float greater-than.
    Gtf = 0x19,
    /// Branch to `param` on float greater-or-equal.
    Gef = 0x1a,
    /// Replace the top cell with the zero-extended byte it addresses.
    Load1 = 0x1b,
    /// Replace the top cell with the zero-extended 16-bit word it addresses.
    Load2 = 0x1c,
    /// Replace the top cell with the 32-bit word it addresses.
    Load4 = 0x1d,
    /// Store the low byte of the top cell at the address in the second cell.
    Store1 = 0x1e,
    /// Store the low 16 bits of the top cell at the address in the second
    /// cell.
    Store2 = 0x1f,
    /// Store the top cell at the address in the second cell.
    Store4 = 0x20,
    /// Store the top cell `param` bytes above the program-stack pointer,
    /// filling an argument slot for an upcoming call.
    Arg = 0x21,
    /// Copy `param` bytes between the two data-segment addresses on the
    /// operand stack.
    BlockCopy = 0x22,
    /// Sign-extend the low 8 bits of the top cell.
    Sex8 = 0x23,
    /// Sign-extend the low 16 bits of the top cell.
    Sex16 = 0x24,
    /// Arithmetic negation of the top cell.
    Negi = 0x25,
    /// Integer addition.
    Add = 0x26,
    /// Integer subtraction.
    Sub = 0x27,
    /// Signed division. Traps when the divisor is zero.
    Divi = 0x28,
    /// Unsigned division. Traps when the divisor is zero.
    Divu = 0x29,
    /// Signed remainder. Traps when the divisor is zero.
    Modi = 0x2a,
    /// Unsigned remainder. Traps when the divisor is zero.
    Modu = 0x2b,
    /// Signed multiplication.
    Muli = 0x2c,
    /// Unsigned multiplication.
    Mulu = 0x2d,
    /// Bitwise AND.
    Band = 0x2e,
    /// Bitwise OR.
    Bor = 0x2f,
    /// Bitwise XOR.
    Bxor = 0x30,
    /// Bitwise complement of the top cell.
    Bcom = 0x31,
    /// Left shift.
    Lsh = 0x32,
    /// Arithmetic (sign-propagating) right shift.
    Rshi = 0x33,
    /// Logical right shift.
    Rshu = 0x34,
    /// Float negation of the top cell.
    Negf = 0x35,
    /// Float addition.
    Addf = 0x36,
    /// Float subtraction.
    Subf = 0x37,
    /// Float division. Traps when the divisor is either signed zero.
    Divf = 0x38,
    /// Float multiplication.
    Mulf = 0x39,
    /// Convert the top cell from signed integer to float, in place.
    Cvif = 0x3a,
    /// Convert the top cell from float to signed integer, in place.
    Cvfi = 0x3b,
}

/// Immediate operand carried by an encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    /// No immediate; the decoded parameter is zero.
    None,
    /// One byte, zero-extended to 32 bits.
    Byte,
    /// Four bytes, little-endian signed.
    Word,
}

impl Opcode {
    /// Number of defined opcodes. Opcode bytes at or above this value reject
    /// at load time.
    pub const COUNT: usize = 0x3c;

    /// Immediate operand class of this opcode in the encoded stream.
    pub const fn immediate(self) -> Immediate {
        use Opcode::*;

        match self {
            Enter | Leave | Const | Local | BlockCopy | Eq | Ne | Lti | Lei | Gti | Gei | Ltu
            | Leu | Gtu | Geu | Eqf | Nef | Ltf | Lef | Gtf | Gef => Immediate::Word,
            Arg => Immediate::Byte,
            _ => Immediate::None,
        }
    }
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Undef
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The byte can't be mapped to any defined [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode(pub u8);

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode byte {:#04x}", self.0)
    }
}

impl std::error::Error for InvalidOpcode {}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use Opcode::*;

        Ok(match b {
            0x00 => Undef,
            0x01 => Nop,
            0x02 => Break,
            0x03 => Enter,
            0x04 => Leave,
            0x05 => Call,
            0x06 => Push,
            0x07 => Pop,
            0x08 => Const,
            0x09 => Local,
            0x0a => Jump,
            0x0b => Eq,
            0x0c => Ne,
            0x0d => Lti,
            0x0e => Lei,
            0x0f => Gti,
            0x10 => Gei,
            0x11 => Ltu,
            0x12 => Leu,
            0x13 => Gtu,
            0x14 => Geu,
            0x15 => Eqf,
            0x16 => Nef,
            0x17 => Ltf,
            0x18 => Lef,
            0x19 => Gtf,
            0x1a => Gef,
            0x1b => Load1,
            0x1c => Load2,
            0x1d => Load4,
            0x1e => Store1,
            0x1f => Store2,
            0x20 => Store4,
            0x21 => Arg,
            0x22 => BlockCopy,
            0x23 => Sex8,
            0x24 => Sex16,
            0x25 => Negi,
            0x26 => Add,
            0x27 => Sub,
            0x28 => Divi,
            0x29 => Divu,
            0x2a => Modi,
            0x2b => Modu,
            0x2c => Muli,
            0x2d => Mulu,
            0x2e => Band,
            0x2f => Bor,
            0x30 => Bxor,
            0x31 => Bcom,
            0x32 => Lsh,
            0x33 => Rshi,
            0x34 => Rshu,
            0x35 => Negf,
            0x36 => Addf,
            0x37 => Subf,
            0x38 => Divf,
            0x39 => Mulf,
            0x3a => Cvif,
            0x3b => Cvfi,
            _ => return Err(InvalidOpcode(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_byte_round_trip() {
        for (i, op) in Opcode::iter().enumerate() {
            assert_eq!(op as usize, i);
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }

        assert_eq!(Opcode::iter().count(), Opcode::COUNT);

        for b in Opcode::COUNT as u8..=u8::MAX {
            assert_eq!(Opcode::try_from(b), Err(InvalidOpcode(b)));
        }
    }

    #[test]
    fn immediate_classes_match_encoded_widths() {
        use Opcode::*;

        let words = [
            Eq, Ne, Lti, Lei, Gti, Gei, Ltu, Leu, Gtu, Geu, Eqf, Nef, Ltf, Lef, Gtf, Gef, Enter,
            Leave, Const, Local, BlockCopy,
        ];

        for op in Opcode::iter() {
            let expected = if words.contains(&op) {
                Immediate::Word
            } else if op == Arg {
                Immediate::Byte
            } else {
                Immediate::None
            };

            assert_eq!(op.immediate(), expected, "{op}");
        }
    }
}
