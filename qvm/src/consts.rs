//! VM parameters

/// Magic word leading every QVM file, stored as the little-endian bytes
/// `44 14 72 12`.
pub const QVM_MAGIC: u32 = 0x12721444;

/// Size of the file header in bytes: eight little-endian 32-bit words.
pub const HEADER_SIZE: usize = 32;

/// Operand-stack capacity in cells, the same amount the original engine uses.
pub const OPSTACK_SIZE: usize = 1024;

/// Extra cells past the operand-stack capacity so instructions that peek two
/// cells can read harmlessly from an empty stack.
pub const OPSTACK_SLACK: usize = 2;

/// Base program-stack size in bytes. Set by q3asm for all QVM-compatible
/// games.
pub const PROGRAM_STACK_SIZE: usize = 0x10000;

/// Extra data-segment bytes reserved to enlarge the program stack beyond
/// [`PROGRAM_STACK_SIZE`].
pub const EXTRA_PROGRAM_STACK_SIZE: usize = 0;

/// Largest wire encoding of a single instruction: one opcode byte plus a
/// 4-byte immediate. Bounds the plausible instruction count of a code
/// segment from below.
pub const MAX_ENCODED_INSTRUCTION: usize = 5;
