//! QVM file header

use crate::consts::{HEADER_SIZE, MAX_ENCODED_INSTRUCTION, QVM_MAGIC};
use crate::error::LoadError;

/// The 32-byte header leading every QVM file: eight little-endian unsigned
/// 32-bit words describing the segments that follow.
///
/// The code region sits at `[code_offset, code_offset + code_len)` and holds
/// the variable-length encoded instruction stream. The data region at
/// `[data_offset, data_offset + data_len + lit_len)` is copied verbatim into
/// the VM; `bss_len` further zero-initialized bytes are implied but not
/// stored in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QvmHeader {
    /// Must equal [`QVM_MAGIC`].
    pub magic: u32,
    /// Number of instructions in the code region.
    pub instruction_count: u32,
    /// File offset of the code region.
    pub code_offset: u32,
    /// Byte length of the code region.
    pub code_len: u32,
    /// File offset of the data region.
    pub data_offset: u32,
    /// Byte length of the initialized-data part of the data region.
    pub data_len: u32,
    /// Byte length of the literal part of the data region.
    pub lit_len: u32,
    /// Implied zero-initialized storage following the data region.
    pub bss_len: u32,
}

impl QvmHeader {
    /// Read the header words off the front of `file`.
    pub fn parse(file: &[u8]) -> Result<Self, LoadError> {
        if file.len() < HEADER_SIZE {
            return Err(LoadError::FileTooSmall(file.len()));
        }

        let word = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([file[at], file[at + 1], file[at + 2], file[at + 3]])
        };

        let header = Self {
            magic: word(0),
            instruction_count: word(1),
            code_offset: word(2),
            code_len: word(3),
            data_offset: word(4),
            data_len: word(5),
            lit_len: word(6),
            bss_len: word(7),
        };

        if header.magic != QVM_MAGIC {
            return Err(LoadError::BadMagic(header.magic));
        }

        Ok(header)
    }

    /// Check the declared segment geometry against the actual file size.
    /// Arithmetic is widened so hostile length combinations can't wrap.
    pub fn validate(&self, file_len: usize) -> Result<(), LoadError> {
        let file = file_len as u64;
        let header = HEADER_SIZE as u64;

        let code_len = u64::from(self.code_len);
        let data_len = u64::from(self.data_len) + u64::from(self.lit_len);

        if header + code_len + data_len > file {
            return Err(LoadError::SegmentsExceedFile { file: file_len });
        }

        if u64::from(self.code_offset) < header
            || u64::from(self.code_offset) > file
            || u64::from(self.code_offset) + code_len > file
        {
            return Err(LoadError::SegmentOutOfFile { segment: "code" });
        }

        if u64::from(self.data_offset) < header
            || u64::from(self.data_offset) > file
            || u64::from(self.data_offset) + data_len > file
        {
            return Err(LoadError::SegmentOutOfFile { segment: "data" });
        }

        if u64::from(self.instruction_count) < code_len / MAX_ENCODED_INSTRUCTION as u64
            || u64::from(self.instruction_count) > code_len
        {
            return Err(LoadError::BadInstructionCount {
                count: self.instruction_count,
                code_len: self.code_len,
            });
        }

        Ok(())
    }

    /// Total bytes of VM-visible data: initialized data, literals, and the
    /// implied zero-filled bss.
    pub fn data_total(&self) -> u64 {
        u64::from(self.data_len) + u64::from(self.lit_len) + u64::from(self.bss_len)
    }
}
