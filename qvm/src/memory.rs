//! Segmented VM memory and the masks that sandbox it

use qvm_asm::{FaultReason, Instruction};

use tracing::{debug, warn};

use crate::alloc::MemoryAlloc;
use crate::consts::{EXTRA_PROGRAM_STACK_SIZE, PROGRAM_STACK_SIZE};

/// The VM's single backing buffer and the segment geometry carved out of it.
///
/// Layout is `| code | data |`: the decoded instruction cells first, then the
/// flat byte space the loaded program sees as starting at address zero. The
/// program stack occupies the tail of the data segment and grows downward
/// into the bss region.
///
/// Both segment sizes are rounded up to the next power of two. That turns
/// every address computation into a single mask with `size - 1` instead of a
/// branchy bounds check, and the zero-filled code padding created by the
/// round-up decodes as `Undef`, so a masked jump past the last real
/// instruction traps.
#[derive(Debug)]
pub struct VmMemory {
    bytes: Box<[u8]>,
    code_size: usize,
    data_size: usize,
    instruction_capacity: usize,
    data_mask: u32,
    verify_data: bool,
    program_stack_size: usize,
}

/// Round up to the next power of two, keeping zero at zero the way the
/// original bit-smearing macro does.
fn round_pow2(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        n.next_power_of_two()
    }
}

impl VmMemory {
    /// Allocate and partition the backing buffer for a program with
    /// `instruction_count` instructions and `data_total` bytes of
    /// data + literals + bss.
    pub(crate) fn with_layout(
        instruction_count: u32,
        data_total: u64,
        verify_data: bool,
        allocator: &dyn MemoryAlloc,
    ) -> Self {
        let code_size = round_pow2(instruction_count as usize * Instruction::SIZE);

        // The stack keeps its base size plus whatever slack the power-of-two
        // round-up of the data segment produced.
        let raw_data_size = data_total as usize + EXTRA_PROGRAM_STACK_SIZE;
        let data_size = round_pow2(raw_data_size);
        let program_stack_size =
            PROGRAM_STACK_SIZE + (data_size - raw_data_size) + EXTRA_PROGRAM_STACK_SIZE;

        let bytes = allocator.allocate(code_size + data_size);

        debug!(
            code_size,
            data_size, program_stack_size, verify_data, "partitioned VM memory"
        );

        Self {
            bytes,
            code_size,
            data_size,
            instruction_capacity: code_size / Instruction::SIZE,
            data_mask: if verify_data {
                (data_size as u32).wrapping_sub(1)
            } else {
                u32::MAX
            },
            verify_data,
            program_stack_size,
        }
    }

    /// Total size of the backing buffer in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Size of the code segment in bytes (a power of two).
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Size of the data segment in bytes (a power of two).
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Number of decoded-instruction cells the code segment can hold,
    /// including the trapping padding.
    pub fn instruction_capacity(&self) -> usize {
        self.instruction_capacity
    }

    /// Size of the program-stack band at the tail of the data segment.
    pub fn program_stack_size(&self) -> usize {
        self.program_stack_size
    }

    /// Lowest data-segment offset the program stack may reach.
    pub fn program_stack_floor(&self) -> usize {
        self.data_size.saturating_sub(self.program_stack_size)
    }

    /// Initial program-stack pointer: one past the end of the data segment.
    pub fn initial_program_stack(&self) -> u32 {
        self.data_size as u32
    }

    /// Whether data addresses are folded into the segment before use.
    pub fn verify_data(&self) -> bool {
        self.verify_data
    }

    /// The data segment.
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.code_size..]
    }

    /// The data segment, writable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.code_size..]
    }

    /// Surrender the backing buffer so the recorded allocator can reclaim it.
    pub(crate) fn into_raw(self) -> Box<[u8]> {
        self.bytes
    }

    /// The decoded instruction at `index`. Indexes past the capacity (only
    /// possible on an empty code segment) read as `Undef`.
    pub fn instruction(&self, index: usize) -> Instruction {
        if index >= self.instruction_capacity {
            return Instruction::default();
        }

        let at = index * Instruction::SIZE;
        let mut cell = [0u8; Instruction::SIZE];
        cell.copy_from_slice(&self.bytes[at..at + Instruction::SIZE]);

        Instruction::from_cell(cell)
    }

    pub(crate) fn store_instruction(&mut self, index: usize, instr: Instruction) {
        let at = index * Instruction::SIZE;
        self.bytes[at..at + Instruction::SIZE].copy_from_slice(&instr.to_cell());
    }

    /// Fold a jump target into the decoded-instruction index range, so every
    /// landing index is strictly below the capacity.
    pub fn mask_jump(&self, target: i32) -> usize {
        target as u32 as usize & self.instruction_capacity.wrapping_sub(1)
    }

    /// Reduce a VM address to a data-segment offset with room for a
    /// `width`-byte access. With verification on, the mask keeps the offset
    /// inside the segment and only an access crossing the segment end can
    /// fail; with verification off, any stray address fails here instead of
    /// touching foreign memory.
    fn offset(&self, addr: u32, width: usize) -> Result<usize, FaultReason> {
        let at = (addr & self.data_mask) as usize;

        if at + width > self.data_size {
            return Err(FaultReason::BadDataAccess);
        }

        Ok(at)
    }

    /// Read the byte at a VM address, zero-extended.
    pub fn read_u8(&self, addr: u32) -> Result<u32, FaultReason> {
        let at = self.offset(addr, 1)?;
        Ok(u32::from(self.data()[at]))
    }

    /// Read the little-endian 16-bit word at a VM address, zero-extended.
    pub fn read_u16(&self, addr: u32) -> Result<u32, FaultReason> {
        let at = self.offset(addr, 2)?;
        let data = self.data();
        Ok(u32::from(u16::from_le_bytes([data[at], data[at + 1]])))
    }

    /// Read the little-endian 32-bit word at a VM address.
    pub fn read_u32(&self, addr: u32) -> Result<u32, FaultReason> {
        let at = self.offset(addr, 4)?;
        let data = self.data();
        Ok(u32::from_le_bytes([
            data[at],
            data[at + 1],
            data[at + 2],
            data[at + 3],
        ]))
    }

    /// Write the low byte of `value` at a VM address.
    pub fn write_u8(&mut self, addr: u32, value: u32) -> Result<(), FaultReason> {
        let at = self.offset(addr, 1)?;
        self.data_mut()[at] = value as u8;
        Ok(())
    }

    /// Write the low 16 bits of `value` at a VM address, little-endian.
    pub fn write_u16(&mut self, addr: u32, value: u32) -> Result<(), FaultReason> {
        let at = self.offset(addr, 2)?;
        self.data_mut()[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
        Ok(())
    }

    /// Write `value` at a VM address, little-endian.
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), FaultReason> {
        let at = self.offset(addr, 4)?;
        self.data_mut()[at..at + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Copy `count` bytes from `src` to `dst`, both VM addresses.
    ///
    /// The count is clamped so that neither masked range wraps around the
    /// segment; a clamp that changes the requested count is logged, and a
    /// count clamped to zero or below copies nothing. Equal (masked)
    /// addresses are a no-op.
    pub fn block_copy(&mut self, dst: u32, src: u32, count: i32) -> Result<(), FaultReason> {
        let src_at = src & self.data_mask;
        let dst_at = dst & self.data_mask;

        if src_at == dst_at {
            return Ok(());
        }

        let requested = count;
        let count = (src_at.wrapping_add(count as u32) & self.data_mask).wrapping_sub(src_at);
        let count = (dst_at.wrapping_add(count) & self.data_mask).wrapping_sub(dst_at);
        let count = count as i32;

        if count != requested {
            warn!(
                requested,
                clamped = count,
                src = src_at,
                dst = dst_at,
                "block copy clamped at segment boundary"
            );
        }

        if count <= 0 {
            return Ok(());
        }

        let count = count as usize;
        let (src_at, dst_at) = (src_at as usize, dst_at as usize);

        if src_at + count > self.data_size || dst_at + count > self.data_size {
            return Err(FaultReason::BadDataAccess);
        }

        self.data_mut().copy_within(src_at..src_at + count, dst_at);
        Ok(())
    }
}
