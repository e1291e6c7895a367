//! Image loading: header validation, instruction decode, memory construction

use qvm_asm::{Immediate, Instruction, Opcode};

use tracing::{debug, error};

use crate::alloc::default_allocator;
use crate::error::LoadError;
use crate::header::QvmHeader;
use crate::interpreter::{LoadOptions, LoadedVm, Vm};
use crate::memory::VmMemory;

impl<E> Vm<E> {
    /// Validate `file` as a QVM image and build the VM from it.
    ///
    /// On failure the handle stays unloaded (and the rejection is logged);
    /// on success the handle is ready for [`Vm::exec`]. Loading over an
    /// already-loaded handle is refused without disturbing it.
    pub fn load(&mut self, file: &[u8], options: LoadOptions) -> Result<(), LoadError> {
        if self.is_loaded() {
            return Err(LoadError::AlreadyLoaded);
        }

        match build(file, options) {
            Ok(vm) => {
                self.loaded = Some(vm);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "rejected QVM image");
                Err(e)
            }
        }
    }
}

fn build(file: &[u8], options: LoadOptions) -> Result<LoadedVm, LoadError> {
    let header = QvmHeader::parse(file)?;
    header.validate(file.len())?;

    let allocator = options.allocator.unwrap_or_else(default_allocator);

    let mut memory = VmMemory::with_layout(
        header.instruction_count,
        header.data_total(),
        options.verify_data,
        allocator.as_ref(),
    );

    decode_code(&header, file, &mut memory)?;

    // data and literals are copied verbatim; bss and the round-up slack stay
    // zero from allocation
    let init_len = (header.data_len + header.lit_len) as usize;
    let data_at = header.data_offset as usize;
    memory.data_mut()[..init_len].copy_from_slice(&file[data_at..data_at + init_len]);

    debug!(
        instructions = header.instruction_count,
        data = header.data_len,
        lit = header.lit_len,
        bss = header.bss_len,
        "loaded QVM image"
    );

    Ok(LoadedVm {
        program_stack: memory.initial_program_stack(),
        instruction_count: header.instruction_count,
        file_size: file.len(),
        memory,
        allocator,
    })
}

/// Expand the variable-length encoded stream into fixed-width cells.
fn decode_code(header: &QvmHeader, file: &[u8], memory: &mut VmMemory) -> Result<(), LoadError> {
    let code_at = header.code_offset as usize;
    let code = &file[code_at..code_at + header.code_len as usize];
    let mut at = 0usize;

    for index in 0..header.instruction_count {
        let byte = *code
            .get(at)
            .ok_or(LoadError::TruncatedInstruction { index })?;
        at += 1;

        let op =
            Opcode::try_from(byte).map_err(|_| LoadError::InvalidOpcode { index, opcode: byte })?;

        let param = match op.immediate() {
            Immediate::Word => {
                let bytes = code
                    .get(at..at + 4)
                    .ok_or(LoadError::TruncatedInstruction { index })?;
                at += 4;
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            Immediate::Byte => {
                let byte = *code
                    .get(at)
                    .ok_or(LoadError::TruncatedInstruction { index })?;
                at += 1;
                i32::from(byte)
            }
            Immediate::None => 0,
        };

        memory.store_instruction(index as usize, Instruction::new(op, param));
    }

    Ok(())
}
