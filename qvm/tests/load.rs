use qvm::consts::{HEADER_SIZE, QVM_MAGIC};
use qvm::prelude::*;

use quickcheck_macros::quickcheck;
use rstest::rstest;

mod common;

use common::{load_vm, no_traps, ImageBuilder};

fn header_only(words: [u32; 8]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[test]
fn degenerate_header_only_image_loads() {
    // zero instructions, zero data: valid, if useless
    let file = header_only([QVM_MAGIC, 0, 32, 0, 32, 0, 0, 0]);

    let mut vm = Vm::new(no_traps());
    vm.load(&file, LoadOptions::default()).expect("valid image");
    assert!(vm.is_loaded());
    assert_eq!(vm.instruction_count(), 0);
}

#[test]
fn bad_magic_is_rejected() {
    let file = header_only([QVM_MAGIC + 1, 0, 32, 0, 32, 0, 0, 0]);

    let mut vm = Vm::new(no_traps());
    assert_eq!(
        vm.load(&file, LoadOptions::default()),
        Err(LoadError::BadMagic(QVM_MAGIC + 1))
    );
    assert!(!vm.is_loaded());
}

#[test]
fn short_file_is_rejected() {
    let mut vm = Vm::new(no_traps());
    assert_eq!(
        vm.load(&[0u8; HEADER_SIZE - 1], LoadOptions::default()),
        Err(LoadError::FileTooSmall(HEADER_SIZE - 1))
    );
}

#[rstest]
// code offset inside the header
#[case([QVM_MAGIC, 0, 16, 0, 32, 0, 0, 0])]
// code offset past the file
#[case([QVM_MAGIC, 0, 4096, 0, 32, 0, 0, 0])]
// code length reaching past the file
#[case([QVM_MAGIC, 1, 32, 4096, 32, 0, 0, 0])]
// data offset inside the header
#[case([QVM_MAGIC, 0, 32, 0, 8, 0, 0, 0])]
// data + lit reaching past the file
#[case([QVM_MAGIC, 0, 32, 0, 32, 4096, 4096, 0])]
// lengths that only fit the file if they wrap
#[case([QVM_MAGIC, 0, 32, u32::MAX, 32, u32::MAX, 0, 0])]
fn invalid_segment_geometry_is_rejected(#[case] words: [u32; 8]) {
    let file = header_only(words);

    let mut vm = Vm::new(no_traps());
    assert!(vm.load(&file, LoadOptions::default()).is_err());
    assert!(!vm.is_loaded());
}

#[test]
fn implausible_instruction_counts_are_rejected() {
    // 10 code bytes can hold at most 10 and at least 2 instructions
    let mut file = header_only([QVM_MAGIC, 1, 32, 10, 42, 0, 0, 0]);
    file.extend_from_slice(&[0u8; 10]);

    let mut vm = Vm::new(no_traps());
    assert_eq!(
        vm.load(&file, LoadOptions::default()),
        Err(LoadError::BadInstructionCount {
            count: 1,
            code_len: 10
        })
    );

    let mut file = header_only([QVM_MAGIC, 11, 32, 10, 42, 0, 0, 0]);
    file.extend_from_slice(&[0u8; 10]);

    assert_eq!(
        vm.load(&file, LoadOptions::default()),
        Err(LoadError::BadInstructionCount {
            count: 11,
            code_len: 10
        })
    );
}

#[test]
fn truncated_instruction_stream_is_rejected() {
    // Enter wants a 4-byte immediate but only the opcode byte is present
    let mut file = header_only([QVM_MAGIC, 1, 32, 1, 33, 0, 0, 0]);
    file.push(Opcode::Enter as u8);

    let mut vm = Vm::new(no_traps());
    assert_eq!(
        vm.load(&file, LoadOptions::default()),
        Err(LoadError::TruncatedInstruction { index: 0 })
    );
}

#[test]
fn invalid_opcode_byte_is_rejected() {
    let mut file = header_only([QVM_MAGIC, 2, 32, 2, 34, 0, 0, 0]);
    file.push(Opcode::Nop as u8);
    file.push(0x3c);

    let mut vm = Vm::new(no_traps());
    assert_eq!(
        vm.load(&file, LoadOptions::default()),
        Err(LoadError::InvalidOpcode {
            index: 1,
            opcode: 0x3c
        })
    );
}

#[test]
fn loading_over_a_loaded_image_is_refused() {
    let image = ImageBuilder::new().plain(Opcode::Break).build();

    let mut vm = Vm::new(no_traps());
    vm.load(&image, LoadOptions::default()).expect("first load");
    assert_eq!(
        vm.load(&image, LoadOptions::default()),
        Err(LoadError::AlreadyLoaded)
    );
    // the refusal must not disturb the loaded image
    assert!(vm.is_loaded());
    assert_eq!(vm.instruction_count(), 1);
}

#[test]
fn unload_returns_the_handle_to_its_initial_state() {
    let image = ImageBuilder::new().plain(Opcode::Break).build();

    let mut vm = Vm::new(no_traps());
    vm.load(&image, LoadOptions::default()).expect("loads");
    assert!(vm.memory_size() > 0);
    assert_eq!(vm.file_size(), image.len());

    vm.unload();
    assert!(!vm.is_loaded());
    assert_eq!(vm.instruction_count(), 0);
    assert_eq!(vm.memory_size(), 0);
    assert_eq!(vm.file_size(), 0);
    assert!(vm.data().is_none());

    // and the same handle accepts a fresh image
    vm.load(&image, LoadOptions::default()).expect("reload");
    assert!(vm.is_loaded());
}

#[test]
fn data_and_literals_are_copied_verbatim() {
    let image = ImageBuilder::new()
        .plain(Opcode::Break)
        .data(&[1, 2, 3, 4])
        .lit(b"hi\0")
        .build();

    let vm = load_vm(&image);
    let data = vm.data().expect("loaded");
    assert_eq!(&data[..7], b"\x01\x02\x03\x04hi\0");
    // bss stays zeroed
    assert_eq!(&data[7..16], &[0; 9]);
}

#[test]
fn custom_allocator_sees_the_release() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingAlloc {
        live: AtomicUsize,
    }

    impl MemoryAlloc for CountingAlloc {
        fn allocate(&self, len: usize) -> Box<[u8]> {
            self.live.fetch_add(1, Ordering::SeqCst);
            vec![0u8; len].into_boxed_slice()
        }

        fn release(&self, mem: Box<[u8]>) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            drop(mem);
        }
    }

    let allocator = Arc::new(CountingAlloc::default());
    let image = ImageBuilder::new().plain(Opcode::Break).build();

    let mut vm = Vm::new(no_traps());
    vm.load(
        &image,
        LoadOptions {
            verify_data: true,
            allocator: Some(allocator.clone()),
        },
    )
    .expect("loads");
    assert_eq!(allocator.live.load(std::sync::atomic::Ordering::SeqCst), 1);

    vm.unload();
    assert_eq!(allocator.live.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[quickcheck]
fn arbitrary_bytes_never_panic_the_loader(bytes: Vec<u8>) -> bool {
    let mut vm = Vm::new(no_traps());

    match vm.load(&bytes, LoadOptions::default()) {
        Ok(()) => vm.is_loaded(),
        Err(_) => !vm.is_loaded(),
    }
}

#[quickcheck]
fn load_unload_round_trip_is_idempotent(data: Vec<u8>, bss: u32) -> bool {
    // cap bss so the test can't allocate gigabytes
    let image = ImageBuilder::new()
        .plain(Opcode::Break)
        .data(&data)
        .bss(bss % 0x2_0000)
        .build();

    let mut vm = Vm::new(no_traps());
    if vm.load(&image, LoadOptions::default()).is_err() {
        return false;
    }
    vm.unload();

    !vm.is_loaded() && vm.load(&image, LoadOptions::default()).is_ok()
}
