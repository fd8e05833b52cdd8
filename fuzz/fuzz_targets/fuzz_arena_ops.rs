#![no_main]

use libfuzzer_sys::fuzz_target;
use lowalloc::arena;
use lowalloc::{delete_arena, new_arena, ArenaFlags};

/// Fuzz target that interprets a byte slice as a sequence of arena operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=alloc, 1=free, 2=alloc over a live slot, 3=check)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// The arena is built from the first input byte's flags and must be empty and
/// deletable once every slot is released.
const MAX_SLOTS: usize = 64;

fuzz_target!(|data: &[u8]| {
    let Some((&flag_byte, ops)) = data.split_first() else {
        return;
    };
    let flags = ArenaFlags::from_bits_truncate(flag_byte as u32);
    let handle = new_arena(flags);
    let a = unsafe { handle.as_ref() };

    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= ops.len() {
        let opcode = ops[i] & 0x03;
        let size = u16::from_le_bytes([ops[i + 1], ops[i + 2]]) as usize;
        let slot = (ops[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 | 2 => {
                if !slots[slot].is_null() {
                    if opcode == 0 {
                        continue;
                    }
                    unsafe { arena::free(slots[slot]) };
                }
                let ptr = a.alloc(size);
                assert_eq!(ptr.is_null(), size == 0);
                if !ptr.is_null() {
                    assert_eq!(ptr as usize % 16, 0);
                    unsafe { std::ptr::write_bytes(ptr, slot as u8, size) };
                }
                slots[slot] = ptr;
                sizes[slot] = size;
            }
            1 => {
                if !slots[slot].is_null() {
                    let bytes = unsafe { std::slice::from_raw_parts(slots[slot], sizes[slot]) };
                    assert!(bytes.iter().all(|&b| b == slot as u8), "slot {} corrupted", slot);
                    unsafe { arena::free(slots[slot]) };
                }
                slots[slot] = std::ptr::null_mut();
                sizes[slot] = 0;
            }
            _ => {
                let stats = a.stats();
                assert_eq!(stats.free_bytes + stats.allocated_bytes, stats.mapped_bytes);
                assert_eq!(stats.blocks, slots.iter().filter(|p| !p.is_null()).count());
            }
        }
    }

    for p in slots {
        unsafe { arena::free(p) };
    }
    let stats = a.stats();
    assert_eq!(stats.free_bytes, stats.mapped_bytes);
    unsafe { delete_arena(handle).expect("empty arena must be deletable") };
});
