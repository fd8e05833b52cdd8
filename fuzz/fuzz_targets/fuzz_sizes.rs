#![no_main]

use libfuzzer_sys::fuzz_target;
use lowalloc::size_class::size_map;

// Fuzz target that exercises size-class boundaries.
// Interprets input as a series of u32 sizes, classifies each against the
// process-wide table and checks the class is the smallest that fits and
// keeps natural alignment.

fuzz_target!(|data: &[u8]| {
    let map = size_map();
    let mut i = 0;
    while i + 4 <= data.len() {
        let raw_size = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        i += 4;

        // Cap past the largest class so the oversize edge is still hit.
        let size = (raw_size as usize) % (map.max_size() + 4096);
        let class = map.classify(size);

        if size == 0 || map.is_oversize(size) {
            assert!(class.is_none(), "size {} should have no class", size);
            continue;
        }

        assert!(class.size >= size, "class {} too small for {}", class.size, size);
        if class.id > 1 {
            assert!(
                map.class_to_size(class.id - 1) < size,
                "size {} skipped smaller class {}",
                size,
                map.class_to_size(class.id - 1)
            );
        }

        // A size that is a multiple of a power of two below the page keeps
        // that alignment in its class.
        let align = 1usize << size.trailing_zeros().min(map.page_shift());
        if align >= 16 && size < map.page_size() {
            assert_eq!(class.size % align, 0, "size {} lost {}-byte alignment", size, align);
        }
    }
});
