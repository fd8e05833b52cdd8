//! Metadata bump allocation against a counting pages allocator.

use lowalloc::metadata::METADATA_ALIGN;
use lowalloc::util::page_size;
use lowalloc::{meta_data_alloc, metadata_system_bytes, ArenaFlags, MetadataAllocator, PagesAllocator, OS_PAGES};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

struct Counting {
    maps: AtomicUsize,
    bytes: AtomicUsize,
}

impl Counting {
    fn leak() -> &'static Counting {
        Box::leak(Box::new(Counting {
            maps: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
        }))
    }
}

impl PagesAllocator for Counting {
    fn map_pages(&self, flags: ArenaFlags, size: usize) -> Option<NonNull<u8>> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(size, Ordering::SeqCst);
        OS_PAGES.map_pages(flags, size)
    }

    unsafe fn unmap_pages(&self, flags: ArenaFlags, addr: NonNull<u8>, size: usize) {
        OS_PAGES.unmap_pages(flags, addr, size)
    }
}

#[test]
fn many_small_requests_one_chunk() {
    let pages = Counting::leak();
    let chunk = 64 * page_size();
    let meta = MetadataAllocator::new(pages, chunk);
    // 64-byte-rounded requests that together stay well inside one chunk.
    let n = chunk / (2 * METADATA_ALIGN);
    for i in 0..n {
        let p = meta.alloc(1 + i % METADATA_ALIGN);
        assert!(!p.is_null());
        assert_eq!(p as usize % METADATA_ALIGN, 0);
        unsafe { p.write(0x11) };
    }
    assert_eq!(pages.maps.load(Ordering::SeqCst), 1);
    assert_eq!(meta.system_bytes(), pages.bytes.load(Ordering::SeqCst) as u64);
}

#[test]
fn overflow_wastes_at_most_one_chunk() {
    let pages = Counting::leak();
    let chunk = 8 * page_size();
    let meta = MetadataAllocator::new(pages, chunk);
    assert!(!meta.alloc(chunk / 2).is_null());
    assert_eq!(pages.maps.load(Ordering::SeqCst), 1);
    // Does not fit the remaining half.
    assert!(!meta.alloc(chunk / 2 + 1).is_null());
    assert_eq!(pages.maps.load(Ordering::SeqCst), 2);
    assert_eq!(meta.system_bytes(), 2 * chunk as u64);
}

#[test]
fn memory_is_zeroed_and_disjoint() {
    let meta = MetadataAllocator::new(Counting::leak(), 16 * page_size());
    let mut blocks = Vec::new();
    for size in [24usize, 100, 300, 7, 4096] {
        let p = meta.alloc(size);
        let bytes = unsafe { std::slice::from_raw_parts_mut(p, size) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes.fill(0xEE);
        blocks.push((p as usize, size));
    }
    blocks.sort();
    assert!(blocks.windows(2).all(|w| w[0].0 + w[0].1 <= w[1].0));
}

#[test]
fn concurrent_callers_get_distinct_blocks() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let pages = Counting::leak();
    let meta: &'static MetadataAllocator =
        Box::leak(Box::new(MetadataAllocator::new(pages, 16 * page_size())));
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|_| meta.alloc(48) as usize)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<usize> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("metadata thread panicked"))
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(meta.system_bytes(), pages.bytes.load(Ordering::SeqCst) as u64);
}

#[test]
fn size_near_address_space_limit_is_refused() {
    let pages = Counting::leak();
    let meta = MetadataAllocator::new(pages, 4 * page_size());
    for bytes in [usize::MAX, usize::MAX - 1, usize::MAX - page_size() + 2] {
        assert!(meta.alloc(bytes).is_null());
    }
    assert_eq!(pages.maps.load(Ordering::SeqCst), 0);
    assert_eq!(meta.system_bytes(), 0);
}

#[test]
fn global_allocator_reports_system_bytes() {
    let p = meta_data_alloc(200);
    assert!(!p.is_null());
    assert!(metadata_system_bytes() >= 200);
}
