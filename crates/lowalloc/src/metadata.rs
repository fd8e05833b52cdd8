//! Bump allocation for permanent internal metadata.
//!
//! Nothing handed out here is ever freed. Small requests are carved from
//! fixed-size chunks; a request that does not fit the current chunk abandons
//! its tail and starts a fresh one. Requests of a whole chunk or more bypass
//! the chunk and are mapped on their own.

use crate::arena::ArenaFlags;
use crate::pages::{PagesAllocator, OS_PAGES};
use crate::sync::Mutex;
use crate::util::{checked_align_up, page_size};
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

/// Strictest alignment any metadata type needs (one cache line).
pub const METADATA_ALIGN: usize = 64;

/// Chunk size of the process-wide metadata allocator.
pub const DEFAULT_CHUNK_SIZE: usize = 8 << 20;

struct Chunk {
    base: *mut u8,
    remaining: usize,
}

unsafe impl Send for Chunk {}

pub struct MetadataAllocator {
    chunk: Mutex<Chunk>,
    pages: &'static dyn PagesAllocator,
    chunk_size: usize,
    system_bytes: AtomicU64,
}

impl MetadataAllocator {
    /// `chunk_size` must be a multiple of the native page size.
    pub const fn new(pages: &'static dyn PagesAllocator, chunk_size: usize) -> Self {
        MetadataAllocator {
            chunk: Mutex::new(Chunk {
                base: ptr::null_mut(),
                remaining: 0,
            }),
            pages,
            chunk_size,
            system_bytes: AtomicU64::new(0),
        }
    }

    /// Serve `bytes` of zeroed memory aligned to [`METADATA_ALIGN`]. Returns
    /// null if the pages allocator is exhausted.
    pub fn alloc(&self, bytes: usize) -> *mut u8 {
        let bytes = bytes.max(1);
        if bytes >= self.chunk_size {
            return self.alloc_direct(bytes);
        }

        let mut chunk = self.chunk.lock();
        let mut padding = (chunk.base as usize).wrapping_neg() & (METADATA_ALIGN - 1);
        if chunk.remaining < bytes + padding {
            match self.pages.map_pages(ArenaFlags::empty(), self.chunk_size) {
                Some(mem) => {
                    self.system_bytes
                        .fetch_add(self.chunk_size as u64, Ordering::Relaxed);
                    chunk.base = mem.as_ptr();
                    chunk.remaining = self.chunk_size;
                    padding = 0;
                }
                None => {
                    drop(chunk);
                    log::warn!(
                        "metadata chunk refill of {} bytes failed",
                        self.chunk_size
                    );
                    return ptr::null_mut();
                }
            }
        }

        let result = unsafe { chunk.base.add(padding) };
        chunk.base = unsafe { result.add(bytes) };
        chunk.remaining -= bytes + padding;
        result
    }

    fn alloc_direct(&self, bytes: usize) -> *mut u8 {
        let size = match checked_align_up(bytes, page_size()) {
            Some(size) => size,
            None => {
                log::warn!("metadata request of {} bytes overflows a page mapping", bytes);
                return ptr::null_mut();
            }
        };
        match self.pages.map_pages(ArenaFlags::empty(), size) {
            Some(mem) => {
                self.system_bytes.fetch_add(size as u64, Ordering::Relaxed);
                mem.as_ptr()
            }
            None => {
                log::warn!("metadata mapping of {} bytes failed", size);
                ptr::null_mut()
            }
        }
    }

    /// Cumulative bytes obtained from the pages allocator.
    pub fn system_bytes(&self) -> u64 {
        self.system_bytes.load(Ordering::Relaxed)
    }
}

static METADATA: MetadataAllocator = MetadataAllocator::new(&OS_PAGES, DEFAULT_CHUNK_SIZE);

/// Allocate permanent metadata from the process-wide allocator.
#[inline]
pub fn meta_data_alloc(bytes: usize) -> *mut u8 {
    METADATA.alloc(bytes)
}

/// Bytes the process-wide metadata allocator has obtained so far.
pub fn metadata_system_bytes() -> u64 {
    METADATA.system_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        maps: AtomicUsize,
    }

    impl PagesAllocator for Counting {
        fn map_pages(&self, flags: ArenaFlags, size: usize) -> Option<NonNull<u8>> {
            self.maps.fetch_add(1, Ordering::SeqCst);
            OS_PAGES.map_pages(flags, size)
        }

        unsafe fn unmap_pages(&self, flags: ArenaFlags, addr: NonNull<u8>, size: usize) {
            OS_PAGES.unmap_pages(flags, addr, size)
        }
    }

    struct Exhausted;

    impl PagesAllocator for Exhausted {
        fn map_pages(&self, _: ArenaFlags, _: usize) -> Option<NonNull<u8>> {
            None
        }

        unsafe fn unmap_pages(&self, _: ArenaFlags, _: NonNull<u8>, _: usize) {}
    }

    fn leaked_counter() -> &'static Counting {
        Box::leak(Box::new(Counting {
            maps: AtomicUsize::new(0),
        }))
    }

    #[test]
    fn small_requests_share_one_chunk() {
        let pages = leaked_counter();
        let chunk = 16 * page_size();
        let meta = MetadataAllocator::new(pages, chunk);
        let mut prev = 0usize;
        for n in [1usize, 7, 64, 100, 3] {
            let p = meta.alloc(n) as usize;
            assert_ne!(p, 0);
            assert_eq!(p % METADATA_ALIGN, 0);
            assert!(p >= prev);
            prev = p + n;
        }
        assert_eq!(pages.maps.load(Ordering::SeqCst), 1);
        assert_eq!(meta.system_bytes(), chunk as u64);
    }

    #[test]
    fn overflow_takes_exactly_one_new_chunk() {
        let pages = leaked_counter();
        let chunk = 4 * page_size();
        let meta = MetadataAllocator::new(pages, chunk);
        let first = meta.alloc(chunk - 128) as usize;
        let second = meta.alloc(256) as usize;
        assert_eq!(pages.maps.load(Ordering::SeqCst), 2);
        assert!(second < first || second >= first + chunk);
        assert_eq!(meta.system_bytes(), 2 * chunk as u64);
    }

    #[test]
    fn large_requests_map_directly() {
        let pages = leaked_counter();
        let chunk = 4 * page_size();
        let meta = MetadataAllocator::new(pages, chunk);
        let big = meta.alloc(chunk + 1);
        assert!(!big.is_null());
        assert_eq!(meta.system_bytes(), (chunk + page_size()) as u64);
        // The chunk was never touched.
        let small = meta.alloc(8);
        assert!(!small.is_null());
        assert_eq!(pages.maps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_bytes_still_advance() {
        let meta = MetadataAllocator::new(leaked_counter(), 4 * page_size());
        let a = meta.alloc(0);
        let b = meta.alloc(0);
        assert!(!a.is_null() && !b.is_null());
        assert_ne!(a, b);
    }

    #[test]
    fn refill_failure_returns_null() {
        static EXHAUSTED: Exhausted = Exhausted;
        let meta = MetadataAllocator::new(&EXHAUSTED, 4 * page_size());
        assert!(meta.alloc(32).is_null());
        assert!(meta.alloc(64 * page_size()).is_null());
        assert_eq!(meta.system_bytes(), 0);
    }

    #[test]
    fn unmappable_size_returns_null() {
        let pages = leaked_counter();
        let meta = MetadataAllocator::new(pages, 4 * page_size());
        assert!(meta.alloc(usize::MAX).is_null());
        assert!(meta.alloc(usize::MAX - page_size() + 2).is_null());
        assert_eq!(pages.maps.load(Ordering::SeqCst), 0);
        assert_eq!(meta.system_bytes(), 0);
        // Still usable afterwards.
        assert!(!meta.alloc(64).is_null());
    }

    #[test]
    fn global_counter_grows() {
        let before = metadata_system_bytes();
        assert!(!meta_data_alloc(128).is_null());
        assert!(metadata_system_bytes() >= before);
        assert_eq!(metadata_system_bytes() % page_size() as u64, 0);
    }
}
