//! The page-level capability every allocator in this crate is built on.

use crate::arena::ArenaFlags;
use crate::platform;
use core::ptr::NonNull;

/// Source of raw, page-aligned memory.
///
/// Implementations must not allocate through the global allocator, and must be
/// callable with all signals blocked when `flags` contains
/// [`ArenaFlags::ASYNC_SIGNAL_SAFE`].
pub trait PagesAllocator: Sync {
    /// Map `size` bytes of zeroed, read-write memory. `size` is a non-zero
    /// multiple of the native page size. Returns `None` on exhaustion.
    fn map_pages(&self, flags: ArenaFlags, size: usize) -> Option<NonNull<u8>>;

    /// Return memory obtained from `map_pages`.
    ///
    /// # Safety
    /// `addr..addr + size` must be a whole number of regions previously
    /// returned by `map_pages` on this allocator and no longer in use.
    unsafe fn unmap_pages(&self, flags: ArenaFlags, addr: NonNull<u8>, size: usize);
}

/// Anonymous private mappings straight from the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPages;

/// The default pages allocator.
pub static OS_PAGES: OsPages = OsPages;

impl PagesAllocator for OsPages {
    fn map_pages(&self, _flags: ArenaFlags, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(size != 0 && crate::util::is_aligned(size, crate::util::page_size()));
        NonNull::new(unsafe { platform::map_anonymous(size) })
    }

    unsafe fn unmap_pages(&self, _flags: ArenaFlags, addr: NonNull<u8>, size: usize) {
        if !platform::unmap(addr.as_ptr(), size) {
            crate::util::abort_with_message("lowalloc: munmap failed\n");
        }
    }
}

/// The process-wide OS-backed pages allocator.
#[inline]
pub fn default_pages_allocator() -> &'static dyn PagesAllocator {
    &OS_PAGES
}
