//! Self-contained arenas for code that cannot go through the main allocator.
//!
//! Every arena owns an address-ordered free-list of byte intervals and grows
//! by whole pages taken from its [`PagesAllocator`]. Blocks carry a small
//! header so [`Arena::free`] needs nothing but the pointer. Arenas built with
//! [`ArenaFlags::ASYNC_SIGNAL_SAFE`] block every signal while their lock is
//! held, so a handler may allocate from the same arena as the thread it
//! interrupted.
//!
//! The arena control block and the free-list array are mapped straight from
//! the OS; nothing in this module touches the global allocator or logs.

mod block;
mod free_list;

pub use free_list::Interval;

use crate::hooks;
use crate::pages::{default_pages_allocator, PagesAllocator, OS_PAGES};
use crate::platform;
use crate::sync::{InitCell, RawMutex, SignalMask};
use crate::util::{abort_with_message, align_up, checked_align_up, page_size};
use block::BlockHeader;
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use free_list::FreeList;

bitflags::bitflags! {
    /// Construction flags of an arena. Also passed through to the
    /// [`PagesAllocator`] on every map/unmap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArenaFlags: u32 {
        /// Fire the [`hooks`](crate::hooks) around every alloc and free.
        const CALL_HOOKS = 0x0001;
        /// Block all signals for the duration of each critical section.
        const ASYNC_SIGNAL_SAFE = 0x0002;
    }
}

/// Why [`delete_arena`] refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena still has {blocks} outstanding blocks ({outstanding_bytes} bytes)")]
    Busy {
        outstanding_bytes: usize,
        blocks: usize,
    },
    #[error("the default arena cannot be deleted")]
    DefaultArena,
}

/// Point-in-time accounting of one arena.
///
/// `free_bytes + allocated_bytes == mapped_bytes` in every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes ever obtained from the pages allocator.
    pub mapped_bytes: usize,
    pub free_bytes: usize,
    /// Bytes held by outstanding blocks, headers and rounding included.
    pub allocated_bytes: usize,
    pub blocks: usize,
    pub free_intervals: usize,
}

struct ArenaInner {
    free: FreeList,
    mapped_bytes: usize,
    allocated_bytes: usize,
    blocks: usize,
}

#[repr(C, align(128))]
pub struct Arena {
    lock: RawMutex,
    flags: ArenaFlags,
    pages: &'static dyn PagesAllocator,
    /// Pages from a caller-supplied allocator are never unmapped.
    custom_pages: bool,
    inner: UnsafeCell<ArenaInner>,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

/// Lock plus signal mask for one critical section. Dropping unlocks first,
/// then the mask field restores the caller's signals.
struct Critical<'a> {
    arena: &'a Arena,
    _mask: SignalMask,
}

impl Critical<'_> {
    #[inline(always)]
    fn inner(&mut self) -> &mut ArenaInner {
        unsafe { &mut *self.arena.inner.get() }
    }
}

impl Drop for Critical<'_> {
    #[inline]
    fn drop(&mut self) {
        self.arena.lock.unlock();
    }
}

impl Arena {
    const fn new(flags: ArenaFlags, pages: &'static dyn PagesAllocator, custom_pages: bool) -> Self {
        Arena {
            lock: RawMutex::new(),
            flags,
            pages,
            custom_pages,
            inner: UnsafeCell::new(ArenaInner {
                free: FreeList::new(),
                mapped_bytes: 0,
                allocated_bytes: 0,
                blocks: 0,
            }),
        }
    }

    #[inline]
    pub fn flags(&self) -> ArenaFlags {
        self.flags
    }

    #[inline]
    fn enter(&self) -> Critical<'_> {
        let mask = SignalMask::block_if(self.flags.contains(ArenaFlags::ASYNC_SIGNAL_SAFE));
        self.lock.lock();
        Critical { arena: self, _mask: mask }
    }

    /// Allocate `size` bytes, 16-byte aligned. Zero bytes yields null.
    ///
    /// Never returns null for a non-zero request: if the pages allocator
    /// cannot grow the arena the process aborts.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        let total = match block::block_size(size) {
            Some(total) => total,
            None => abort_with_message("lowalloc: arena request size overflow\n"),
        };
        // Growth maps whole pages, so the page-rounded size must fit too.
        if checked_align_up(total, page_size()).is_none() {
            abort_with_message("lowalloc: arena request size overflow\n");
        }

        let user = {
            let mut critical = self.enter();
            let inner = critical.inner();
            unsafe {
                let at = self.alloc_inner(inner, total);
                BlockHeader::init(at, total, self)
            }
        };

        if self.flags.contains(ArenaFlags::CALL_HOOKS) {
            hooks::invoke_alloc(user, size);
        }
        user
    }

    /// Runs at most twice round the loop: a fresh mapping always fits.
    unsafe fn alloc_inner(&self, inner: &mut ArenaInner, total: usize) -> usize {
        loop {
            if let Some(idx) = inner.free.first_fit(total) {
                inner.allocated_bytes += total;
                inner.blocks += 1;
                return inner.free.carve(idx, total);
            }

            let grow = align_up(total, page_size());
            let mem = match self.pages.map_pages(self.flags, grow) {
                Some(mem) => mem,
                None => abort_with_message("lowalloc: arena out of memory\n"),
            };
            inner.mapped_bytes += grow;
            if !inner.free.insert(mem.as_ptr() as usize, grow) {
                abort_with_message("lowalloc: arena free-list storage exhausted\n");
            }
        }
    }

    /// Return a block to the arena that produced it. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must come from [`Arena::alloc`] (on any arena still alive) and
    /// must not have been freed already.
    pub unsafe fn free(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = BlockHeader::from_user(ptr);

        #[cfg(feature = "checked")]
        if !(*header).is_live() {
            if (*header).was_freed() {
                abort_with_message("lowalloc: double free of arena block\n");
            }
            abort_with_message("lowalloc: free of pointer not owned by any arena\n");
        }

        let arena = &*(*header).arena;
        if arena.flags.contains(ArenaFlags::CALL_HOOKS) {
            hooks::invoke_free(ptr);
        }

        let mut critical = arena.enter();
        let inner = critical.inner();
        let size = (*header).size;
        (*header).mark_freed();
        if !inner.free.insert(header as usize, size) {
            abort_with_message("lowalloc: arena free-list storage exhausted\n");
        }
        inner.allocated_bytes -= size;
        inner.blocks -= 1;
    }

    /// Whether the header in front of `ptr` is live and names this arena.
    ///
    /// # Safety
    /// `ptr` must be a pointer returned by [`Arena::alloc`] on some arena
    /// that has not been deleted.
    pub unsafe fn owns(&self, ptr: *const u8) -> bool {
        let header = &*BlockHeader::from_user(ptr as *mut u8);
        header.is_live() && ptr::eq(header.arena, self)
    }

    pub fn stats(&self) -> ArenaStats {
        let mut critical = self.enter();
        let inner = critical.inner();
        ArenaStats {
            mapped_bytes: inner.mapped_bytes,
            free_bytes: inner.free.free_bytes(),
            allocated_bytes: inner.allocated_bytes,
            blocks: inner.blocks,
            free_intervals: inner.free.len(),
        }
    }

    /// Copy the free intervals, in address order, into `out`. Returns how
    /// many intervals exist (which may exceed `out.len()`).
    pub fn free_intervals(&self, out: &mut [Interval]) -> usize {
        let mut critical = self.enter();
        let intervals = critical.inner().free.as_slice();
        let n = intervals.len().min(out.len());
        out[..n].copy_from_slice(&intervals[..n]);
        intervals.len()
    }
}

fn control_block_size() -> usize {
    align_up(core::mem::size_of::<Arena>(), page_size())
}

fn create(flags: ArenaFlags, pages: &'static dyn PagesAllocator, custom_pages: bool) -> NonNull<Arena> {
    let mem = unsafe { platform::map_anonymous(control_block_size()) } as *mut Arena;
    match NonNull::new(mem) {
        Some(arena) => {
            unsafe { arena.as_ptr().write(Arena::new(flags, pages, custom_pages)) };
            arena
        }
        None => abort_with_message("lowalloc: cannot map arena control block\n"),
    }
}

/// Create an arena backed by the OS pages allocator.
pub fn new_arena(flags: ArenaFlags) -> NonNull<Arena> {
    create(flags, default_pages_allocator(), false)
}

/// Create an arena backed by `pages`. Its pages are assumed to outlive the
/// process and are never unmapped, not even by [`delete_arena`].
pub fn new_arena_with_pages(flags: ArenaFlags, pages: &'static dyn PagesAllocator) -> NonNull<Arena> {
    create(flags, pages, true)
}

/// Destroy an arena that has no outstanding blocks.
///
/// On `Err` the arena is untouched and stays usable.
///
/// # Safety
/// `arena` must come from [`new_arena`] or [`new_arena_with_pages`], must
/// not have been deleted, and no other thread may be using it.
pub unsafe fn delete_arena(arena: NonNull<Arena>) -> Result<(), ArenaError> {
    let this = arena.as_ref();
    if DEFAULT_ARENA
        .get()
        .is_some_and(|default| ptr::eq(default, this))
    {
        return Err(ArenaError::DefaultArena);
    }

    {
        let mut critical = this.enter();
        let inner = critical.inner();
        if inner.free.free_bytes() != inner.mapped_bytes {
            return Err(ArenaError::Busy {
                outstanding_bytes: inner.mapped_bytes - inner.free.free_bytes(),
                blocks: inner.blocks,
            });
        }
        debug_assert_eq!(inner.blocks, 0);

        // With nothing outstanding every interval is a run of whole mappings.
        if !this.custom_pages {
            for iv in inner.free.as_slice() {
                this.pages
                    .unmap_pages(this.flags, NonNull::new_unchecked(iv.addr as *mut u8), iv.len);
            }
        }
        inner.free.release();
        inner.mapped_bytes = 0;
    }

    if !platform::unmap(arena.as_ptr() as *mut u8, control_block_size()) {
        abort_with_message("lowalloc: munmap of arena control block failed\n");
    }
    Ok(())
}

static DEFAULT_ARENA: InitCell<Arena> = InitCell::new();

/// The process-wide arena, built on first use with [`ArenaFlags::CALL_HOOKS`].
pub fn default_arena() -> &'static Arena {
    DEFAULT_ARENA.get_or_init(|| Arena::new(ArenaFlags::CALL_HOOKS, &OS_PAGES, false))
}

/// Allocate from the default arena.
#[inline]
pub fn alloc(size: usize) -> *mut u8 {
    default_arena().alloc(size)
}

/// Free a block from any arena.
///
/// # Safety
/// See [`Arena::free`].
#[inline]
pub unsafe fn free(ptr: *mut u8) {
    Arena::free(ptr)
}
