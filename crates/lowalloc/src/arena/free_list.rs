//! Address-ordered free intervals of one arena.
//!
//! Intervals live in a sorted array mapped straight from the OS, so lookups
//! and neighbor checks are binary searches and nothing here touches the
//! global allocator. Adjacent intervals are always coalesced, which keeps
//! the array as short as the fragmentation allows.

use crate::platform;
use crate::util::{align_up, page_size};
use core::ptr;

/// A free byte range `[addr, addr + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Interval {
    pub addr: usize,
    pub len: usize,
}

impl Interval {
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.addr + self.len
    }
}

pub(crate) struct FreeList {
    entries: *mut Interval,
    capacity: usize,
    len: usize,
    mapped_size: usize,
    free_bytes: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        FreeList {
            entries: ptr::null_mut(),
            capacity: 0,
            len: 0,
            mapped_size: 0,
            free_bytes: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Total bytes across all intervals.
    #[inline]
    pub(crate) fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[Interval] {
        if self.entries.is_null() {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(self.entries, self.len) }
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [Interval] {
        if self.entries.is_null() {
            &mut []
        } else {
            unsafe { core::slice::from_raw_parts_mut(self.entries, self.len) }
        }
    }

    /// Index of the lowest-addressed interval of at least `size` bytes.
    pub(crate) fn first_fit(&self, size: usize) -> Option<usize> {
        self.as_slice().iter().position(|iv| iv.len >= size)
    }

    /// Take `size` bytes off the front of interval `idx` and return their
    /// address. The rest of the interval stays free.
    pub(crate) fn carve(&mut self, idx: usize, size: usize) -> usize {
        let slot = &mut self.as_mut_slice()[idx];
        debug_assert!(slot.len >= size);
        let addr = slot.addr;
        if slot.len == size {
            self.remove(idx);
        } else {
            slot.addr += size;
            slot.len -= size;
        }
        self.free_bytes -= size;
        addr
    }

    /// Return `[addr, addr + len)` to the list, merging with whichever
    /// neighbors touch it. Returns false if the array had to grow and the
    /// OS refused the memory.
    ///
    /// # Safety
    /// The range must not overlap any interval already in the list.
    pub(crate) unsafe fn insert(&mut self, addr: usize, len: usize) -> bool {
        debug_assert!(len != 0);
        let slice = self.as_slice();
        let pos = slice.partition_point(|iv| iv.addr < addr);

        #[cfg(feature = "checked")]
        {
            let overlaps_prev = pos > 0 && slice[pos - 1].end() > addr;
            let overlaps_next = pos < slice.len() && addr + len > slice[pos].addr;
            if overlaps_prev || overlaps_next {
                crate::util::abort_with_args(format_args!(
                    "lowalloc: freed range {:#x}+{} overlaps a free interval",
                    addr, len
                ));
            }
        }

        let merge_prev = pos > 0 && slice[pos - 1].end() == addr;
        let merge_next = pos < slice.len() && addr + len == slice[pos].addr;

        match (merge_prev, merge_next) {
            (true, true) => {
                let next_len = slice[pos].len;
                self.as_mut_slice()[pos - 1].len += len + next_len;
                self.remove(pos);
            }
            (true, false) => self.as_mut_slice()[pos - 1].len += len,
            (false, true) => {
                let next = &mut self.as_mut_slice()[pos];
                next.addr = addr;
                next.len += len;
            }
            (false, false) => {
                if self.len == self.capacity && !self.grow() {
                    return false;
                }
                let base = self.entries.add(pos);
                ptr::copy(base, base.add(1), self.len - pos);
                base.write(Interval { addr, len });
                self.len += 1;
            }
        }
        self.free_bytes += len;
        true
    }

    fn remove(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        unsafe {
            let base = self.entries.add(idx);
            ptr::copy(base.add(1), base, self.len - idx - 1);
        }
        self.len -= 1;
    }

    /// Double the backing array (first call maps one page).
    unsafe fn grow(&mut self) -> bool {
        let entry_size = core::mem::size_of::<Interval>();
        let new_size = if self.mapped_size == 0 {
            align_up(entry_size, page_size())
        } else {
            self.mapped_size * 2
        };
        let new_mem = platform::map_anonymous(new_size) as *mut Interval;
        if new_mem.is_null() {
            return false;
        }
        if !self.entries.is_null() {
            ptr::copy_nonoverlapping(self.entries, new_mem, self.len);
            platform::unmap(self.entries as *mut u8, self.mapped_size);
        }
        self.entries = new_mem;
        self.mapped_size = new_size;
        self.capacity = new_size / entry_size;
        true
    }

    /// Unmap the backing array and forget every interval.
    ///
    /// # Safety
    /// Nothing may use the list afterwards except through `new()` state.
    pub(crate) unsafe fn release(&mut self) {
        if !self.entries.is_null() {
            platform::unmap(self.entries as *mut u8, self.mapped_size);
        }
        *self = FreeList::new();
    }
}
