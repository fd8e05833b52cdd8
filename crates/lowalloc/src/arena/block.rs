use super::Arena;
use crate::util::MIN_ALIGN;

const MAGIC_ALLOCATED: usize = 0x4a6c_f3b1;
const MAGIC_FREED: usize = 0x2d95_0e7c;

/// Bookkeeping in front of every arena block.
///
/// `size` is the whole block, header included. The magic word is xored with
/// the header's own address so a stale copy elsewhere never validates.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) size: usize,
    magic: usize,
    pub(crate) arena: *const Arena,
    _pad: usize,
}

pub(crate) const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % MIN_ALIGN == 0);

/// Bytes a `request` occupies in the free-list. `None` on overflow.
#[inline]
pub(crate) fn block_size(request: usize) -> Option<usize> {
    request
        .checked_add(HEADER_SIZE + MIN_ALIGN - 1)
        .map(|n| n & !(MIN_ALIGN - 1))
}

impl BlockHeader {
    /// Stamp a live header at `at` and return the user pointer behind it.
    ///
    /// # Safety
    /// `at..at + size` must be a carved, exclusively owned range.
    #[inline]
    pub(crate) unsafe fn init(at: usize, size: usize, arena: *const Arena) -> *mut u8 {
        let header = at as *mut BlockHeader;
        header.write(BlockHeader {
            size,
            magic: at ^ MAGIC_ALLOCATED,
            arena,
            _pad: 0,
        });
        (at + HEADER_SIZE) as *mut u8
    }

    /// # Safety
    /// `ptr` must be a user pointer returned by `init`.
    #[inline(always)]
    pub(crate) unsafe fn from_user(ptr: *mut u8) -> *mut BlockHeader {
        ptr.sub(HEADER_SIZE) as *mut BlockHeader
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.magic == (self as *const BlockHeader as usize) ^ MAGIC_ALLOCATED
    }

    #[inline]
    pub(crate) fn mark_freed(&mut self) {
        self.magic = (self as *const BlockHeader as usize) ^ MAGIC_FREED;
    }

    #[cfg(feature = "checked")]
    pub(crate) fn was_freed(&self) -> bool {
        self.magic == (self as *const BlockHeader as usize) ^ MAGIC_FREED
    }
}
