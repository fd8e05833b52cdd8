use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] that reports overflow instead of wrapping.
#[inline(always)]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Floor of log2(n). `n` must be non-zero.
#[inline(always)]
pub const fn lg_floor(n: usize) -> u32 {
    debug_assert!(n != 0);
    usize::BITS - 1 - n.leading_zeros()
}

/// Minimum alignment of every arena block (matches max_align_t on 64-bit).
pub const MIN_ALIGN: usize = 16;

/// Native page size, 0 until first queried.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(0);

/// Get the native page size reported by the OS. Cached after the first call.
#[inline]
pub fn page_size() -> usize {
    let ps = PAGE_SIZE_CACHED.load(Ordering::Relaxed);
    if ps != 0 {
        return ps;
    }
    init_page_size()
}

#[cold]
fn init_page_size() -> usize {
    let ps = crate::platform::native_page_size();
    PAGE_SIZE_CACHED.store(ps, Ordering::Relaxed);
    ps
}

/// Abort with a diagnostic message to stderr.
/// Used when an invariant every later allocation depends on is broken.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

/// Abort with a formatted diagnostic. Formatting goes through a fixed stack
/// buffer; output longer than the buffer is truncated.
#[cold]
#[inline(never)]
pub fn abort_with_args(args: fmt::Arguments<'_>) -> ! {
    let mut writer = StackWriter::new();
    let _ = fmt::write(&mut writer, args);
    let _ = fmt::Write::write_str(&mut writer, "\n");
    abort_with_message(writer.as_str())
}

/// Fixed-capacity `fmt::Write` sink that never allocates.
pub(crate) struct StackWriter {
    buf: [u8; 512],
    len: usize,
}

impl StackWriter {
    pub(crate) const fn new() -> Self {
        StackWriter {
            buf: [0; 512],
            len: 0,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever copied in.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("lowalloc: fatal error\n")
    }
}

impl fmt::Write for StackWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}
