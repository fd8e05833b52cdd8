#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

/// Map anonymous read-write memory. Returns null on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    sys::map_anonymous(size)
}

/// Unmap previously mapped memory. Returns false if the kernel refused.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous` and `size` must cover
/// whole mappings.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) -> bool {
    sys::unmap(ptr, size)
}

/// Page size reported by the OS, 4096 if the query fails.
pub fn native_page_size() -> usize {
    sys::native_page_size()
}

/// Block every signal on the calling thread and store the previous mask in
/// `old`.
///
/// # Safety
/// `old` must be restored with `restore_signals` on the same thread.
#[inline]
pub unsafe fn block_all_signals(old: &mut libc::sigset_t) {
    sys::block_all_signals(old);
}

/// Reinstate a mask saved by `block_all_signals`.
///
/// # Safety
/// `old` must come from `block_all_signals` on the calling thread.
#[inline]
pub unsafe fn restore_signals(old: &libc::sigset_t) {
    sys::restore_signals(old);
}
