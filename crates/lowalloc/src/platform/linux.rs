use core::ptr;

/// Map anonymous read-write memory.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous`; the range must be mapped.
pub unsafe fn unmap(ptr: *mut u8, size: usize) -> bool {
    libc::munmap(ptr as *mut libc::c_void, size) == 0
}

pub fn native_page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 {
        ps as usize
    } else {
        4096
    }
}

/// # Safety
/// Must be paired with `restore_signals` on the same thread.
pub unsafe fn block_all_signals(old: &mut libc::sigset_t) {
    let mut all: libc::sigset_t = core::mem::zeroed();
    libc::sigfillset(&mut all);
    let ret = libc::pthread_sigmask(libc::SIG_BLOCK, &all, old);
    debug_assert!(ret == 0, "pthread_sigmask(SIG_BLOCK) failed");
}

/// # Safety
/// `old` must come from `block_all_signals`.
pub unsafe fn restore_signals(old: &libc::sigset_t) {
    let ret = libc::pthread_sigmask(libc::SIG_SETMASK, old, ptr::null_mut());
    debug_assert!(ret == 0, "pthread_sigmask(SIG_SETMASK) failed");
}
