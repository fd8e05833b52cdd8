use core::ptr;

pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

pub unsafe fn unmap(ptr: *mut u8, size: usize) -> bool {
    libc::munmap(ptr as *mut libc::c_void, size) == 0
}

pub fn native_page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 { ps as usize } else { 4096 }
}

pub unsafe fn block_all_signals(old: &mut libc::sigset_t) {
    let mut all: libc::sigset_t = 0;
    libc::sigfillset(&mut all);
    libc::pthread_sigmask(libc::SIG_BLOCK, &all, old);
}

pub unsafe fn restore_signals(old: &libc::sigset_t) {
    libc::pthread_sigmask(libc::SIG_SETMASK, old, ptr::null_mut());
}
