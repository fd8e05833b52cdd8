use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// A simple mutex built on futex (Linux) or spinning elsewhere.
/// We cannot use std::sync::Mutex because the code above us may be the
/// allocator std would call into.
pub struct RawMutex {
    /// 0 = unlocked, 1 = locked no waiters, 2 = locked with waiters
    state: AtomicI32,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
        }
    }

    #[inline]
    pub fn lock(&self) {
        // Fast path: uncontended
        if self
            .state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        loop {
            let old = self.state.swap(2, Ordering::Acquire);
            if old == 0 {
                return;
            }
            #[cfg(target_os = "linux")]
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    &self.state as *const AtomicI32,
                    libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                    2i32,
                    core::ptr::null::<libc::timespec>(),
                );
            }
            #[cfg(not(target_os = "linux"))]
            {
                core::hint::spin_loop();
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        let old = self.state.fetch_sub(1, Ordering::Release);
        if old != 1 {
            // There were waiters
            self.state.store(0, Ordering::Release);
            self.wake_one();
        }
    }

    #[cold]
    fn wake_one(&self) {
        #[cfg(target_os = "linux")]
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                &self.state as *const AtomicI32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
            );
        }
    }

    /// Try to lock without blocking. Returns true if lock was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// A mutex that wraps data, similar to std::sync::Mutex but allocation-free.
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

/// Blocks every signal on the current thread until dropped, when enabled.
///
/// Taken before an async-signal-safe arena's lock and dropped after the
/// unlock, so a handler can never interrupt the thread that holds the lock.
pub struct SignalMask {
    old: libc::sigset_t,
    active: bool,
}

impl SignalMask {
    #[inline]
    pub fn block_if(enabled: bool) -> Self {
        let mut old: libc::sigset_t = unsafe { core::mem::zeroed() };
        if enabled {
            unsafe { crate::platform::block_all_signals(&mut old) };
        }
        SignalMask {
            old,
            active: enabled,
        }
    }
}

impl Drop for SignalMask {
    #[inline]
    fn drop(&mut self) {
        if self.active {
            unsafe { crate::platform::restore_signals(&self.old) };
        }
    }
}

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// A process-lifetime value built on first use and never torn down.
///
/// The first caller runs the initializer; racing callers spin until the value
/// is published. Nothing here allocates, so it is usable from inside the
/// allocator stack.
pub struct InitCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send + Sync> Sync for InitCell<T> {}
unsafe impl<T: Send> Send for InitCell<T> {}

impl<T> InitCell<T> {
    pub const fn new() -> Self {
        InitCell {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Get the value if it has been published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    #[inline]
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        match self.get() {
            Some(value) => value,
            None => self.init_slow(init),
        }
    }

    #[cold]
    #[inline(never)]
    fn init_slow(&self, init: impl FnOnce() -> T) -> &T {
        loop {
            match self
                .state
                .compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let reset = ResetOnUnwind(&self.state);
                    let value = init();
                    unsafe { (*self.value.get()).write(value) };
                    core::mem::forget(reset);
                    self.state.store(READY, Ordering::Release);
                    break;
                }
                Err(READY) => break,
                Err(_) => {
                    // A panicking initializer puts the cell back to UNINIT;
                    // the next waiter through takes over.
                    while self.state.load(Ordering::Acquire) == INITIALIZING {
                        core::hint::spin_loop();
                    }
                }
            }
        }
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

/// Returns an [`InitCell`] to UNINIT if its initializer unwinds.
struct ResetOnUnwind<'a>(&'a AtomicU8);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.store(UNINIT, Ordering::Release);
    }
}
