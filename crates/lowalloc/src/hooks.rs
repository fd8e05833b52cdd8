//! Instrumentation callbacks fired by arenas built with
//! [`ArenaFlags::CALL_HOOKS`](crate::arena::ArenaFlags::CALL_HOOKS).
//!
//! Hooks are plain `fn` pointers stored in atomics, so installing and invoking
//! them never allocates. They run outside the arena lock.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Called after a block of `size` bytes was handed out at `ptr`.
pub type AllocHook = fn(ptr: *const u8, size: usize);

/// Called before the block at `ptr` is returned to its arena.
pub type FreeHook = fn(ptr: *const u8);

static ALLOC_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
static FREE_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Install (or clear, with `None`) the allocation hook. Returns the previous one.
pub fn set_alloc_hook(hook: Option<AllocHook>) -> Option<AllocHook> {
    let new = hook.map_or(ptr::null_mut(), |f| f as *mut ());
    let old = ALLOC_HOOK.swap(new, Ordering::AcqRel);
    if old.is_null() {
        None
    } else {
        Some(unsafe { core::mem::transmute::<*mut (), AllocHook>(old) })
    }
}

/// Install (or clear, with `None`) the free hook. Returns the previous one.
pub fn set_free_hook(hook: Option<FreeHook>) -> Option<FreeHook> {
    let new = hook.map_or(ptr::null_mut(), |f| f as *mut ());
    let old = FREE_HOOK.swap(new, Ordering::AcqRel);
    if old.is_null() {
        None
    } else {
        Some(unsafe { core::mem::transmute::<*mut (), FreeHook>(old) })
    }
}

#[inline]
pub(crate) fn invoke_alloc(ptr: *const u8, size: usize) {
    let hook = ALLOC_HOOK.load(Ordering::Acquire);
    if !hook.is_null() {
        let hook = unsafe { core::mem::transmute::<*mut (), AllocHook>(hook) };
        hook(ptr, size);
    }
}

#[inline]
pub(crate) fn invoke_free(ptr: *const u8) {
    let hook = FREE_HOOK.load(Ordering::Acquire);
    if !hook.is_null() {
        let hook = unsafe { core::mem::transmute::<*mut (), FreeHook>(hook) };
        hook(ptr);
    }
}
