//! Tunables read from the environment once, at first use.
//!
//! Parsing never allocates, so this can run before any allocator is ready.

use crate::sync::InitCell;

/// Overrides the maximum number of objects moved per batch transfer.
pub const TRANSFER_NUM_OBJ_VAR: &[u8] = b"LOWALLOC_TRANSFER_NUM_OBJ\0";

/// Overrides the native page size used to size spans.
pub const OVERRIDE_PAGESIZE_VAR: &[u8] = b"LOWALLOC_OVERRIDE_PAGESIZE\0";

/// Default cap on objects moved per batch transfer.
pub const DEFAULT_TRANSFER_NUM_OBJECTS: usize = 32;

/// Environment overrides for the size-class planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub transfer_num_objects: Option<usize>,
    pub page_size: Option<usize>,
}

static OVERRIDES: InitCell<Overrides> = InitCell::new();

/// Overrides read from the environment, cached after the first call.
pub fn overrides() -> Overrides {
    *OVERRIDES.get_or_init(|| unsafe { read_overrides() })
}

/// # Safety
/// Calls libc::getenv, which races with concurrent setenv.
unsafe fn read_overrides() -> Overrides {
    Overrides {
        transfer_num_objects: positive_var(TRANSFER_NUM_OBJ_VAR, "LOWALLOC_TRANSFER_NUM_OBJ"),
        page_size: positive_var(OVERRIDE_PAGESIZE_VAR, "LOWALLOC_OVERRIDE_PAGESIZE"),
    }
}

unsafe fn positive_var(key: &[u8], name: &str) -> Option<usize> {
    match getenv_usize(key) {
        EnvValue::Unset => None,
        EnvValue::Valid(0) | EnvValue::Invalid => {
            log::warn!("ignoring {}: expected a positive integer", name);
            None
        }
        EnvValue::Valid(val) => {
            log::debug!("{} = {}", name, val);
            Some(val)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvValue {
    Unset,
    Valid(usize),
    Invalid,
}

/// Parse an environment variable as a usize.
///
/// # Safety
/// `key` must be NUL-terminated. Calls libc::getenv.
unsafe fn getenv_usize(key: &[u8]) -> EnvValue {
    debug_assert_eq!(key.last(), Some(&0));
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return EnvValue::Unset;
    }
    parse_usize(core::ffi::CStr::from_ptr(val).to_bytes())
}

fn parse_usize(digits: &[u8]) -> EnvValue {
    if digits.is_empty() {
        return EnvValue::Invalid;
    }
    let mut result: usize = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return EnvValue::Invalid;
        }
        result = match result
            .checked_mul(10)
            .and_then(|r| r.checked_add((byte - b'0') as usize))
        {
            Some(r) => r,
            None => return EnvValue::Invalid,
        };
    }
    EnvValue::Valid(result)
}
