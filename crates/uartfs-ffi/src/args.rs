use std::ffi::CStr;
use std::os::raw::c_char;

use crate::error;

/// Convert a required C string argument into UTF-8 `&str`.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn required_str_arg<'a>(value: *const c_char, name: &str) -> Option<&'a str> {
    if value.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null"));
        return None;
    }
    // SAFETY: Null was handled above; the caller guarantees the rest.
    unsafe { str_arg(value, name) }
}

/// Like [`required_str_arg`], but null yields `default`.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn optional_str_arg<'a>(
    value: *const c_char,
    name: &str,
    default: &'a str,
) -> Option<&'a str> {
    if value.is_null() {
        return Some(default);
    }
    // SAFETY: Null was handled above; the caller guarantees the rest.
    unsafe { str_arg(value, name) }
}

unsafe fn str_arg<'a>(value: *const c_char, name: &str) -> Option<&'a str> {
    let as_cstr = {
        // SAFETY: The caller guarantees `value` points to a valid NUL-terminated C string.
        unsafe { CStr::from_ptr(value) }
    };

    match as_cstr.to_str() {
        Ok(v) if v.is_empty() => {
            let _ = error::set_invalid_argument(format!("{name} cannot be empty"));
            None
        }
        Ok(v) => Some(v),
        Err(_) => {
            let _ = error::set_invalid_argument(format!("{name} must be valid UTF-8"));
            None
        }
    }
}
