//! uartfs-ffi: C-ABI entry points for starting and stopping the uartfs proxy.
//!
//! A firmware or host-emulation harness written in C calls
//! `fs_proxy_create_task` once at startup; everything else happens on the
//! proxy's own threads.

mod args;
mod error;
mod proxy;
mod types;

use std::panic::AssertUnwindSafe;

pub use proxy::{fs_proxy_create_task, fs_proxy_is_running, fs_proxy_stop};
pub use types::{
    FsProxyResult, FS_PROXY_ERR_ALREADY_RUNNING, FS_PROXY_ERR_INTERNAL,
    FS_PROXY_ERR_INVALID_ARGUMENT, FS_PROXY_ERR_LINK, FS_PROXY_ERR_NOT_RUNNING,
    FS_PROXY_ERR_TASK_CREATE, FS_PROXY_ERR_UART_INIT, FS_PROXY_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Description of the last failure on this thread; empty after success.
///
/// The pointer stays valid until the next `fs_proxy_*` call on this thread.
#[no_mangle]
pub extern "C" fn fs_proxy_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
