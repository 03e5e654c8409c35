use std::os::raw::c_char;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;
use uartfs_engine::{spawn_local_proxy, LocalFsConfig, ProxyConfig, ProxyHandle};
use uartfs_transport::UartConfig;

use crate::args;
use crate::error;
use crate::types::FsProxyResult;

enum Slot {
    Idle,
    /// `fs_proxy_create_task` is opening the port with the lock released.
    Starting {
        cancelled: bool,
    },
    Running(ProxyHandle),
}

/// The one proxy this process may run.
static PROXY: Mutex<Slot> = Mutex::new(Slot::Idle);

fn slot() -> MutexGuard<'static, Slot> {
    PROXY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Puts a `Starting` slot back to `Idle` if startup ends without installing
/// a proxy, panics included.
struct StartupGuard;

impl Drop for StartupGuard {
    fn drop(&mut self) {
        let mut current = slot();
        if matches!(*current, Slot::Starting { .. }) {
            *current = Slot::Idle;
        }
    }
}

/// Join a proxy that ended on its own. Its failure goes to the log and is
/// returned.
fn retire(dead: ProxyHandle) -> Option<String> {
    let exit = dead.join();
    let err = exit.error?;
    warn!(
        error = %err,
        requests = exit.stats.requests,
        "discarding a proxy that failed"
    );
    Some(err.to_string())
}

/// Open `port` at `baud` and serve the directory `root` to the host on it.
///
/// `port` is a serial device name or `unix:<socket path>` for an emulated
/// link (which blocks until the host connects). A null `root` serves the
/// current directory. Returns once the proxy threads are running; the proxy
/// keeps running until `fs_proxy_stop`.
///
/// While this call is waiting for the port, other `fs_proxy_*` calls do not
/// block: a second create returns `AlreadyRunning`, and `fs_proxy_stop`
/// cancels the startup, in which case this call returns `NotRunning` once
/// the port opens.
///
/// # Safety
/// `port` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
/// `root` must be null or a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn fs_proxy_create_task(
    port: *const c_char,
    baud: u32,
    root: *const c_char,
) -> FsProxyResult {
    crate::ffi_boundary(FsProxyResult::Internal, || {
        error::clear_error_state();

        // SAFETY: We validate null and UTF-8 in helper.
        let Some(port) = (unsafe { args::required_str_arg(port, "port") }) else {
            return FsProxyResult::InvalidArgument;
        };
        // SAFETY: We validate null and UTF-8 in helper.
        let Some(root) = (unsafe { args::optional_str_arg(root, "root", ".") }) else {
            return FsProxyResult::InvalidArgument;
        };
        if baud == 0 {
            return error::set_invalid_argument("baud cannot be zero");
        }

        let dead = {
            let mut current = slot();
            match &*current {
                Slot::Starting { .. } => {
                    error::set_error_message("proxy is already starting");
                    return FsProxyResult::AlreadyRunning;
                }
                Slot::Running(running) if !running.is_finished() => {
                    error::set_error_message("proxy is already running");
                    return FsProxyResult::AlreadyRunning;
                }
                _ => {}
            }
            std::mem::replace(&mut *current, Slot::Starting { cancelled: false })
        };
        let _startup = StartupGuard;
        // A proxy that died on its own is replaced.
        if let Slot::Running(dead) = dead {
            retire(dead);
        }

        let config = ProxyConfig {
            uart: UartConfig {
                baud_rate: baud,
                ..UartConfig::new(port)
            },
            fs: LocalFsConfig {
                root: root.into(),
                ..LocalFsConfig::default()
            },
            ..ProxyConfig::default()
        };
        let spawned = spawn_local_proxy(&config);

        let mut current = slot();
        let cancelled = matches!(*current, Slot::Starting { cancelled: true });
        match spawned {
            Ok(handle) if cancelled => {
                *current = Slot::Idle;
                drop(current);
                handle.stop();
                let _ = handle.join();
                error::set_error_message("proxy startup was cancelled by fs_proxy_stop");
                FsProxyResult::NotRunning
            }
            Ok(handle) => {
                *current = Slot::Running(handle);
                FsProxyResult::Ok
            }
            Err(err) => {
                *current = Slot::Idle;
                error::map_engine_error(&err)
            }
        }
    })
}

/// Stop the running proxy and wait for its threads to exit.
///
/// Returns `LinkError` when the proxy had already died on a link error; the
/// proxy is cleaned up either way. A startup still waiting for its port is
/// cancelled without waiting.
#[no_mangle]
pub extern "C" fn fs_proxy_stop() -> FsProxyResult {
    crate::ffi_boundary(FsProxyResult::Internal, || {
        error::clear_error_state();

        let mut current = slot();
        let handle = match std::mem::replace(&mut *current, Slot::Idle) {
            Slot::Idle => {
                error::set_error_message("no proxy is running");
                return FsProxyResult::NotRunning;
            }
            Slot::Starting { .. } => {
                *current = Slot::Starting { cancelled: true };
                return FsProxyResult::Ok;
            }
            Slot::Running(handle) => handle,
        };
        drop(current);

        handle.stop();
        match handle.join().error {
            None => FsProxyResult::Ok,
            Some(err) => error::map_engine_error(&err),
        }
    })
}

/// 1 while a proxy is serving, 0 otherwise (including during startup).
#[no_mangle]
pub extern "C" fn fs_proxy_is_running() -> i32 {
    crate::ffi_boundary(0, || match &*slot() {
        Slot::Running(handle) => i32::from(!handle.is_finished()),
        Slot::Idle | Slot::Starting { .. } => 0,
    })
}
