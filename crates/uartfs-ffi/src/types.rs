/// Status returned by every `fs_proxy_*` call.
///
/// On anything but `Ok`, `fs_proxy_last_error()` describes the failure.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsProxyResult {
    Ok = 0,
    InvalidArgument = 1,
    /// The UART could not be opened or configured.
    UartInit = 2,
    /// A proxy thread could not be started.
    TaskCreate = 3,
    AlreadyRunning = 4,
    NotRunning = 5,
    /// The proxy had already stopped on a link error.
    LinkError = 6,
    Internal = 99,
}

#[allow(dead_code)]
pub const FS_PROXY_OK: FsProxyResult = FsProxyResult::Ok;
#[allow(dead_code)]
pub const FS_PROXY_ERR_INVALID_ARGUMENT: FsProxyResult = FsProxyResult::InvalidArgument;
#[allow(dead_code)]
pub const FS_PROXY_ERR_UART_INIT: FsProxyResult = FsProxyResult::UartInit;
#[allow(dead_code)]
pub const FS_PROXY_ERR_TASK_CREATE: FsProxyResult = FsProxyResult::TaskCreate;
#[allow(dead_code)]
pub const FS_PROXY_ERR_ALREADY_RUNNING: FsProxyResult = FsProxyResult::AlreadyRunning;
#[allow(dead_code)]
pub const FS_PROXY_ERR_NOT_RUNNING: FsProxyResult = FsProxyResult::NotRunning;
#[allow(dead_code)]
pub const FS_PROXY_ERR_LINK: FsProxyResult = FsProxyResult::LinkError;
#[allow(dead_code)]
pub const FS_PROXY_ERR_INTERNAL: FsProxyResult = FsProxyResult::Internal;
