//! The filesystem seam the engine dispatches into.

use std::io;

use uartfs_message::{DirEntry, ErrorCode, FileStat, Handle, OpenMode, Whence};

/// Filesystem failures, one per protocol error code the adapter can cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("out of space")]
    OutOfSpace,

    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    #[error("unsupported operation")]
    Unsupported,
}

impl FsError {
    /// Protocol error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::Io(_) => ErrorCode::IoError,
            Self::OutOfSpace => ErrorCode::OutOfSpace,
            Self::InvalidHandle(_) => ErrorCode::InvalidHandle,
            Self::Unsupported => ErrorCode::Unsupported,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied
            }
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded | io::ErrorKind::FileTooLarge => {
                Self::OutOfSpace
            }
            io::ErrorKind::Unsupported => Self::Unsupported,
            _ => Self::Io(err.to_string()),
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Operations the engine performs on behalf of the host.
///
/// Calls arrive one at a time on a dedicated executor thread. An
/// implementation owns its handle table; the engine only routes handles.
/// Offsets equal to [`CURRENT_POSITION`](uartfs_message::CURRENT_POSITION)
/// mean "at the handle's cursor", and `read`/`write` advance the cursor.
pub trait FileSystem: Send + 'static {
    fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Handle>;

    /// Read up to `len` bytes. An empty result means end of file.
    fn read(&mut self, handle: Handle, offset: u32, len: u32) -> FsResult<Vec<u8>>;

    /// Returns the number of bytes written.
    fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> FsResult<u32>;

    /// Move the cursor; returns the new absolute offset.
    fn seek(&mut self, handle: Handle, offset: i32, whence: Whence) -> FsResult<u32>;

    fn close(&mut self, handle: Handle) -> FsResult<()>;

    fn stat(&mut self, path: &str) -> FsResult<FileStat>;

    fn list(&mut self, path: &str) -> FsResult<Vec<DirEntry>>;

    fn delete(&mut self, path: &str) -> FsResult<()>;

    /// Release every open handle (session reset). Returns how many were open.
    fn close_all(&mut self) -> usize;
}

impl<T: FileSystem + ?Sized> FileSystem for Box<T> {
    fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Handle> {
        (**self).open(path, mode)
    }

    fn read(&mut self, handle: Handle, offset: u32, len: u32) -> FsResult<Vec<u8>> {
        (**self).read(handle, offset, len)
    }

    fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> FsResult<u32> {
        (**self).write(handle, offset, data)
    }

    fn seek(&mut self, handle: Handle, offset: i32, whence: Whence) -> FsResult<u32> {
        (**self).seek(handle, offset, whence)
    }

    fn close(&mut self, handle: Handle) -> FsResult<()> {
        (**self).close(handle)
    }

    fn stat(&mut self, path: &str) -> FsResult<FileStat> {
        (**self).stat(path)
    }

    fn list(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        (**self).list(path)
    }

    fn delete(&mut self, path: &str) -> FsResult<()> {
        (**self).delete(path)
    }

    fn close_all(&mut self) -> usize {
        (**self).close_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_codes() {
        let cases = [
            (io::ErrorKind::NotFound, ErrorCode::NotFound),
            (io::ErrorKind::PermissionDenied, ErrorCode::PermissionDenied),
            (io::ErrorKind::StorageFull, ErrorCode::OutOfSpace),
            (io::ErrorKind::Unsupported, ErrorCode::Unsupported),
            (io::ErrorKind::BrokenPipe, ErrorCode::IoError),
        ];
        for (kind, code) in cases {
            assert_eq!(FsError::from(io::Error::from(kind)).code(), code, "{kind:?}");
        }
    }

    #[test]
    fn invalid_handle_code() {
        assert_eq!(FsError::InvalidHandle(Handle(3)).code(), ErrorCode::InvalidHandle);
        assert_eq!(FsError::InvalidHandle(Handle(3)).to_string(), "invalid handle #3");
    }
}
