use std::fmt;
use std::str::FromStr;

use crate::error::ParseOpenModeError;

/// Protocol revision reported by `Hello`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Read/Write offset meaning "at the handle's current cursor".
pub const CURRENT_POSITION: u32 = u32::MAX;

/// Opaque reference to an open file, assigned by the device on `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u16);

impl Handle {
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a file is opened. Semantics follow C `fopen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// `r`: read an existing file.
    Read,
    /// `w`: create or truncate, write only.
    Write,
    /// `a`: create if missing, every write goes to the end.
    Append,
    /// `r+`: read and write an existing file.
    ReadWrite,
    /// `w+`: create or truncate, read and write.
    ReadWriteTruncate,
    /// `a+`: create if missing, read anywhere, write at the end.
    ReadAppend,
}

impl OpenMode {
    pub const ALL: [OpenMode; 6] = [
        OpenMode::Read,
        OpenMode::Write,
        OpenMode::Append,
        OpenMode::ReadWrite,
        OpenMode::ReadWriteTruncate,
        OpenMode::ReadAppend,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Append => 2,
            Self::ReadWrite => 3,
            Self::ReadWriteTruncate => 4,
            Self::ReadAppend => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// The `fopen` spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::Append => "a",
            Self::ReadWrite => "r+",
            Self::ReadWriteTruncate => "w+",
            Self::ReadAppend => "a+",
        }
    }

    pub fn readable(self) -> bool {
        !matches!(self, Self::Write | Self::Append)
    }

    /// True for every mode that can modify the file.
    pub fn writable(self) -> bool {
        self != Self::Read
    }

    pub fn appends(self) -> bool {
        matches!(self, Self::Append | Self::ReadAppend)
    }

    pub fn truncates(self) -> bool {
        matches!(self, Self::Write | Self::ReadWriteTruncate)
    }

    /// Creates the file when it does not exist.
    pub fn creates(self) -> bool {
        !matches!(self, Self::Read | Self::ReadWrite)
    }
}

impl FromStr for OpenMode {
    type Err = ParseOpenModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `b` is accepted and ignored, as `fopen` does.
        let mode: String = s.chars().filter(|c| *c != 'b').collect();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == mode)
            .ok_or_else(|| ParseOpenModeError(s.to_string()))
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference point for `Seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Current => 1,
            Self::End => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Start),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// Type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Dir,
    /// Symlinks, devices, sockets.
    Other,
}

impl FileKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Dir => 1,
            Self::Other => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::File),
            1 => Some(Self::Dir),
            2 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Result of `Stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes, saturated at `u32::MAX`.
    pub size: u32,
    pub kind: FileKind,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u32,
}

/// One entry of a `List` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    pub size: u32,
}

impl DirEntry {
    /// Bytes this entry takes in an `Entries` body.
    pub fn encoded_len(&self) -> usize {
        1 + 4 + 2 + self.name.len().min(u16::MAX as usize)
    }
}

/// Directory listing, possibly cut to fit one response frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Set when entries were left out.
    pub truncated: bool,
    pub entries: Vec<DirEntry>,
}

impl DirListing {
    /// Keep the leading entries whose `Ok` response fits in `max_payload` bytes.
    pub fn fitting(entries: Vec<DirEntry>, max_payload: usize) -> Self {
        let mut used = crate::message::ENTRIES_OVERHEAD;
        let mut kept = 0usize;
        for entry in &entries {
            let len = entry.encoded_len();
            if used + len > max_payload || kept == u16::MAX as usize {
                break;
            }
            used += len;
            kept += 1;
        }

        let truncated = kept < entries.len();
        let mut entries = entries;
        entries.truncate(kept);
        Self { truncated, entries }
    }
}

/// Capabilities reported by `Hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub protocol_version: u8,
    pub max_payload: u16,
}

/// Protocol error codes carried by `Err` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    IoError,
    OutOfSpace,
    InvalidHandle,
    Truncated,
    Timeout,
    Malformed,
    Unsupported,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::NotFound => 1,
            Self::PermissionDenied => 2,
            Self::IoError => 3,
            Self::OutOfSpace => 4,
            Self::InvalidHandle => 5,
            Self::Truncated => 6,
            Self::Timeout => 7,
            Self::Malformed => 8,
            Self::Unsupported => 9,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NotFound),
            2 => Some(Self::PermissionDenied),
            3 => Some(Self::IoError),
            4 => Some(Self::OutOfSpace),
            5 => Some(Self::InvalidHandle),
            6 => Some(Self::Truncated),
            7 => Some(Self::Timeout),
            8 => Some(Self::Malformed),
            9 => Some(Self::Unsupported),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::IoError => "io_error",
            Self::OutOfSpace => "out_of_space",
            Self::InvalidHandle => "invalid_handle",
            Self::Truncated => "truncated",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
