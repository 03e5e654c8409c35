//! Typed uartfs requests and responses.
//!
//! A [`Message`] travels as one frame: the opcode in the frame header, then
//! fixed-width little-endian fields, then length-prefixed variable fields
//! (u16 for strings, u32 for byte buffers).

pub mod error;
pub mod message;
pub mod opcode;
pub mod types;

pub use error::{DecodeError, ParseOpenModeError, Result};
pub use message::{Message, OkPayload, Request, Response, DATA_OVERHEAD, ENTRIES_OVERHEAD};
pub use types::{
    DirEntry, DirListing, ErrorCode, FileKind, FileStat, Handle, OpenMode, SessionInfo, Whence,
    CURRENT_POSITION, PROTOCOL_VERSION,
};
