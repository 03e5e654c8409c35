//! Frame opcodes.
//!
//! Opcodes below 0x80 are requests (host to device).
//! 0x80 and above are responses (device to host).

/// Open a file: `mode u8, path`.
pub const OPEN: u8 = 0x01;

/// Read from a handle: `handle u16, offset u32, length u32`.
pub const READ: u8 = 0x02;

/// Write to a handle: `handle u16, offset u32, data`.
pub const WRITE: u8 = 0x03;

/// Move a handle's cursor: `handle u16, offset i32, whence u8`.
pub const SEEK: u8 = 0x04;

/// Release a handle: `handle u16`.
pub const CLOSE: u8 = 0x05;

/// File metadata: `path`.
pub const STAT: u8 = 0x06;

/// Directory listing: `path`.
pub const LIST: u8 = 0x07;

/// Remove a file or empty directory: `path`.
pub const DELETE: u8 = 0x08;

/// Session reset and capability report (no payload).
pub const HELLO: u8 = 0x09;

/// Successful response: `tag u8, body`.
pub const OK: u8 = 0x80;

/// Failed response: `code u8`.
pub const ERR: u8 = 0xFF;

/// Returns a human-readable name for an opcode.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        OPEN => "OPEN",
        READ => "READ",
        WRITE => "WRITE",
        SEEK => "SEEK",
        CLOSE => "CLOSE",
        STAT => "STAT",
        LIST => "LIST",
        DELETE => "DELETE",
        HELLO => "HELLO",
        OK => "OK",
        ERR => "ERR",
        _ => "UNKNOWN",
    }
}

/// Returns true if the opcode is in the response range.
pub fn is_response(opcode: u8) -> bool {
    opcode >= OK
}
