//! Byte-stuffed, CRC-checked framing for unreliable serial links.
//!
//! This is the core value-add layer of uartfs. Every message is framed with:
//! - A start marker (`0x7E`) that never appears inside a frame
//! - A 2-byte little-endian length covering opcode and payload
//! - A 1-byte opcode
//! - A CRC-32 trailer over length, opcode and payload
//!
//! The decoder drops anything that fails validation and resynchronizes on
//! the next start marker. Memory use is fixed by the configured maximum
//! payload, whatever the length field claims.

pub mod codec;
pub mod crc;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::UartCodec;
pub use codec::{
    encode_frame, max_wire_size, DecoderStats, Frame, FrameConfig, FrameDecoder, Frames,
    DEFAULT_MAX_PAYLOAD, ESCAPE, MAX_PAYLOAD_LIMIT, START_MARKER,
};
pub use crc::{crc32, Crc32};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
