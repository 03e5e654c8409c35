use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::crc::Crc32;
use crate::error::{FrameError, Result};

/// Start-of-frame marker. Never appears anywhere else on the wire.
pub const START_MARKER: u8 = 0x7E;

/// Escape byte: the next byte on the wire is XORed with [`ESCAPE_XOR`].
pub const ESCAPE: u8 = 0x7D;

const ESCAPE_XOR: u8 = 0x20;

const LEN_SIZE: usize = 2;
const OPCODE_SIZE: usize = 1;
const CRC_SIZE: usize = 4;

/// Default maximum payload size: 4 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024;

/// Largest payload the 16-bit length field can describe (it also covers the opcode).
pub const MAX_PAYLOAD_LIMIT: usize = u16::MAX as usize - OPCODE_SIZE;

/// A validated frame: one opcode plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message opcode.
    pub opcode: u8,
    /// The message payload (everything after the opcode).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Encode into the wire format, rejecting payloads above `max_payload`.
    pub fn encode(&self, dst: &mut BytesMut, max_payload: usize) -> Result<()> {
        encode_frame(self.opcode, &self.payload, dst, max_payload)
    }
}

/// Worst-case wire size of a frame with `payload_len` payload bytes (every byte escaped).
pub fn max_wire_size(payload_len: usize) -> usize {
    1 + 2 * (LEN_SIZE + OPCODE_SIZE + payload_len + CRC_SIZE)
}

/// Encode a frame into the wire format.
///
/// Wire format (everything after the marker is byte-stuffed):
/// ```text
/// ┌────────┬────────────┬──────────┬────────────────┬──────────────┐
/// │ 0x7E   │ Length     │ Opcode   │ Payload        │ CRC-32       │
/// │        │ (2B LE)    │ (1B)     │ (Length-1 B)   │ (4B LE)      │
/// └────────┴────────────┴──────────┴────────────────┴──────────────┘
/// ```
/// The CRC covers the unstuffed length, opcode and payload bytes.
pub fn encode_frame(opcode: u8, payload: &[u8], dst: &mut BytesMut, max_payload: usize) -> Result<()> {
    let max = max_payload.min(MAX_PAYLOAD_LIMIT);
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let len = ((payload.len() + OPCODE_SIZE) as u16).to_le_bytes();
    let mut crc = Crc32::new();
    crc.update(&len);
    crc.update(&[opcode]);
    crc.update(payload);

    dst.reserve(max_wire_size(payload.len()));
    dst.put_u8(START_MARKER);
    put_stuffed(dst, &len);
    put_stuffed(dst, &[opcode]);
    put_stuffed(dst, payload);
    put_stuffed(dst, &crc.finish().to_le_bytes());
    Ok(())
}

fn put_stuffed(dst: &mut BytesMut, bytes: &[u8]) {
    for &byte in bytes {
        if byte == START_MARKER || byte == ESCAPE {
            dst.put_u8(ESCAPE);
            dst.put_u8(byte ^ ESCAPE_XOR);
        } else {
            dst.put_u8(byte);
        }
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 4 KiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Counters for what the decoder accepted and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames that passed validation.
    pub frames: u64,
    /// Frames dropped on checksum mismatch.
    pub crc_errors: u64,
    /// Frames dropped because the length field was zero or above the maximum.
    pub bad_length: u64,
    /// Frames dropped on an invalid escape or a marker inside the frame.
    pub malformed: u64,
    /// Partial frames abandoned by [`FrameDecoder::reset`].
    pub abandoned: u64,
    /// Bytes thrown away outside of accepted frames.
    pub discarded_bytes: u64,
}

impl DecoderStats {
    /// Total frames dropped for any reason.
    pub fn dropped(&self) -> u64 {
        self.crc_errors + self.bad_length + self.malformed + self.abandoned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a start marker.
    Hunt,
    Length,
    Body,
    Checksum,
}

#[derive(Debug, Clone, Copy)]
enum DropReason {
    BadLength,
    Malformed,
    Checksum,
}

/// Incremental frame decoder with a fixed memory ceiling.
///
/// Feed it whatever the link delivers, in chunks of any size; it yields the
/// same frames regardless of how the stream was split.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    escaped: bool,
    len_buf: [u8; LEN_SIZE],
    len_filled: usize,
    expected: usize,
    body: BytesMut,
    crc_buf: [u8; CRC_SIZE],
    crc_filled: usize,
    raw_in_frame: u64,
    max_payload: usize,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    /// Create a decoder accepting payloads up to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        let max_payload = max_payload.min(MAX_PAYLOAD_LIMIT);
        Self {
            state: State::Hunt,
            escaped: false,
            len_buf: [0; LEN_SIZE],
            len_filled: 0,
            expected: 0,
            body: BytesMut::with_capacity(max_payload + OPCODE_SIZE),
            crc_buf: [0; CRC_SIZE],
            crc_filled: 0,
            raw_in_frame: 0,
            max_payload,
            stats: DecoderStats::default(),
        }
    }

    /// Feed bytes; returns a lazy iterator over the frames they complete.
    ///
    /// Bytes are consumed only as the iterator advances. Dropping it early
    /// leaves the rest of `input` unread; see [`Frames::remaining`].
    pub fn feed<'a>(&'a mut self, input: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            input,
        }
    }

    /// Push a single byte. Returns a frame when this byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if byte == START_MARKER {
            if self.state != State::Hunt {
                debug!(
                    partial_bytes = self.raw_in_frame,
                    "start marker inside frame; resynchronizing"
                );
                self.drop_frame(DropReason::Malformed);
            }
            self.begin();
            return None;
        }

        if self.state == State::Hunt {
            self.stats.discarded_bytes += 1;
            return None;
        }

        self.raw_in_frame += 1;
        let byte = if self.escaped {
            self.escaped = false;
            let unescaped = byte ^ ESCAPE_XOR;
            if unescaped != START_MARKER && unescaped != ESCAPE {
                debug!(byte, "invalid escape sequence");
                self.drop_frame(DropReason::Malformed);
                return None;
            }
            unescaped
        } else if byte == ESCAPE {
            self.escaped = true;
            return None;
        } else {
            byte
        };

        self.accept(byte)
    }

    /// True once a start marker has been seen and the frame is not finished yet.
    pub fn in_frame(&self) -> bool {
        self.state != State::Hunt
    }

    /// Abandon any partial frame and go back to hunting for a start marker.
    pub fn reset(&mut self) {
        if self.in_frame() {
            self.stats.abandoned += 1;
            self.stats.discarded_bytes += self.raw_in_frame + 1;
        }
        self.state = State::Hunt;
        self.clear_frame();
    }

    /// Largest payload this decoder accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Counters since construction.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn begin(&mut self) {
        self.clear_frame();
        self.state = State::Length;
    }

    fn clear_frame(&mut self) {
        self.escaped = false;
        self.len_filled = 0;
        self.expected = 0;
        self.body.clear();
        self.crc_filled = 0;
        self.raw_in_frame = 0;
    }

    fn accept(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::Hunt => None,
            State::Length => {
                self.len_buf[self.len_filled] = byte;
                self.len_filled += 1;
                if self.len_filled == LEN_SIZE {
                    let len = u16::from_le_bytes(self.len_buf) as usize;
                    if len < OPCODE_SIZE || len > self.max_payload + OPCODE_SIZE {
                        debug!(len, max = self.max_payload, "frame length out of range");
                        self.drop_frame(DropReason::BadLength);
                        return None;
                    }
                    self.expected = len;
                    self.state = State::Body;
                }
                None
            }
            State::Body => {
                self.body.put_u8(byte);
                if self.body.len() == self.expected {
                    self.state = State::Checksum;
                }
                None
            }
            State::Checksum => {
                self.crc_buf[self.crc_filled] = byte;
                self.crc_filled += 1;
                if self.crc_filled == CRC_SIZE {
                    return self.finish();
                }
                None
            }
        }
    }

    fn finish(&mut self) -> Option<Frame> {
        let mut crc = Crc32::new();
        crc.update(&self.len_buf);
        crc.update(&self.body);
        let expected = crc.finish();
        let received = u32::from_le_bytes(self.crc_buf);

        if expected != received {
            debug!(expected, received, "frame checksum mismatch");
            self.drop_frame(DropReason::Checksum);
            return None;
        }

        let frame = Frame {
            opcode: self.body[0],
            payload: Bytes::copy_from_slice(&self.body[OPCODE_SIZE..]),
        };
        trace!(opcode = frame.opcode, len = frame.payload.len(), "frame accepted");
        self.stats.frames += 1;
        self.state = State::Hunt;
        self.clear_frame();
        Some(frame)
    }

    fn drop_frame(&mut self, reason: DropReason) {
        match reason {
            DropReason::BadLength => self.stats.bad_length += 1,
            DropReason::Malformed => self.stats.malformed += 1,
            DropReason::Checksum => self.stats.crc_errors += 1,
        }
        self.stats.discarded_bytes += self.raw_in_frame + 1;
        self.state = State::Hunt;
        self.clear_frame();
    }
}

/// Frames completed by one [`FrameDecoder::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    input: &'a [u8],
}

impl<'a> Frames<'a> {
    /// Input not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        self.input
    }
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while let Some((&byte, rest)) = self.input.split_first() {
            self.input = rest;
            if let Some(frame) = self.decoder.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn encode_all(frames: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (opcode, payload) in frames {
            encode_frame(*opcode, payload, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        }
        buf.to_vec()
    }

    fn frame_strategy() -> impl Strategy<Value = (u8, Vec<u8>)> {
        (any::<u8>(), prop::collection::vec(any::<u8>(), 0..256))
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_output(
            frames in prop::collection::vec(frame_strategy(), 1..8),
            chunk in 1usize..64,
        ) {
            let bytes = encode_all(&frames);

            let mut whole = FrameDecoder::default();
            let all_at_once: Vec<Frame> = whole.feed(&bytes).collect();

            let mut split = FrameDecoder::default();
            let mut byte_wise = Vec::new();
            for piece in bytes.chunks(chunk) {
                byte_wise.extend(split.feed(piece));
            }

            let mut single = FrameDecoder::default();
            let mut one_by_one = Vec::new();
            for byte in &bytes {
                one_by_one.extend(single.feed(std::slice::from_ref(byte)));
            }

            prop_assert_eq!(&all_at_once, &byte_wise);
            prop_assert_eq!(&all_at_once, &one_by_one);
            prop_assert_eq!(all_at_once.len(), frames.len());
            for (frame, (opcode, payload)) in all_at_once.iter().zip(&frames) {
                prop_assert_eq!(frame.opcode, *opcode);
                prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
            }
        }

        #[test]
        fn garbage_never_blocks_the_next_frame(
            garbage in prop::collection::vec(any::<u8>(), 0..128),
            (opcode, payload) in frame_strategy(),
        ) {
            let mut bytes = garbage;
            bytes.extend(encode_all(&[(opcode, payload.clone())]));

            let mut decoder = FrameDecoder::default();
            let frames: Vec<Frame> = decoder.feed(&bytes).collect();

            let last = frames.last().expect("the trailing frame must decode");
            prop_assert_eq!(last.opcode, opcode);
            prop_assert_eq!(last.payload.as_ref(), payload.as_slice());
        }
    }
}
