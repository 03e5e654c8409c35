use bytes::{BufMut, Bytes, BytesMut};
use uartfs_frame::Frame;

use crate::error::{DecodeError, Result};
use crate::opcode;
use crate::types::{
    DirEntry, DirListing, ErrorCode, FileKind, FileStat, Handle, OpenMode, SessionInfo, Whence,
};

/// Bytes an `Ok(Data)` response spends before the data itself (tag + length).
pub const DATA_OVERHEAD: usize = 1 + 4;

/// Bytes an `Ok(Entries)` response spends before the first entry (tag + flag + count).
pub const ENTRIES_OVERHEAD: usize = 1 + 1 + 2;

const TAG_EMPTY: u8 = 0;
const TAG_HANDLE: u8 = 1;
const TAG_DATA: u8 = 2;
const TAG_WRITTEN: u8 = 3;
const TAG_OFFSET: u8 = 4;
const TAG_STAT: u8 = 5;
const TAG_ENTRIES: u8 = 6;
const TAG_SESSION: u8 = 7;

/// Host-to-device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open { path: String, mode: OpenMode },
    /// `offset` may be [`CURRENT_POSITION`](crate::CURRENT_POSITION).
    Read { handle: Handle, offset: u32, len: u32 },
    /// `offset` may be [`CURRENT_POSITION`](crate::CURRENT_POSITION).
    Write { handle: Handle, offset: u32, data: Bytes },
    Seek { handle: Handle, offset: i32, whence: Whence },
    Close { handle: Handle },
    Stat { path: String },
    List { path: String },
    Delete { path: String },
    /// Drop every open handle and report capabilities.
    Hello,
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Open { .. } => opcode::OPEN,
            Self::Read { .. } => opcode::READ,
            Self::Write { .. } => opcode::WRITE,
            Self::Seek { .. } => opcode::SEEK,
            Self::Close { .. } => opcode::CLOSE,
            Self::Stat { .. } => opcode::STAT,
            Self::List { .. } => opcode::LIST,
            Self::Delete { .. } => opcode::DELETE,
            Self::Hello => opcode::HELLO,
        }
    }

    /// The handle this request targets, if any.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Read { handle, .. }
            | Self::Write { handle, .. }
            | Self::Seek { handle, .. }
            | Self::Close { handle } => Some(*handle),
            _ => None,
        }
    }

    /// The path this request targets, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Open { path, .. }
            | Self::Stat { path }
            | Self::List { path }
            | Self::Delete { path } => Some(path),
            _ => None,
        }
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Self::Open { path, mode } => {
                dst.put_u8(mode.as_u8());
                put_str(dst, path);
            }
            Self::Read {
                handle,
                offset,
                len,
            } => {
                dst.put_u16_le(handle.0);
                dst.put_u32_le(*offset);
                dst.put_u32_le(*len);
            }
            Self::Write {
                handle,
                offset,
                data,
            } => {
                dst.put_u16_le(handle.0);
                dst.put_u32_le(*offset);
                put_bytes(dst, data);
            }
            Self::Seek {
                handle,
                offset,
                whence,
            } => {
                dst.put_u16_le(handle.0);
                dst.put_i32_le(*offset);
                dst.put_u8(whence.as_u8());
            }
            Self::Close { handle } => dst.put_u16_le(handle.0),
            Self::Stat { path } | Self::List { path } | Self::Delete { path } => {
                put_str(dst, path)
            }
            Self::Hello => {}
        }
    }

    fn decode_body(opcode: u8, fields: &mut Fields<'_>) -> Result<Self> {
        Ok(match opcode {
            opcode::OPEN => {
                let raw = fields.u8("mode")?;
                let mode = OpenMode::from_u8(raw).ok_or(DecodeError::InvalidEnum {
                    field: "mode",
                    value: raw,
                })?;
                Self::Open {
                    mode,
                    path: fields.str("path")?,
                }
            }
            opcode::READ => Self::Read {
                handle: Handle(fields.u16("handle")?),
                offset: fields.u32("offset")?,
                len: fields.u32("length")?,
            },
            opcode::WRITE => Self::Write {
                handle: Handle(fields.u16("handle")?),
                offset: fields.u32("offset")?,
                data: fields.bytes("data")?,
            },
            opcode::SEEK => {
                let handle = Handle(fields.u16("handle")?);
                let offset = fields.i32("offset")?;
                let raw = fields.u8("whence")?;
                let whence = Whence::from_u8(raw).ok_or(DecodeError::InvalidEnum {
                    field: "whence",
                    value: raw,
                })?;
                Self::Seek {
                    handle,
                    offset,
                    whence,
                }
            }
            opcode::CLOSE => Self::Close {
                handle: Handle(fields.u16("handle")?),
            },
            opcode::STAT => Self::Stat {
                path: fields.str("path")?,
            },
            opcode::LIST => Self::List {
                path: fields.str("path")?,
            },
            opcode::DELETE => Self::Delete {
                path: fields.str("path")?,
            },
            opcode::HELLO => Self::Hello,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OkPayload {
    Empty,
    Handle(Handle),
    /// Bytes read. Empty at end of file.
    Data(Bytes),
    Written(u32),
    Offset(u32),
    Stat(FileStat),
    Entries(DirListing),
    Session(SessionInfo),
}

/// Device-to-host response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(OkPayload),
    Err(ErrorCode),
}

impl Response {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Ok(_) => opcode::OK,
            Self::Err(_) => opcode::ERR,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Self::Err(code) => dst.put_u8(code.as_u8()),
            Self::Ok(OkPayload::Empty) => dst.put_u8(TAG_EMPTY),
            Self::Ok(OkPayload::Handle(handle)) => {
                dst.put_u8(TAG_HANDLE);
                dst.put_u16_le(handle.0);
            }
            Self::Ok(OkPayload::Data(data)) => {
                dst.put_u8(TAG_DATA);
                put_bytes(dst, data);
            }
            Self::Ok(OkPayload::Written(n)) => {
                dst.put_u8(TAG_WRITTEN);
                dst.put_u32_le(*n);
            }
            Self::Ok(OkPayload::Offset(offset)) => {
                dst.put_u8(TAG_OFFSET);
                dst.put_u32_le(*offset);
            }
            Self::Ok(OkPayload::Stat(stat)) => {
                dst.put_u8(TAG_STAT);
                dst.put_u32_le(stat.size);
                dst.put_u8(stat.kind.as_u8());
                dst.put_u32_le(stat.mtime);
            }
            Self::Ok(OkPayload::Entries(listing)) => {
                let count = listing.entries.len().min(u16::MAX as usize);
                dst.put_u8(TAG_ENTRIES);
                dst.put_u8(u8::from(listing.truncated || count < listing.entries.len()));
                dst.put_u16_le(count as u16);
                for entry in &listing.entries[..count] {
                    dst.put_u8(entry.kind.as_u8());
                    dst.put_u32_le(entry.size);
                    put_str(dst, &entry.name);
                }
            }
            Self::Ok(OkPayload::Session(info)) => {
                dst.put_u8(TAG_SESSION);
                dst.put_u8(info.protocol_version);
                dst.put_u16_le(info.max_payload);
            }
        }
    }

    fn decode_body(opcode: u8, fields: &mut Fields<'_>) -> Result<Self> {
        if opcode == opcode::ERR {
            let raw = fields.u8("code")?;
            let code = ErrorCode::from_u8(raw).ok_or(DecodeError::InvalidEnum {
                field: "code",
                value: raw,
            })?;
            return Ok(Self::Err(code));
        }

        let payload = match fields.u8("tag")? {
            TAG_EMPTY => OkPayload::Empty,
            TAG_HANDLE => OkPayload::Handle(Handle(fields.u16("handle")?)),
            TAG_DATA => OkPayload::Data(fields.bytes("data")?),
            TAG_WRITTEN => OkPayload::Written(fields.u32("written")?),
            TAG_OFFSET => OkPayload::Offset(fields.u32("offset")?),
            TAG_STAT => OkPayload::Stat(FileStat {
                size: fields.u32("size")?,
                kind: fields.kind()?,
                mtime: fields.u32("mtime")?,
            }),
            TAG_ENTRIES => {
                let truncated = match fields.u8("truncated")? {
                    0 => false,
                    1 => true,
                    value => {
                        return Err(DecodeError::InvalidEnum {
                            field: "truncated",
                            value,
                        })
                    }
                };
                let count = fields.u16("count")? as usize;
                // Each entry is at least 7 bytes; do not trust `count` for capacity.
                let mut entries = Vec::with_capacity(count.min(fields.remaining() / 7));
                for _ in 0..count {
                    let kind = fields.kind()?;
                    let size = fields.u32("size")?;
                    let name = fields.str("name")?;
                    entries.push(DirEntry { name, kind, size });
                }
                OkPayload::Entries(DirListing { truncated, entries })
            }
            TAG_SESSION => OkPayload::Session(SessionInfo {
                protocol_version: fields.u8("protocol_version")?,
                max_payload: fields.u16("max_payload")?,
            }),
            value => return Err(DecodeError::InvalidEnum { field: "tag", value }),
        };
        Ok(Self::Ok(payload))
    }
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Request(request) => request.opcode(),
            Self::Response(response) => response.opcode(),
        }
    }

    /// Append the payload encoding to `dst`; returns the frame opcode.
    ///
    /// Strings longer than a u16 prefix allows are cut at a character boundary.
    pub fn encode(&self, dst: &mut BytesMut) -> u8 {
        match self {
            Self::Request(request) => request.encode_body(dst),
            Self::Response(response) => response.encode_body(dst),
        }
        self.opcode()
    }

    /// Encode into a standalone frame.
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::new();
        let opcode = self.encode(&mut payload);
        Frame::new(opcode, payload.freeze())
    }

    /// Decode a validated frame. The whole payload must be consumed.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let mut fields = Fields::new(&frame.payload);
        let message = if opcode::is_response(frame.opcode) {
            match frame.opcode {
                opcode::OK | opcode::ERR => {
                    Self::Response(Response::decode_body(frame.opcode, &mut fields)?)
                }
                other => return Err(DecodeError::UnknownOpcode(other)),
            }
        } else {
            Self::Request(Request::decode_body(frame.opcode, &mut fields)?)
        };
        fields.finish()?;
        Ok(message)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

fn put_str(dst: &mut BytesMut, s: &str) {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    dst.put_u16_le(end as u16);
    dst.put_slice(&s.as_bytes()[..end]);
}

fn put_bytes(dst: &mut BytesMut, data: &[u8]) {
    // A frame payload is bounded by u16, so the u32 prefix always fits.
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
}

/// Cursor over a payload that names the field it failed on.
struct Fields<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if needed > available {
            return Err(DecodeError::TruncatedField {
                field,
                needed,
                available,
            });
        }
        let buf: &'a Bytes = self.buf;
        let start = self.pos;
        self.pos += needed;
        Ok(&buf[start..self.pos])
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16> {
        self.array(field).map(u16::from_le_bytes)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.array(field).map(u32::from_le_bytes)
    }

    fn i32(&mut self, field: &'static str) -> Result<i32> {
        self.array(field).map(i32::from_le_bytes)
    }

    fn kind(&mut self) -> Result<FileKind> {
        let raw = self.u8("kind")?;
        FileKind::from_u8(raw).ok_or(DecodeError::InvalidEnum {
            field: "kind",
            value: raw,
        })
    }

    fn str(&mut self, field: &'static str) -> Result<String> {
        let len = self.u16(field)? as usize;
        let raw = self.take(field, len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes> {
        let len = self.u32(field)? as usize;
        let start = self.pos;
        self.take(field, len)?;
        Ok(self.buf.slice(start..self.pos))
    }

    fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(DecodeError::TrailingBytes { count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CURRENT_POSITION, PROTOCOL_VERSION};

    fn roundtrip(message: Message) -> Message {
        Message::decode(&message.to_frame()).unwrap()
    }

    #[test]
    fn open_layout() {
        let frame = Message::from(Request::Open {
            path: "/a.txt".into(),
            mode: OpenMode::Read,
        })
        .to_frame();

        assert_eq!(frame.opcode, opcode::OPEN);
        assert_eq!(frame.payload.as_ref(), b"\x00\x06\x00/a.txt");
    }

    #[test]
    fn read_layout_is_little_endian() {
        let frame = Message::from(Request::Read {
            handle: Handle(0x0102),
            offset: 0x0A0B0C0D,
            len: 4,
        })
        .to_frame();

        assert_eq!(
            frame.payload.as_ref(),
            &[0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A, 4, 0, 0, 0]
        );
    }

    #[test]
    fn seek_negative_offset() {
        let message = Message::from(Request::Seek {
            handle: Handle(3),
            offset: -10,
            whence: Whence::End,
        });
        let frame = message.to_frame();
        assert_eq!(&frame.payload[2..6], &(-10i32).to_le_bytes());
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn data_response_layout() {
        let frame = Message::from(Response::Ok(OkPayload::Data(Bytes::from_static(b"abcd"))))
            .to_frame();

        assert_eq!(frame.opcode, opcode::OK);
        assert_eq!(frame.payload.as_ref(), b"\x02\x04\x00\x00\x00abcd");
        assert_eq!(frame.payload.len(), DATA_OVERHEAD + 4);
    }

    #[test]
    fn error_response_layout() {
        let frame = Message::from(Response::Err(ErrorCode::InvalidHandle)).to_frame();
        assert_eq!(frame.opcode, opcode::ERR);
        assert_eq!(frame.payload.as_ref(), &[5]);
    }

    #[test]
    fn entries_roundtrip_with_truncated_flag() {
        let listing = DirListing {
            truncated: true,
            entries: vec![
                DirEntry {
                    name: "boot".into(),
                    kind: FileKind::Dir,
                    size: 0,
                },
                DirEntry {
                    name: "log.txt".into(),
                    kind: FileKind::File,
                    size: 1234,
                },
            ],
        };
        let message = Message::from(Response::Ok(OkPayload::Entries(listing.clone())));
        let frame = message.to_frame();

        let expected_len = ENTRIES_OVERHEAD
            + listing.entries.iter().map(DirEntry::encoded_len).sum::<usize>();
        assert_eq!(frame.payload.len(), expected_len);
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn hello_and_session_info() {
        let hello = Message::from(Request::Hello);
        assert!(hello.to_frame().payload.is_empty());
        assert_eq!(roundtrip(hello.clone()), hello);

        let session = Message::from(Response::Ok(OkPayload::Session(SessionInfo {
            protocol_version: PROTOCOL_VERSION,
            max_payload: 4096,
        })));
        assert_eq!(roundtrip(session.clone()), session);
    }

    #[test]
    fn write_at_cursor() {
        let message = Message::from(Request::Write {
            handle: Handle(1),
            offset: CURRENT_POSITION,
            data: Bytes::from_static(&[0x7E, 0x7D, 0x00]),
        });
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn unknown_opcode() {
        let err = Message::decode(&Frame::new(0x42, Bytes::new())).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode(0x42));
        assert_eq!(err.error_code(), ErrorCode::Unsupported);

        let err = Message::decode(&Frame::new(0x90, Bytes::new())).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode(0x90));
    }

    #[test]
    fn truncated_field_is_named() {
        let err = Message::decode(&Frame::new(opcode::READ, Bytes::from_static(&[1, 0, 0, 0]))).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedField {
                field: "offset",
                needed: 4,
                available: 2
            }
        );
        assert_eq!(err.error_code(), ErrorCode::Truncated);
    }

    #[test]
    fn path_longer_than_payload_is_truncated() {
        let err = Message::decode(&Frame::new(opcode::STAT, Bytes::from_static(&[0xFF, 0xFF, b'/']))).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedField { field: "path", .. }));
    }

    #[test]
    fn invalid_enums() {
        let err = Message::decode(&Frame::new(opcode::OPEN, Bytes::from_static(&[9, 1, 0, b'x']))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidEnum { field: "mode", value: 9 });

        let err =
            Message::decode(&Frame::new(opcode::SEEK, Bytes::from_static(&[1, 0, 0, 0, 0, 0, 3]))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidEnum { field: "whence", value: 3 });
        assert_eq!(err.error_code(), ErrorCode::Malformed);

        let err = Message::decode(&Frame::new(opcode::ERR, Bytes::from_static(&[0]))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidEnum { field: "code", value: 0 });
    }

    #[test]
    fn invalid_utf8_path() {
        let err =
            Message::decode(&Frame::new(opcode::DELETE, Bytes::from_static(&[2, 0, 0xC3, 0x28]))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidUtf8 { field: "path" });
    }

    #[test]
    fn trailing_bytes_rejected() {
        let err = Message::decode(&Frame::new(opcode::CLOSE, Bytes::from_static(&[1, 0, 0xAA]))).unwrap_err();
        assert_eq!(err, DecodeError::TrailingBytes { count: 1 });

        let err = Message::decode(&Frame::new(opcode::HELLO, Bytes::from_static(&[0]))).unwrap_err();
        assert_eq!(err, DecodeError::TrailingBytes { count: 1 });
    }

    #[test]
    fn huge_entry_count_does_not_preallocate() {
        let payload = [TAG_ENTRIES, 0, 0xFF, 0xFF];
        let err = Message::decode(&Frame::new(opcode::OK, Bytes::copy_from_slice(&payload))).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedField { field: "kind", .. }));
    }

    #[test]
    fn long_strings_are_cut_on_char_boundary() {
        let path = "é".repeat(40_000);
        let message = Message::from(Request::Stat { path });
        let decoded = roundtrip(message);
        let Message::Request(Request::Stat { path }) = decoded else {
            panic!("expected stat request");
        };
        assert_eq!(path.len(), 65_534);
    }

    #[test]
    fn accessors() {
        let read = Request::Read {
            handle: Handle(7),
            offset: 0,
            len: 1,
        };
        assert_eq!(read.handle(), Some(Handle(7)));
        assert_eq!(read.path(), None);

        let list = Request::List { path: "/".into() };
        assert_eq!(list.path(), Some("/"));
        assert_eq!(list.handle(), None);
    }
}
