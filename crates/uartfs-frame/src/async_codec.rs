//! `tokio_util::codec` adapter over [`FrameDecoder`].

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameDecoder, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Frame codec for `FramedRead`/`FramedWrite` over async byte streams.
#[derive(Debug)]
pub struct UartCodec {
    decoder: FrameDecoder,
    max_payload: usize,
}

impl UartCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_payload),
            max_payload,
        }
    }

    /// The underlying decoder, for stats.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl Default for UartCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for UartCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let (frame, consumed) = {
            let mut frames = self.decoder.feed(src);
            let frame = frames.next();
            (frame, src.len() - frames.remaining().len())
        };
        src.advance(consumed);
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.decoder.in_frame() => {
                self.decoder.reset();
                Err(FrameError::ConnectionClosed)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for UartCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item.opcode, &item.payload, dst, self.max_payload)
    }
}
