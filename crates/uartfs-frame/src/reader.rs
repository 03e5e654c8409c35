use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use uartfs_transport::UartStream;

use crate::codec::{Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 512;

/// Reads validated frames from any `Read` stream.
///
/// Handles partial reads and resynchronization internally; callers only ever
/// see frames that passed the checksum.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(config.max_payload_size),
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Read the next valid frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    /// Read timeouts surface as `FrameError::Io` with `WouldBlock`/`TimedOut`;
    /// a partial frame survives them and is completed by the next call.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if !self.pending.is_empty() {
                let mut frames = self.decoder.feed(&self.pending);
                let frame = frames.next();
                let consumed = self.pending.len() - frames.remaining().len();
                self.pending.advance(consumed);
                if let Some(frame) = frame {
                    return Ok(frame);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    /// Decoder counters (frames accepted, dropped, bytes discarded).
    pub fn stats(&self) -> crate::codec::DecoderStats {
        self.decoder.stats()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<UartStream> {
    /// Create a frame reader for a UART link and apply the read timeout from config.
    pub fn with_config_uart(mut inner: UartStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: uartfs_transport::TransportError) -> FrameError {
    match err {
        uartfs_transport::TransportError::Io(io)
        | uartfs_transport::TransportError::Accept(io) => FrameError::Io(io),
        uartfs_transport::TransportError::Open { source, .. }
        | uartfs_transport::TransportError::Bind { source, .. }
        | uartfs_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
