//! The transfer state machine: one exchange at a time, one response per request.

use std::io::Write;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::Serialize;
use tracing::{debug, warn};
use uartfs_frame::{DecoderStats, Frame, FrameDecoder, FrameError, FrameWriter, START_MARKER};
use uartfs_message::{opcode, ErrorCode, Message, Response};

use crate::config::EngineConfig;
use crate::dispatch::{Dispatch, Dispatcher};

/// Lifecycle of the single active exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No frame in progress.
    Idle,
    /// A start marker was seen and the frame is still arriving.
    Receiving,
    /// A frame was validated and decoded.
    Decoded,
    /// The request is with the filesystem adapter.
    Dispatched,
    /// The response is being written.
    Responding,
}

/// Counters for one proxy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Validated frames handled as requests.
    pub requests: u64,
    pub responses: u64,
    /// Responses that carried an error code.
    pub errors: u64,
    /// Exchanges abandoned at the deadline.
    pub timeouts: u64,
    /// Partial frames discarded because they stalled past the deadline.
    pub stalled_frames: u64,
    pub frames_dropped: u64,
    pub crc_errors: u64,
    pub discarded_bytes: u64,
}

impl SessionStats {
    fn absorb(&mut self, decoder: DecoderStats) {
        self.frames_dropped = decoder.dropped();
        self.crc_errors = decoder.crc_errors;
        self.discarded_bytes = decoder.discarded_bytes;
    }
}

/// Device-side protocol session.
///
/// Owns the frame decoder and the dispatcher; all protocol state lives here
/// and only the worker thread touches it.
pub struct Session {
    decoder: FrameDecoder,
    dispatcher: Dispatcher,
    state: SessionState,
    frame_started: Option<Instant>,
    timeout: Duration,
    scratch: BytesMut,
    stats: SessionStats,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, config: &EngineConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.max_payload),
            dispatcher,
            state: SessionState::Idle,
            frame_started: None,
            timeout: config.exchange_timeout(),
            scratch: BytesMut::with_capacity(config.max_payload),
            stats: SessionStats::default(),
        }
    }

    /// Current state as seen from outside an exchange.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Idle && self.decoder.in_frame() {
            SessionState::Receiving
        } else {
            self.state
        }
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats;
        stats.absorb(self.decoder.stats());
        stats
    }

    /// Feed bytes received at `now`; answers every request they complete.
    ///
    /// Only write failures are returned; bad input is dropped or answered.
    pub fn on_bytes<W: Write>(
        &mut self,
        bytes: &[u8],
        now: Instant,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), FrameError> {
        for &byte in bytes {
            if byte == START_MARKER {
                self.frame_started = Some(now);
            }
            if let Some(frame) = self.decoder.push(byte) {
                let started = self.frame_started.take().unwrap_or(now);
                self.exchange(frame, started + self.timeout, writer)?;
            }
        }
        if !self.decoder.in_frame() {
            self.frame_started = None;
        }
        Ok(())
    }

    /// Periodic check without input: discard a partial frame past its deadline.
    pub fn on_tick(&mut self, now: Instant) {
        self.dispatcher.reap();
        if let Some(started) = self.frame_started {
            if !self.decoder.in_frame() {
                self.frame_started = None;
            } else if now >= started + self.timeout {
                warn!(
                    waited_ms = now.duration_since(started).as_millis() as u64,
                    "partial frame stalled past deadline; discarding"
                );
                self.decoder.reset();
                self.frame_started = None;
                self.stats.stalled_frames += 1;
            }
        }
    }

    /// Transport reset: drop any partial frame and release every handle.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.frame_started = None;
        self.state = SessionState::Idle;
        self.dispatcher.close_all();
    }

    fn exchange<W: Write>(
        &mut self,
        frame: Frame,
        deadline: Instant,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), FrameError> {
        self.state = SessionState::Decoded;
        self.stats.requests += 1;

        let response = match Message::decode(&frame) {
            Err(err) => {
                debug!(opcode = frame.opcode, %err, "undecodable request");
                Response::Err(err.error_code())
            }
            Ok(Message::Response(_)) => {
                debug!(opcode = frame.opcode, "host sent a response opcode");
                Response::Err(ErrorCode::Unsupported)
            }
            Ok(Message::Request(request)) => {
                let name = opcode::opcode_name(frame.opcode);
                if Instant::now() >= deadline {
                    // Never start work the host has already given up on.
                    warn!(op = name, "request completed after its deadline");
                    self.stats.timeouts += 1;
                    Response::Err(ErrorCode::Timeout)
                } else {
                    debug!(op = name, handle = ?request.handle(), path = ?request.path(), "dispatching");
                    self.state = SessionState::Dispatched;
                    match self.dispatcher.dispatch(request, deadline) {
                        Dispatch::Completed(response) => response,
                        Dispatch::TimedOut => {
                            warn!(op = name, "filesystem call timed out; exchange abandoned");
                            self.stats.timeouts += 1;
                            Response::Err(ErrorCode::Timeout)
                        }
                    }
                }
            }
        };

        self.state = SessionState::Responding;
        let result = self.respond(&response, writer);
        self.state = SessionState::Idle;
        result
    }

    fn respond<W: Write>(
        &mut self,
        response: &Response,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), FrameError> {
        if let Response::Err(code) = response {
            debug!(code = %code, "responding with error");
            self.stats.errors += 1;
        }

        self.scratch.clear();
        let opcode = Message::Response(response.clone()).encode(&mut self.scratch);
        match writer.send(opcode, &self.scratch) {
            Err(FrameError::PayloadTooLarge { size, max }) => {
                // Responses are sized to fit; an oversize one is an adapter contract breach.
                warn!(size, max, "response does not fit one frame");
                self.scratch.clear();
                let opcode =
                    Message::Response(Response::Err(ErrorCode::IoError)).encode(&mut self.scratch);
                writer.send(opcode, &self.scratch)?;
                self.stats.errors += 1;
            }
            other => other?,
        }
        self.stats.responses += 1;
        Ok(())
    }
}
