//! The UART worker: owns the link and drives the session.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use uartfs_frame::FrameWriter;

use crate::error::{EngineError, Result};
use crate::session::{Session, SessionStats};

const READ_CHUNK_SIZE: usize = 256;

/// What the reader thread hands the worker.
#[derive(Debug)]
pub(crate) enum Input {
    Bytes(Vec<u8>),
    /// The link reached EOF.
    Closed,
    Failed(std::io::Error),
}

/// Pull bytes off the link into the bounded inbox until stopped.
///
/// A full inbox blocks the reader, which pushes back on the link instead of
/// growing memory. The worker drops the inbox when it exits, which wakes a
/// blocked reader.
pub(crate) fn pump<R: Read>(mut link: R, inbox: SyncSender<Input>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    while !stop.load(Ordering::SeqCst) {
        let input = match link.read(&mut buf) {
            Ok(0) => Input::Closed,
            Ok(n) => Input::Bytes(buf[..n].to_vec()),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => Input::Failed(err),
        };
        let last = !matches!(input, Input::Bytes(_));
        if inbox.send(input).is_err() || last {
            break;
        }
    }
    debug!("reader thread exiting");
}

/// Worker main loop. Returns the final counters and, on a fatal link error,
/// the error that ended it.
pub(crate) fn run<W: Write>(
    mut session: Session,
    mut writer: FrameWriter<W>,
    inbox: Receiver<Input>,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
) -> (SessionStats, Option<EngineError>) {
    info!("uartfs worker started");
    let outcome = serve(&mut session, &mut writer, &inbox, poll_interval, &stop);
    stop.store(true, Ordering::SeqCst);
    session.reset();

    let stats = session.stats();
    match outcome {
        Ok(()) => {
            info!(
                requests = stats.requests,
                errors = stats.errors,
                timeouts = stats.timeouts,
                "uartfs worker stopped"
            );
            (stats, None)
        }
        Err(err) => {
            error!(error = %err, requests = stats.requests, "uartfs worker failed");
            (stats, Some(err))
        }
    }
}

fn serve<W: Write>(
    session: &mut Session,
    writer: &mut FrameWriter<W>,
    inbox: &Receiver<Input>,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> Result<()> {
    while !stop.load(Ordering::SeqCst) {
        match inbox.recv_timeout(poll_interval) {
            Ok(Input::Bytes(bytes)) => {
                session.on_bytes(&bytes, Instant::now(), writer)?;
                session.on_tick(Instant::now());
            }
            // The host hanging up while a stop is pending is not a failure.
            Ok(Input::Closed | Input::Failed(_)) if stop.load(Ordering::SeqCst) => break,
            Ok(Input::Closed) => return Err(EngineError::Disconnected),
            Ok(Input::Failed(err)) => return Err(EngineError::Transport(err.into())),
            Err(RecvTimeoutError::Timeout) => session.on_tick(Instant::now()),
            Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Panicked("reader")),
        }
    }
    Ok(())
}
