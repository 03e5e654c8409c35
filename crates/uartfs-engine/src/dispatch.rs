//! Runs adapter calls on an executor thread so the worker can time them out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, warn};
use uartfs_message::{
    DirListing, ErrorCode, Handle, OkPayload, Request, Response, SessionInfo, PROTOCOL_VERSION,
};

use crate::adapter::FileSystem;

/// Result of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Completed(Response),
    /// The deadline passed before the adapter returned.
    TimedOut,
}

enum Job {
    Call { seq: u64, request: Request },
    /// Close a handle whose `Open` result nobody is waiting for anymore.
    Release(Handle),
    CloseAll,
}

struct Outcome {
    seq: u64,
    /// Handle produced by a successful `Open`.
    opened: Option<Handle>,
    response: Response,
}

/// Limits applied to responses so they fit one frame.
#[derive(Debug, Clone, Copy)]
pub struct ResponseLimits {
    pub max_payload: usize,
    pub max_read: u32,
}

/// Sends requests to the executor thread and waits for their responses.
pub struct Dispatcher {
    jobs: Sender<Job>,
    outcomes: Receiver<Outcome>,
    next_seq: u64,
    /// Highest sequence number the worker stopped waiting for.
    abandoned: Arc<AtomicU64>,
    executor: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Move `fs` onto a new executor thread.
    pub fn spawn<F: FileSystem>(fs: F, limits: ResponseLimits) -> std::io::Result<Self> {
        let (jobs, job_rx) = mpsc::channel();
        let (outcome_tx, outcomes) = mpsc::channel();
        let abandoned = Arc::new(AtomicU64::new(0));

        let executor = thread::Builder::new().name("uartfs-exec".to_string()).spawn({
            let abandoned = Arc::clone(&abandoned);
            move || run_executor(fs, limits, job_rx, outcome_tx, abandoned)
        })?;

        Ok(Self {
            jobs,
            outcomes,
            next_seq: 1,
            abandoned,
            executor: Some(executor),
        })
    }

    /// Run `request` and wait for its response until `deadline`.
    pub fn dispatch(&mut self, request: Request, deadline: Instant) -> Dispatch {
        self.reap();

        let seq = self.next_seq;
        self.next_seq += 1;
        if self.jobs.send(Job::Call { seq, request }).is_err() {
            error!("executor thread is gone");
            return Dispatch::Completed(Response::Err(ErrorCode::IoError));
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.outcomes.recv_timeout(remaining) {
                Ok(outcome) if outcome.seq == seq => return Dispatch::Completed(outcome.response),
                Ok(stale) => self.release_stale(stale),
                Err(RecvTimeoutError::Timeout) => {
                    self.abandoned.fetch_max(seq, Ordering::SeqCst);
                    return Dispatch::TimedOut;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!("executor thread is gone");
                    return Dispatch::Completed(Response::Err(ErrorCode::IoError));
                }
            }
        }
    }

    /// Release every handle (transport reset). Queued behind any running call.
    pub fn close_all(&mut self) {
        self.reap();
        let _ = self.jobs.send(Job::CloseAll);
    }

    /// Collect late results of abandoned exchanges.
    pub fn reap(&mut self) {
        while let Ok(stale) = self.outcomes.try_recv() {
            self.release_stale(stale);
        }
    }

    fn release_stale(&mut self, stale: Outcome) {
        debug!(seq = stale.seq, "discarding late result of abandoned exchange");
        if let Some(handle) = stale.opened {
            warn!(%handle, "closing handle opened by abandoned exchange");
            let _ = self.jobs.send(Job::Release(handle));
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the job channel stops the executor once its current call returns.
        let (closed, _) = mpsc::channel();
        self.jobs = closed;
        if let Some(executor) = self.executor.take() {
            if executor.is_finished() {
                let _ = executor.join();
            }
        }
    }
}

fn run_executor<F: FileSystem>(
    mut fs: F,
    limits: ResponseLimits,
    jobs: Receiver<Job>,
    outcomes: Sender<Outcome>,
    abandoned: Arc<AtomicU64>,
) {
    for job in jobs {
        match job {
            Job::Call { seq, request } => {
                let is_open = matches!(request, Request::Open { .. });
                let response = match catch_unwind(AssertUnwindSafe(|| {
                    execute(&mut fs, request, limits)
                })) {
                    Ok(response) => response,
                    Err(_) => {
                        error!(seq, "filesystem adapter panicked");
                        Response::Err(ErrorCode::IoError)
                    }
                };
                let opened = match (&response, is_open) {
                    (Response::Ok(OkPayload::Handle(handle)), true) => Some(*handle),
                    _ => None,
                };

                if seq <= abandoned.load(Ordering::SeqCst) {
                    if let Some(handle) = opened {
                        warn!(%handle, seq, "closing handle opened by abandoned exchange");
                        let _ = fs.close(handle);
                    }
                    continue;
                }
                if outcomes
                    .send(Outcome {
                        seq,
                        opened,
                        response,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Job::Release(handle) => {
                let _ = fs.close(handle);
            }
            Job::CloseAll => {
                let closed = fs.close_all();
                debug!(closed, "closed all handles");
            }
        }
    }
    fs.close_all();
}

/// Map one request onto the adapter and its result onto a response.
pub fn execute<F: FileSystem + ?Sized>(
    fs: &mut F,
    request: Request,
    limits: ResponseLimits,
) -> Response {
    let result = match request {
        Request::Open { path, mode } => fs.open(&path, mode).map(OkPayload::Handle),
        Request::Read {
            handle,
            offset,
            len,
        } => {
            let len = len.min(limits.max_read);
            fs.read(handle, offset, len).map(|mut data| {
                data.truncate(len as usize);
                OkPayload::Data(Bytes::from(data))
            })
        }
        Request::Write {
            handle,
            offset,
            data,
        } => fs.write(handle, offset, &data).map(OkPayload::Written),
        Request::Seek {
            handle,
            offset,
            whence,
        } => fs.seek(handle, offset, whence).map(OkPayload::Offset),
        Request::Close { handle } => fs.close(handle).map(|()| OkPayload::Empty),
        Request::Stat { path } => fs.stat(&path).map(OkPayload::Stat),
        Request::List { path } => fs.list(&path).map(|entries| {
            OkPayload::Entries(DirListing::fitting(entries, limits.max_payload))
        }),
        Request::Delete { path } => fs.delete(&path).map(|()| OkPayload::Empty),
        Request::Hello => {
            let closed = fs.close_all();
            debug!(closed, "session reset by host");
            Ok(OkPayload::Session(SessionInfo {
                protocol_version: PROTOCOL_VERSION,
                max_payload: limits.max_payload.min(u16::MAX as usize) as u16,
            }))
        }
    };

    match result {
        Ok(payload) => Response::Ok(payload),
        Err(err) => {
            debug!(%err, code = %err.code(), "filesystem call failed");
            Response::Err(err.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use uartfs_message::{DirEntry, FileKind, FileStat, OpenMode, Whence};

    use super::*;
    use crate::adapter::{FsError, FsResult};

    const LIMITS: ResponseLimits = ResponseLimits {
        max_payload: 64,
        max_read: 59,
    };

    #[derive(Default)]
    struct Probe {
        closed: Vec<Handle>,
        close_all_calls: usize,
        last_read_len: Option<u32>,
    }

    /// Scripted adapter: `/slow` stalls, `/panic` panics, every open yields handle 7.
    struct ScriptedFs {
        probe: Arc<Mutex<Probe>>,
        stall: Duration,
    }

    impl ScriptedFs {
        fn new(stall: Duration) -> (Self, Arc<Mutex<Probe>>) {
            let probe = Arc::new(Mutex::new(Probe::default()));
            (
                Self {
                    probe: Arc::clone(&probe),
                    stall,
                },
                probe,
            )
        }

        fn check(&self, path: &str) {
            match path {
                "/slow" => thread::sleep(self.stall),
                "/panic" => panic!("adapter bug"),
                _ => {}
            }
        }
    }

    impl FileSystem for ScriptedFs {
        fn open(&mut self, path: &str, _mode: OpenMode) -> FsResult<Handle> {
            self.check(path);
            Ok(Handle(7))
        }

        fn read(&mut self, _handle: Handle, _offset: u32, len: u32) -> FsResult<Vec<u8>> {
            self.probe.lock().unwrap().last_read_len = Some(len);
            Ok(vec![0xAB; len as usize + 10])
        }

        fn write(&mut self, _handle: Handle, _offset: u32, data: &[u8]) -> FsResult<u32> {
            Ok(data.len() as u32)
        }

        fn seek(&mut self, _handle: Handle, _offset: i32, _whence: Whence) -> FsResult<u32> {
            Err(FsError::InvalidHandle(Handle(9)))
        }

        fn close(&mut self, handle: Handle) -> FsResult<()> {
            self.probe.lock().unwrap().closed.push(handle);
            Ok(())
        }

        fn stat(&mut self, path: &str) -> FsResult<FileStat> {
            self.check(path);
            Ok(FileStat {
                size: 1,
                kind: FileKind::File,
                mtime: 0,
            })
        }

        fn list(&mut self, _path: &str) -> FsResult<Vec<DirEntry>> {
            Ok((0..20)
                .map(|i| DirEntry {
                    name: format!("entry-{i:02}"),
                    kind: FileKind::File,
                    size: i,
                })
                .collect())
        }

        fn delete(&mut self, _path: &str) -> FsResult<()> {
            Err(FsError::NotFound)
        }

        fn close_all(&mut self) -> usize {
            self.probe.lock().unwrap().close_all_calls += 1;
            0
        }
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[test]
    fn read_is_clamped_to_one_frame() {
        let (fs, probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        let outcome = dispatcher.dispatch(
            Request::Read {
                handle: Handle(1),
                offset: 0,
                len: 10_000,
            },
            soon(),
        );

        let Dispatch::Completed(Response::Ok(OkPayload::Data(data))) = outcome else {
            panic!("expected data, got {outcome:?}");
        };
        assert_eq!(data.len(), 59);
        assert_eq!(probe.lock().unwrap().last_read_len, Some(59));
    }

    #[test]
    fn listing_is_truncated_to_fit() {
        let (fs, _probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        let outcome = dispatcher.dispatch(Request::List { path: "/".into() }, soon());
        let Dispatch::Completed(Response::Ok(OkPayload::Entries(listing))) = outcome else {
            panic!("expected entries, got {outcome:?}");
        };
        assert!(listing.truncated);
        // 4 bytes of header, 15 bytes per entry.
        assert_eq!(listing.entries.len(), 4);
    }

    #[test]
    fn adapter_errors_map_to_codes() {
        let (fs, _probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        assert_eq!(
            dispatcher.dispatch(Request::Delete { path: "/x".into() }, soon()),
            Dispatch::Completed(Response::Err(ErrorCode::NotFound))
        );
        assert_eq!(
            dispatcher.dispatch(
                Request::Seek {
                    handle: Handle(1),
                    offset: 0,
                    whence: Whence::Start
                },
                soon()
            ),
            Dispatch::Completed(Response::Err(ErrorCode::InvalidHandle))
        );
    }

    #[test]
    fn panic_becomes_io_error_and_executor_survives() {
        let (fs, _probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        assert_eq!(
            dispatcher.dispatch(Request::Stat { path: "/panic".into() }, soon()),
            Dispatch::Completed(Response::Err(ErrorCode::IoError))
        );
        assert!(matches!(
            dispatcher.dispatch(Request::Stat { path: "/ok".into() }, soon()),
            Dispatch::Completed(Response::Ok(OkPayload::Stat(_)))
        ));
    }

    #[test]
    fn stalled_call_times_out_and_late_open_is_released() {
        let (fs, probe) = ScriptedFs::new(Duration::from_millis(150));
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        let outcome = dispatcher.dispatch(
            Request::Open {
                path: "/slow".into(),
                mode: OpenMode::Read,
            },
            Instant::now() + Duration::from_millis(30),
        );
        assert_eq!(outcome, Dispatch::TimedOut);

        // The next request queues behind the stalled one and still gets its own answer.
        let outcome = dispatcher.dispatch(Request::Stat { path: "/ok".into() }, soon());
        assert!(matches!(outcome, Dispatch::Completed(Response::Ok(OkPayload::Stat(_)))));
        assert_eq!(probe.lock().unwrap().closed, vec![Handle(7)]);
    }

    #[test]
    fn hello_resets_and_reports_capabilities() {
        let (fs, probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        assert_eq!(
            dispatcher.dispatch(Request::Hello, soon()),
            Dispatch::Completed(Response::Ok(OkPayload::Session(SessionInfo {
                protocol_version: PROTOCOL_VERSION,
                max_payload: 64,
            })))
        );
        assert_eq!(probe.lock().unwrap().close_all_calls, 1);
    }

    #[test]
    fn close_all_runs_on_executor() {
        let (fs, probe) = ScriptedFs::new(Duration::ZERO);
        let mut dispatcher = Dispatcher::spawn(fs, LIMITS).unwrap();

        dispatcher.close_all();
        // A round trip guarantees the queued reset ran first.
        dispatcher.dispatch(Request::Stat { path: "/ok".into() }, soon());
        assert_eq!(probe.lock().unwrap().close_all_calls, 1);
    }
}
