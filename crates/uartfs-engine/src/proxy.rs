//! Startup: bring up the UART, the executor and the worker as one unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};
use uartfs_frame::{FrameConfig, FrameWriter};
use uartfs_transport::{open_port, UartStream};

use crate::adapter::FileSystem;
use crate::config::{EngineConfig, ProxyConfig};
use crate::dispatch::{Dispatcher, ResponseLimits};
use crate::error::{EngineError, Result};
use crate::local::LocalFileSystem;
use crate::session::{Session, SessionStats};
use crate::worker;

/// Called once, on the worker thread, when the proxy dies of a fatal link error.
pub type FatalCallback = Box<dyn Fn(&EngineError) + Send + 'static>;

/// How a proxy ended.
#[derive(Debug)]
pub struct ProxyExit {
    pub stats: SessionStats,
    /// `None` after a requested stop.
    pub error: Option<EngineError>,
}

/// Builds a proxy over an already-open link.
///
/// ```no_run
/// use uartfs_engine::{EngineConfig, LocalFileSystem, ProxyBuilder};
/// use uartfs_transport::UartStream;
///
/// let (device, _host) = UartStream::pair().unwrap();
/// let fs = LocalFileSystem::new("/srv/data", 16).unwrap();
/// let proxy = ProxyBuilder::new(EngineConfig::default())
///     .with_fatal_callback(|err| eprintln!("proxy died: {err}"))
///     .spawn(device, fs)
///     .unwrap();
/// proxy.stop();
/// let exit = proxy.join();
/// assert!(exit.error.is_none());
/// ```
pub struct ProxyBuilder {
    config: EngineConfig,
    on_fatal: Option<FatalCallback>,
}

impl ProxyBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            on_fatal: None,
        }
    }

    /// Report fatal errors as they happen, in addition to [`ProxyHandle::join`].
    pub fn with_fatal_callback(mut self, callback: impl Fn(&EngineError) + Send + 'static) -> Self {
        self.on_fatal = Some(Box::new(callback));
        self
    }

    /// Start serving `fs` over `stream`.
    ///
    /// Either every thread is running when this returns `Ok`, or none is left
    /// behind.
    pub fn spawn<F: FileSystem>(self, mut stream: UartStream, fs: F) -> Result<ProxyHandle> {
        let config = self.config;
        config.validate()?;

        let poll_interval = config.poll_interval();
        let mut link_reader = stream.try_clone().map_err(EngineError::UartInit)?;
        link_reader
            .set_read_timeout(Some(poll_interval))
            .map_err(EngineError::UartInit)?;
        stream
            .set_write_timeout(Some(config.exchange_timeout()))
            .map_err(EngineError::UartInit)?;
        let link_kind = stream.kind();

        let dispatcher = Dispatcher::spawn(
            fs,
            ResponseLimits {
                max_payload: config.max_payload,
                max_read: config.max_read(),
            },
        )
        .map_err(|source| EngineError::WorkerSpawn {
            thread: "uartfs-exec",
            source,
        })?;
        let session = Session::new(dispatcher, &config);
        let writer = FrameWriter::with_config(
            stream,
            FrameConfig {
                max_payload_size: config.max_payload,
                ..FrameConfig::default()
            },
        );

        let (inbox_tx, inbox_rx) = mpsc::sync_channel(config.inbox_capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = thread::Builder::new()
            .name("uartfs-reader".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || worker::pump(link_reader, inbox_tx, stop)
            })
            .map_err(|source| EngineError::WorkerSpawn {
                thread: "uartfs-reader",
                source,
            })?;

        let on_fatal = self.on_fatal;
        let spawned = thread::Builder::new()
            .name("uartfs-worker".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    let (stats, error) = worker::run(session, writer, inbox_rx, poll_interval, stop);
                    if let (Some(err), Some(callback)) = (&error, &on_fatal) {
                        callback(err);
                    }
                    ProxyExit { stats, error }
                }
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(source) => {
                stop.store(true, Ordering::SeqCst);
                let _ = reader.join();
                return Err(EngineError::WorkerSpawn {
                    thread: "uartfs-worker",
                    source,
                });
            }
        };

        info!(
            link = link_kind,
            max_payload = config.max_payload,
            timeout_ms = config.exchange_timeout_ms,
            "uartfs proxy started"
        );
        Ok(ProxyHandle {
            stop,
            worker: Some(worker),
            reader: Some(reader),
        })
    }
}

/// Owner's side of a running proxy.
///
/// Dropping the handle asks the proxy to stop without waiting for it.
#[derive(Debug)]
pub struct ProxyHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<ProxyExit>>,
    reader: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    /// Ask the proxy to stop. Takes effect within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once the worker has exited, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the proxy to end and report why.
    pub fn join(mut self) -> ProxyExit {
        let exit = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => {
                error!("uartfs worker thread panicked");
                self.stop();
                ProxyExit {
                    stats: SessionStats::default(),
                    error: Some(EngineError::Panicked("worker")),
                }
            }
            None => ProxyExit {
                stats: SessionStats::default(),
                error: None,
            },
        };
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        exit
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the configured UART and serve `fs` over it.
///
/// The engine config is checked before the port is touched, so a bad config
/// never leaves a port open.
pub fn spawn_proxy<F: FileSystem>(config: &ProxyConfig, fs: F) -> Result<ProxyHandle> {
    config.engine.validate()?;
    let stream = open_port(&config.uart).map_err(EngineError::UartInit)?;
    ProxyBuilder::new(config.engine.clone()).spawn(stream, fs)
}

/// [`spawn_proxy`] over the [`LocalFileSystem`] described by `config.fs`.
pub fn spawn_local_proxy(config: &ProxyConfig) -> Result<ProxyHandle> {
    let fs = LocalFileSystem::from_config(&config.fs).map_err(|err| {
        EngineError::InvalidConfig(format!("filesystem root {}: {err}", config.fs.root.display()))
    })?;
    spawn_proxy(config, fs)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapter::{FsError, FsResult};
    use uartfs_message::{DirEntry, FileStat, Handle, OpenMode, Whence};

    struct NoFs;

    impl FileSystem for NoFs {
        fn open(&mut self, _path: &str, _mode: OpenMode) -> FsResult<Handle> {
            Err(FsError::Unsupported)
        }
        fn read(&mut self, handle: Handle, _offset: u32, _len: u32) -> FsResult<Vec<u8>> {
            Err(FsError::InvalidHandle(handle))
        }
        fn write(&mut self, handle: Handle, _offset: u32, _data: &[u8]) -> FsResult<u32> {
            Err(FsError::InvalidHandle(handle))
        }
        fn seek(&mut self, handle: Handle, _offset: i32, _whence: Whence) -> FsResult<u32> {
            Err(FsError::InvalidHandle(handle))
        }
        fn close(&mut self, handle: Handle) -> FsResult<()> {
            Err(FsError::InvalidHandle(handle))
        }
        fn stat(&mut self, _path: &str) -> FsResult<FileStat> {
            Err(FsError::NotFound)
        }
        fn list(&mut self, _path: &str) -> FsResult<Vec<DirEntry>> {
            Err(FsError::NotFound)
        }
        fn delete(&mut self, _path: &str) -> FsResult<()> {
            Err(FsError::NotFound)
        }
        fn close_all(&mut self) -> usize {
            0
        }
    }

    #[test]
    fn invalid_config_spawns_nothing() {
        let (device, _host) = UartStream::pair().unwrap();
        let config = EngineConfig {
            inbox_capacity: 0,
            ..EngineConfig::default()
        };
        let err = ProxyBuilder::new(config).spawn(device, NoFs).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn missing_port_is_uart_init_error() {
        let err = spawn_proxy(&ProxyConfig::default(), NoFs).unwrap_err();
        assert!(matches!(err, EngineError::UartInit(_)));
    }

    #[test]
    fn missing_root_is_config_error() {
        let mut config = ProxyConfig::default();
        config.fs.root = "/nonexistent/uartfs-root".into();
        let err = spawn_local_proxy(&config).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn stop_then_join_is_clean() {
        let (device, _host) = UartStream::pair().unwrap();
        let proxy = ProxyBuilder::new(EngineConfig::default())
            .spawn(device, NoFs)
            .unwrap();
        assert!(!proxy.is_finished());

        proxy.stop();
        let exit = proxy.join();
        assert!(exit.error.is_none());
        assert_eq!(exit.stats.requests, 0);
    }
}
