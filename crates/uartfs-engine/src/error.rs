/// Errors that stop or prevent the proxy.
///
/// Per-request failures never show up here; they become `Err` responses on
/// the wire.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The UART could not be opened or configured.
    #[error("UART initialization failed: {0}")]
    UartInit(#[source] uartfs_transport::TransportError),

    /// A proxy thread could not be started.
    #[error("failed to spawn {thread} thread: {source}")]
    WorkerSpawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level error after startup.
    #[error("transport error: {0}")]
    Transport(#[from] uartfs_transport::TransportError),

    /// Frame-level error while writing a response.
    #[error("frame error: {0}")]
    Frame(#[from] uartfs_frame::FrameError),

    /// The host end of the link went away.
    #[error("UART link closed")]
    Disconnected,

    /// A proxy thread panicked.
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;
