//! Device side of the uartfs protocol.
//!
//! A host drives file operations on this device over a UART. The engine
//! turns validated frames into filesystem calls on a [`FileSystem`] and
//! answers each request with exactly one response, keeping one exchange in
//! flight at a time.
//!
//! Most users only need [`spawn_proxy`] (or [`spawn_local_proxy`]) and the
//! [`ProxyHandle`] it returns. [`Session`] and [`Dispatcher`] are public for
//! embedding the state machine in another event loop.

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod local;
pub mod proxy;
pub mod session;
mod worker;

pub use adapter::{FileSystem, FsError, FsResult};
pub use config::{EngineConfig, LocalFsConfig, ProxyConfig, MIN_PAYLOAD};
pub use dispatch::{execute, Dispatch, Dispatcher, ResponseLimits};
pub use error::{EngineError, Result};
pub use handle::HandleTable;
pub use local::LocalFileSystem;
pub use proxy::{
    spawn_local_proxy, spawn_proxy, FatalCallback, ProxyBuilder, ProxyExit, ProxyHandle,
};
pub use session::{Session, SessionState, SessionStats};
