//! UART link abstraction.
//!
//! Provides a unified byte-stream interface over the ways a uartfs device can
//! be wired to its host:
//! - A real serial port (behind the `serial` feature)
//! - An emulated UART over a Unix domain socket, for host-side emulation
//!   and tests
//!
//! This is the lowest layer of uartfs. Everything else builds on top of
//! the [`UartStream`] type provided here.

pub mod config;
pub mod error;
pub mod stream;

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use config::{open_port, UartConfig, UNIX_PORT_PREFIX};
pub use error::{Result, TransportError};
pub use stream::UartStream;

#[cfg(feature = "serial")]
pub use serial::{list_ports, PortInfo};
#[cfg(unix)]
pub use uds::EmulatedUart;
