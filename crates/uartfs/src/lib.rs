//! Remote filesystem access over a UART link.
//!
//! A host performs file operations against the filesystem of a device that
//! it reaches only through a serial line. Every request and response travels
//! in a byte-stuffed, CRC-checked frame, and the device keeps exactly one
//! exchange in flight.
//!
//! # Crate Structure
//!
//! - [`transport`]: the UART link (serial ports, emulated links)
//! - [`frame`]: framing, resynchronization and checksums
//! - [`message`]: typed requests and responses and their encodings
//! - [`engine`]: the device-side proxy (behind the `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use uartfs_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use uartfs_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use uartfs_message::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use uartfs_engine::*;
}
