use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::stream::UartStream;

/// Port names with this prefix open an emulated UART socket instead of a serial device.
pub const UNIX_PORT_PREFIX: &str = "unix:";

/// UART link settings. Fixed at initialization; never renegotiated over the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    /// Serial device (`/dev/ttyUSB0`, `COM3`) or `unix:<socket path>`.
    pub port: String,
    /// Baud rate. Ignored for emulated links.
    pub baud_rate: u32,
    /// How long a single read may block before the caller gets control back.
    pub read_timeout_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
        }
    }
}

impl UartConfig {
    /// Config for `port` with default baud rate and timeout.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Socket path when this config names an emulated link.
    pub fn emulated_path(&self) -> Option<&str> {
        self.port.strip_prefix(UNIX_PORT_PREFIX)
    }
}

/// Open the link described by `config`.
///
/// For `unix:` ports this binds the socket and blocks until the host attaches.
pub fn open_port(config: &UartConfig) -> Result<UartStream> {
    if config.port.is_empty() {
        return Err(TransportError::Unsupported {
            port: String::new(),
            reason: "no port configured",
        });
    }

    if let Some(path) = config.emulated_path() {
        return open_emulated(path, config);
    }

    open_device(config)
}

#[cfg(unix)]
fn open_emulated(path: &str, config: &UartConfig) -> Result<UartStream> {
    let listener = crate::uds::EmulatedUart::bind(path)?;
    let mut stream = listener.accept()?;
    stream.set_read_timeout(Some(config.read_timeout()))?;
    Ok(stream)
}

#[cfg(not(unix))]
fn open_emulated(path: &str, _config: &UartConfig) -> Result<UartStream> {
    Err(TransportError::Unsupported {
        port: format!("{UNIX_PORT_PREFIX}{path}"),
        reason: "emulated links require unix domain sockets",
    })
}

#[cfg(feature = "serial")]
fn open_device(config: &UartConfig) -> Result<UartStream> {
    crate::serial::open_serial(&config.port, config.baud_rate, config.read_timeout())
}

#[cfg(not(feature = "serial"))]
fn open_device(config: &UartConfig) -> Result<UartStream> {
    Err(TransportError::Unsupported {
        port: config.port.clone(),
        reason: "built without the `serial` feature",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conventional() {
        let config = UartConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let config = UartConfig {
            read_timeout_ms: 0,
            ..UartConfig::new("/dev/ttyS0")
        };
        assert_eq!(config.read_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn emulated_path_is_detected() {
        assert_eq!(
            UartConfig::new("unix:/tmp/dev.sock").emulated_path(),
            Some("/tmp/dev.sock")
        );
        assert_eq!(UartConfig::new("/dev/ttyUSB0").emulated_path(), None);
    }

    #[test]
    fn empty_port_is_rejected() {
        let result = open_port(&UartConfig::default());
        assert!(matches!(result, Err(TransportError::Unsupported { .. })));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: UartConfig = serde_json::from_str(r#"{"port":"/dev/ttyACM0"}"#).unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115_200);
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn device_ports_need_serial_feature() {
        let result = open_port(&UartConfig::new("/dev/ttyUSB0"));
        assert!(matches!(result, Err(TransportError::Unsupported { .. })));
    }
}
