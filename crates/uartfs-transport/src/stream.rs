use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial drivers have no notion of "block forever"; use a long poll instead.
#[cfg(feature = "serial")]
const SERIAL_BLOCKING_TIMEOUT: Duration = Duration::from_secs(3600);

/// A connected UART link, readable and writable.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a serial port handle or one end of an emulated link.
pub struct UartStream {
    inner: UartStreamInner,
}

enum UartStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(feature = "serial")]
    Serial(Box<dyn serialport::SerialPort>),
}

impl Read for UartStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for UartStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => stream.flush(),
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => port.flush(),
        }
    }
}

impl UartStream {
    /// Create a UartStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: UartStreamInner::Unix(stream),
        }
    }

    /// Create a UartStream from an opened serial port.
    #[cfg(feature = "serial")]
    pub(crate) fn from_serial(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: UartStreamInner::Serial(port),
        }
    }

    /// Create a connected pair of emulated UART endpoints.
    ///
    /// Bytes written to one end are read from the other, like two devices
    /// wired TX-to-RX.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying link. `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => port
                .set_timeout(timeout.unwrap_or(SERIAL_BLOCKING_TIMEOUT))
                .map_err(|err| std::io::Error::from(err).into()),
        }
    }

    /// Set write timeout on the underlying link.
    ///
    /// Serial ports share a single timeout for both directions, so this is a
    /// no-op for them.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(_) => {
                let _ = timeout;
                Ok(())
            }
        }
    }

    /// Try to clone this link so reading and writing can live on different threads.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => {
                let cloned = port.try_clone().map_err(std::io::Error::from)?;
                Ok(Self::from_serial(cloned))
            }
        }
    }

    /// Shut down an emulated link in both directions, waking any blocked reader.
    ///
    /// Serial ports have no equivalent; readers there wake on their timeout.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(_) => Ok(()),
        }
    }

    /// Backend name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(_) => "emulated",
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(_) => "serial",
        }
    }
}

impl std::fmt::Debug for UartStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            UartStreamInner::Unix(_) => f.debug_struct("UartStream").field("type", &"emulated").finish(),
            #[cfg(feature = "serial")]
            UartStreamInner::Serial(port) => f
                .debug_struct("UartStream")
                .field("type", &"serial")
                .field("name", &port.name())
                .finish(),
        }
    }
}
