use std::time::Duration;

use serialport::SerialPortType;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::UartStream;

/// A serial port visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS name of the port (e.g. `/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// Short description of the port type.
    pub kind: String,
}

/// Open a serial port at `baud_rate`, 8N1, no flow control.
pub fn open_serial(port: &str, baud_rate: u32, read_timeout: Duration) -> Result<UartStream> {
    let handle = serialport::new(port, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|err| TransportError::Open {
            port: port.to_string(),
            source: std::io::Error::from(err),
        })?;

    info!(port, baud_rate, "serial port opened");
    Ok(UartStream::from_serial(handle))
}

/// Enumerate serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    debug!(count = ports.len(), "enumerated serial ports");

    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            kind: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => match &usb.product {
            Some(product) => format!("usb {:04x}:{:04x} {product}", usb.vid, usb.pid),
            None => format!("usb {:04x}:{:04x}", usb.vid, usb.pid),
        },
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_port_reports_open_error() {
        let result = open_serial(
            "/dev/uartfs-does-not-exist",
            115_200,
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }

    #[test]
    fn describes_non_usb_ports() {
        assert_eq!(describe_port_type(&SerialPortType::PciPort), "pci");
        assert_eq!(describe_port_type(&SerialPortType::Unknown), "unknown");
    }
}
