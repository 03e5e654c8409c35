use crate::cmd::PortsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat, PortRow};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = available()?;
    print_ports(&ports, format);
    Ok(SUCCESS)
}

#[cfg(feature = "serial")]
fn available() -> CliResult<Vec<PortRow>> {
    let ports = uartfs_transport::list_ports()
        .map_err(|err| crate::exit::transport_error("port enumeration failed", err))?;
    Ok(ports
        .into_iter()
        .map(|port| PortRow {
            name: port.name,
            kind: port.kind,
        })
        .collect())
}

#[cfg(not(feature = "serial"))]
fn available() -> CliResult<Vec<PortRow>> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "built without the `serial` feature; rebuild with --features serial",
    ))
}
