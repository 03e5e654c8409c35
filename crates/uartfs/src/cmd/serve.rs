use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;
use uartfs_engine::{spawn_local_proxy, ProxyConfig};

use crate::cmd::ServeArgs;
use crate::exit::{engine_error, io_error, CliError, CliResult, CONFIG_INVALID, SUCCESS, USAGE};
use crate::output::{print_summary, OutputFormat, ServeSummary};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = build_config(&args)?;
    info!(
        port = %config.uart.port,
        root = %config.fs.root.display(),
        read_only = ?config.fs.read_only,
        "starting uartfs proxy"
    );

    let started = Instant::now();
    // For `unix:` ports this blocks until the host attaches.
    let proxy =
        spawn_local_proxy(&config).map_err(|err| engine_error("proxy startup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    while running.load(Ordering::SeqCst) && !proxy.is_finished() {
        thread::sleep(SUPERVISE_INTERVAL);
    }

    proxy.stop();
    let exit = proxy.join();
    let summary = ServeSummary {
        port: config.uart.port.clone(),
        root: config.fs.root.display().to_string(),
        uptime_ms: started.elapsed().as_millis() as u64,
        outcome: if exit.error.is_some() {
            "failed"
        } else {
            "stopped"
        },
        stats: exit.stats,
    };
    print_summary(&summary, format);

    match exit.error {
        Some(err) => Err(engine_error("proxy failed", err)),
        None => Ok(SUCCESS),
    }
}

/// Config file first, then flags on top.
pub(crate) fn build_config(args: &ServeArgs) -> CliResult<ProxyConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(port) = &args.port {
        config.uart.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.uart.baud_rate = baud;
    }
    if let Some(root) = &args.root {
        config.fs.root = root.clone();
    }
    config.fs.read_only.extend(args.read_only.iter().cloned());
    if let Some(max_payload) = args.max_payload {
        config.engine.max_payload = max_payload;
    }
    if let Some(timeout) = &args.timeout {
        config.engine.exchange_timeout_ms = parse_duration(timeout)?.as_millis() as u64;
    }
    if let Some(max_open_files) = args.max_open_files {
        config.fs.max_open_files = max_open_files;
    }

    if config.uart.port.is_empty() {
        return Err(CliError::new(
            USAGE,
            "no port given (pass PORT or set uart.port in --config)",
        ));
    }
    if config.uart.baud_rate == 0 {
        return Err(CliError::new(USAGE, "baud rate must be greater than zero"));
    }
    config
        .engine
        .validate()
        .map_err(|err| engine_error("invalid configuration", err))?;
    Ok(config)
}

fn load_config(path: &Path) -> CliResult<ProxyConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("cannot read config {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            CONFIG_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn temp_file(tag: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "uartfs-cli-{}-{}-{}.json",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::write(&path, contents).expect("temp file should be writable");
        path
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn flags_build_a_config() {
        let args = ServeArgs {
            port: Some("/dev/ttyUSB0".to_string()),
            baud: Some(921_600),
            root: Some(PathBuf::from("/srv/files")),
            read_only: vec!["/etc".to_string(), "/boot".to_string()],
            timeout: Some("500ms".to_string()),
            ..ServeArgs::default()
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.uart.port, "/dev/ttyUSB0");
        assert_eq!(config.uart.baud_rate, 921_600);
        assert_eq!(config.fs.root, PathBuf::from("/srv/files"));
        assert_eq!(config.fs.read_only, vec!["/etc", "/boot"]);
        assert_eq!(config.engine.exchange_timeout_ms, 500);
        assert_eq!(config.engine.max_payload, 4096);
    }

    #[test]
    fn flags_override_config_file() {
        let path = temp_file(
            "override",
            r#"{"uart": {"port": "/dev/ttyS1", "baud_rate": 9600},
                "engine": {"max_payload": 1024},
                "fs": {"read_only": ["/rom"]}}"#,
        );
        let args = ServeArgs {
            config: Some(path.clone()),
            baud: Some(57_600),
            read_only: vec!["/etc".to_string()],
            ..ServeArgs::default()
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.uart.port, "/dev/ttyS1");
        assert_eq!(config.uart.baud_rate, 57_600);
        assert_eq!(config.engine.max_payload, 1024);
        assert_eq!(config.fs.read_only, vec!["/rom", "/etc"]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_port_is_usage_error() {
        let err = build_config(&ServeArgs::default()).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn out_of_range_payload_is_config_error() {
        let args = ServeArgs {
            port: Some("/dev/ttyS0".to_string()),
            max_payload: Some(8),
            ..ServeArgs::default()
        };
        assert_eq!(build_config(&args).unwrap_err().code, CONFIG_INVALID);
    }

    #[test]
    fn malformed_config_file_is_config_error() {
        let path = temp_file("malformed", "{ not json");
        let args = ServeArgs {
            config: Some(path.clone()),
            ..ServeArgs::default()
        };
        assert_eq!(build_config(&args).unwrap_err().code, CONFIG_INVALID);
        let _ = std::fs::remove_file(path);
    }
}
