use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uartfs_frame::{DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_LIMIT};
use uartfs_transport::UartConfig;

use crate::error::{EngineError, Result};

/// Smallest payload limit that still fits every fixed-size message.
pub const MIN_PAYLOAD: usize = 64;

/// Protocol engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest frame payload accepted or emitted.
    pub max_payload: usize,
    /// Per-exchange deadline, measured from the first byte of the request frame.
    pub exchange_timeout_ms: u64,
    /// How often the worker wakes without input to check deadlines.
    pub poll_interval_ms: u64,
    /// Chunks the reader thread may queue ahead of the worker.
    pub inbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            exchange_timeout_ms: 2_000,
            poll_interval_ms: 20,
            inbox_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Largest read that fits one `Ok(Data)` response.
    pub fn max_read(&self) -> u32 {
        (self.max_payload - uartfs_message::DATA_OVERHEAD) as u32
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_PAYLOAD..=MAX_PAYLOAD_LIMIT).contains(&self.max_payload) {
            return Err(EngineError::InvalidConfig(format!(
                "max_payload must be between {MIN_PAYLOAD} and {MAX_PAYLOAD_LIMIT}, got {}",
                self.max_payload
            )));
        }
        if self.exchange_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "exchange_timeout_ms must be positive".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "inbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for [`LocalFileSystem`](crate::LocalFileSystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFsConfig {
    /// Directory served as `/`.
    pub root: PathBuf,
    /// Path prefixes (relative to `root`) that refuse writes and deletes.
    pub read_only: Vec<String>,
    /// Handle table capacity.
    pub max_open_files: usize,
}

impl Default for LocalFsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            read_only: Vec::new(),
            max_open_files: 16,
        }
    }
}

/// Everything needed to bring up a proxy over a local directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub uart: UartConfig,
    pub engine: EngineConfig,
    pub fs: LocalFsConfig,
}
