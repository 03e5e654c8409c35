use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use uartfs_engine::SessionStats;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What `serve` reports when the proxy ends.
#[derive(Debug, Serialize)]
pub struct ServeSummary {
    pub port: String,
    pub root: String,
    pub uptime_ms: u64,
    /// `stopped` or `failed`.
    pub outcome: &'static str,
    pub stats: SessionStats,
}

pub fn print_summary(summary: &ServeSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let stats = &summary.stats;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            for (name, value) in [
                ("port", summary.port.clone()),
                ("root", summary.root.clone()),
                ("outcome", summary.outcome.to_string()),
                ("uptime_ms", summary.uptime_ms.to_string()),
                ("requests", stats.requests.to_string()),
                ("responses", stats.responses.to_string()),
                ("errors", stats.errors.to_string()),
                ("timeouts", stats.timeouts.to_string()),
                ("stalled_frames", stats.stalled_frames.to_string()),
                ("frames_dropped", stats.frames_dropped.to_string()),
                ("crc_errors", stats.crc_errors.to_string()),
                ("discarded_bytes", stats.discarded_bytes.to_string()),
            ] {
                table.add_row(vec![name.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let stats = &summary.stats;
            println!(
                "{} on {} after {}ms: requests={} errors={} timeouts={} dropped={} crc_errors={}",
                summary.outcome,
                summary.port,
                summary.uptime_ms,
                stats.requests,
                stats.errors,
                stats.timeouts,
                stats.frames_dropped,
                stats.crc_errors
            );
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PortRow {
    pub name: String,
    pub kind: String,
}

pub fn print_ports(ports: &[PortRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ports),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "TYPE"]);
            for port in ports {
                table.add_row(vec![port.name.clone(), port.kind.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!("{} ({})", port.name, port.kind);
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
