use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use keylink_frame::hex;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

#[derive(Serialize)]
pub struct DeviceRow {
    pub id: String,
    pub namespace: &'static str,
    pub index: u32,
    pub open: bool,
}

/// Reply to one command on one channel.
#[derive(Serialize)]
pub struct ReplyOutput<'a> {
    pub command: &'static str,
    pub device: String,
    pub cid: String,
    pub size: usize,
    pub data: String,
    pub elapsed_ms: f64,
    #[serde(skip)]
    pub raw: &'a [u8],
}

impl<'a> ReplyOutput<'a> {
    pub fn new(
        command: &'static str,
        device: String,
        cid: u32,
        raw: &'a [u8],
        elapsed: std::time::Duration,
    ) -> Self {
        Self {
            command,
            device,
            cid: format!("{cid:08x}"),
            size: raw.len(),
            data: hex(raw),
            elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
            raw,
        }
    }
}

pub fn print_devices(devices: &[DeviceRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(devices).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "NAMESPACE", "INDEX", "OPEN"]);
            for device in devices {
                table.add_row(vec![
                    device.id.clone(),
                    device.namespace.to_string(),
                    device.index.to_string(),
                    device.open.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if devices.is_empty() {
                println!("no devices found");
            }
            for device in devices {
                println!("{}", device.id);
            }
        }
        OutputFormat::Raw => {
            for device in devices {
                println!("{}", device.id);
            }
        }
    }
}

pub fn print_reply(out: &ReplyOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "DEVICE", "CID", "SIZE", "TIME", "DATA"])
                .add_row(vec![
                    out.command.to_string(),
                    out.device.clone(),
                    out.cid.clone(),
                    out.size.to_string(),
                    format!("{:.2}ms", out.elapsed_ms),
                    out.data.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} device={} cid={} size={} time={:.2}ms",
                out.command, out.device, out.cid, out.size, out.elapsed_ms
            );
            if !out.data.is_empty() {
                println!("  {}", out.data);
            }
        }
        OutputFormat::Raw => print_raw(out.raw),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
