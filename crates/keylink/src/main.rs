mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, LinkOptions};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "keylink", version, about = "Security key link-layer CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `trace` dumps every report.
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Extra per-target log levels, e.g. `keylink_mux=trace,nusb=debug`.
    #[arg(long, value_name = "DIRECTIVES", env = "KEYLINK_LOG", global = true)]
    log_filter: Option<String>,

    /// Permitted-device list (JSON). Defaults to the built-in list.
    #[arg(long, value_name = "FILE", env = "KEYLINK_PERMITS", global = true)]
    permits: Option<PathBuf>,

    /// How long to keep retrying a busy key, in seconds.
    #[arg(long, value_name = "SECONDS", global = true)]
    busy_seconds: Option<u64>,

    /// Device to talk to (e.g. usb:259). Default: first device found.
    #[arg(long, short = 'd', value_name = "DEVICE", global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level, cli.log_filter.as_deref());

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let options = LinkOptions {
        permits: cli.permits,
        busy_seconds: cli.busy_seconds,
        device: cli.device,
    };
    let result = cmd::run(cli.command, format, &options);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
