use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod apdu;
pub mod list;
pub mod lock;
pub mod ping;
pub mod session;
pub mod sysinfo;
pub mod version;
pub mod wink;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List permitted keys visible to this host.
    List(ListArgs),
    /// Echo random bytes through a key.
    Ping(PingArgs),
    /// Blink a key so it can be told apart from others.
    Wink(WinkArgs),
    /// Read a key's system information record.
    Sysinfo(SysinfoArgs),
    /// Send one APDU and print the response body.
    Apdu(ApduArgs),
    /// Lock a key to this channel for a number of seconds.
    Lock(LockArgs),
    /// Release a channel lock.
    Unlock(UnlockArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Flags shared by every command that talks to a key.
#[derive(Debug, Default)]
pub struct LinkOptions {
    pub permits: Option<PathBuf>,
    pub busy_seconds: Option<u64>,
    pub device: Option<String>,
}

pub fn run(command: Command, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    match command {
        Command::List(args) => list::run(args, format, options),
        Command::Ping(args) => ping::run(args, format, options),
        Command::Wink(args) => wink::run(args, format, options),
        Command::Sysinfo(args) => sysinfo::run(args, format, options),
        Command::Apdu(args) => apdu::run(args, format, options),
        Command::Lock(args) => lock::run_lock(args, format, options),
        Command::Unlock(args) => lock::run_unlock(args, format, options),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Number of random bytes to echo.
    #[arg(long, short = 's', default_value = "10")]
    pub size: usize,
    /// Number of pings to send.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
}

#[derive(Args, Debug, Default)]
pub struct WinkArgs {}

#[derive(Args, Debug, Default)]
pub struct SysinfoArgs {}

#[derive(Args, Debug)]
pub struct ApduArgs {
    /// Command APDU as hex, e.g. 00a4040008a0000006472f0001.
    pub hex: String,
    /// Do not wink when the key asks for a touch.
    #[arg(long)]
    pub no_wink: bool,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Lock duration in seconds (1-255).
    #[arg(value_parser = clap::value_parser!(u8).range(1..))]
    pub seconds: u8,
}

#[derive(Args, Debug, Default)]
pub struct UnlockArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
