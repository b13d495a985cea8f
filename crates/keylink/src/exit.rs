use std::fmt;
use std::io;

use keylink_channel::ChannelError;
use keylink_frame::{FrameError, Status};
use keylink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::Permits(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(
            status_exit_code(Status::from_code(other.status_code())),
            format!("{context}: {other}"),
        ),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match &err {
        ChannelError::Status(status) => status_exit_code(Some(*status)),
        ChannelError::Apdu(_) => FAILURE,
        ChannelError::Frame(FrameError::PayloadTooLarge { .. }) => DATA_INVALID,
        ChannelError::Frame(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn status_exit_code(status: Option<Status>) -> i32 {
    match status {
        Some(Status::NoDevice | Status::Gone) => TRANSPORT_ERROR,
        Some(Status::NoPermission | Status::AccessDenied) => PERMISSION_DENIED,
        Some(Status::Timeout) => TIMEOUT,
        Some(Status::InvalidCommand | Status::InvalidParameter | Status::InvalidLength) => {
            DATA_INVALID
        }
        Some(_) => FAILURE,
        None => INTERNAL,
    }
}
