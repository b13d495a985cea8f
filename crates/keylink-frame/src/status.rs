//! Link status codes.
//!
//! Codes 1-127 travel in error frames. NODEVICE and NOPERMISSION are
//! host-local and never appear on the wire.

use keylink_transport::error::{NODEVICE, NOPERMISSION};

/// A non-OK link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Status {
    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid message length")]
    InvalidLength,
    #[error("invalid message sequencing")]
    InvalidSequence,
    #[error("message timed out")]
    Timeout,
    #[error("channel busy")]
    Busy,
    #[error("access denied")]
    AccessDenied,
    #[error("device gone")]
    Gone,
    #[error("verification error")]
    VerifyError,
    #[error("command requires channel lock")]
    LockRequired,
    #[error("sync error")]
    SyncFail,
    #[error("other unspecified error")]
    Other,
    #[error("device status {0:#04x}")]
    Unknown(u8),
    #[error("no device")]
    NoDevice,
    #[error("permission denied")]
    NoPermission,
}

impl Status {
    /// Decode a status byte from an error frame. Zero means OK.
    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0 => return None,
            1 => Status::InvalidCommand,
            2 => Status::InvalidParameter,
            3 => Status::InvalidLength,
            4 => Status::InvalidSequence,
            5 => Status::Timeout,
            6 => Status::Busy,
            7 => Status::AccessDenied,
            8 => Status::Gone,
            9 => Status::VerifyError,
            10 => Status::LockRequired,
            11 => Status::SyncFail,
            127 => Status::Other,
            other => Status::Unknown(other),
        })
    }

    /// Decode a host-level status code, including the host-local ones.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            NODEVICE => Some(Status::NoDevice),
            NOPERMISSION => Some(Status::NoPermission),
            c => u8::try_from(c).ok().and_then(Self::from_wire),
        }
    }

    /// Numeric status code.
    pub fn code(self) -> u16 {
        match self {
            Status::NoDevice => NODEVICE,
            Status::NoPermission => NOPERMISSION,
            wire => u16::from(wire.wire_code().unwrap_or(0)),
        }
    }

    /// Status byte as carried in an error frame, if it can be sent.
    pub fn wire_code(self) -> Option<u8> {
        Some(match self {
            Status::InvalidCommand => 1,
            Status::InvalidParameter => 2,
            Status::InvalidLength => 3,
            Status::InvalidSequence => 4,
            Status::Timeout => 5,
            Status::Busy => 6,
            Status::AccessDenied => 7,
            Status::Gone => 8,
            Status::VerifyError => 9,
            Status::LockRequired => 10,
            Status::SyncFail => 11,
            Status::Other => 127,
            Status::Unknown(code) => code,
            Status::NoDevice | Status::NoPermission => return None,
        })
    }
}
