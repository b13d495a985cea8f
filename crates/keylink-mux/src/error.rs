use keylink_frame::{FrameError, Status};
use keylink_transport::{DeviceId, TransportError};

/// Errors that can occur while opening or driving a device.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The device was torn down while a client was being attached.
    #[error("device {0} is closed")]
    Closed(DeviceId),
}

impl MuxError {
    /// Link status surfaced to channel callers.
    pub fn status(&self) -> Status {
        match self {
            MuxError::Transport(err) => {
                Status::from_code(err.status_code()).unwrap_or(Status::Gone)
            }
            MuxError::Frame(FrameError::PayloadTooLarge { .. }) => Status::InvalidLength,
            MuxError::Frame(_) => Status::InvalidSequence,
            MuxError::Closed(_) => Status::Gone,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
