use keylink_frame::{FrameError, Status};
use keylink_mux::MuxError;

/// Errors returned by channel operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Link status reported by the key or synthesized by the host.
    #[error("link status: {0}")]
    Status(#[from] Status),

    /// Non-success status word from an APDU.
    #[error("apdu status word {0:#06x}")]
    Apdu(u16),

    /// Request could not be framed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl ChannelError {
    /// Numeric code surfaced to callers: link status, or the APDU status
    /// word.
    pub fn code(&self) -> u16 {
        match self {
            ChannelError::Status(status) => status.code(),
            ChannelError::Apdu(sw) => *sw,
            ChannelError::Frame(FrameError::PayloadTooLarge { .. }) => {
                Status::InvalidLength.code()
            }
            ChannelError::Frame(_) => Status::InvalidSequence.code(),
        }
    }

    pub fn status(&self) -> Option<Status> {
        match self {
            ChannelError::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_status(&self, status: Status) -> bool {
        self.status() == Some(status)
    }
}

impl From<MuxError> for ChannelError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Frame(err) => ChannelError::Frame(err),
            other => ChannelError::Status(other.status()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
