/// Errors that can occur during fragmentation and reassembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in one init frame plus 128 continuation frames.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Reassembly was started from a continuation frame.
    #[error("expected an init frame")]
    NotInitFrame,

    /// An init frame arrived where a continuation frame was expected.
    #[error("unexpected init frame (command {0:#04x}) during reassembly")]
    UnexpectedInit(u8),

    /// A continuation frame arrived out of order.
    #[error("bad sequence number (expected {expected}, got {got})")]
    BadSequence { expected: u8, got: u8 },
}

pub type Result<T> = std::result::Result<T, FrameError>;
