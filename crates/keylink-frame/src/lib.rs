//! 64-byte link-layer framing for security keys.
//!
//! Every message is carried in fixed-size reports:
//! - an init frame with the channel id, command byte and total length
//! - zero or more continuation frames with a sequence number
//!
//! Messages are fragmented on the way out and reassembled on the way in.
//! No partial-frame bookkeeping in user code.

pub mod codec;
pub mod command;
pub mod error;
pub mod reassembly;
pub mod status;

pub use codec::{
    continuation_count, fragment, hex, Frame, CONT_DATA_SIZE, CONT_HEADER_SIZE, INIT_DATA_SIZE,
    INIT_HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use command::{
    command_name, is_special_cid, CID_BROADCAST, CID_NOTIFICATION, CMD_APDU, CMD_ATR, CMD_DFU,
    CMD_ERROR, CMD_INIT, CMD_LOCK, CMD_PING, CMD_PROMPT, CMD_SYNC, CMD_SYSINFO, CMD_USB_TEST,
    CMD_WINK, TYPE_INIT,
};
pub use error::{FrameError, Result};
pub use reassembly::Reassembly;
pub use status::Status;
