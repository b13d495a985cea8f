//! Command codes and special channel ids.
//!
//! Command bytes are stored with the init-frame bit set, exactly as they
//! appear on the wire.

/// Init-frame marker in byte 4.
pub const TYPE_INIT: u8 = 0x80;

/// Echo data through the local processor only.
pub const CMD_PING: u8 = 0x81;
/// Perform reset action and read the answer-to-reset string.
pub const CMD_ATR: u8 = 0x82;
/// Send a raw APDU.
pub const CMD_APDU: u8 = 0x83;
/// Acquire, renew or release the channel lock.
pub const CMD_LOCK: u8 = 0x84;
/// Obtain the system information record.
pub const CMD_SYSINFO: u8 = 0x85;
/// Obtain an unused channel id.
pub const CMD_INIT: u8 = 0x86;
/// Control prompt flashing.
pub const CMD_PROMPT: u8 = 0x87;
/// Send device identification wink.
pub const CMD_WINK: u8 = 0x88;
/// USB test.
pub const CMD_USB_TEST: u8 = 0xb9;
/// Device firmware upgrade.
pub const CMD_DFU: u8 = 0xba;
/// Protocol resync.
pub const CMD_SYNC: u8 = 0xbc;
/// Error response, one status byte of payload.
pub const CMD_ERROR: u8 = 0xbf;

/// Addresses every channel of a device.
pub const CID_BROADCAST: u32 = 0xffff_ffff;
/// Device notifications; also matches every channel.
pub const CID_NOTIFICATION: u32 = 0;

/// Returns a human-readable name for a command byte.
pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        CMD_PING => "PING",
        CMD_ATR => "ATR",
        CMD_APDU => "APDU",
        CMD_LOCK => "LOCK",
        CMD_SYSINFO => "SYSINFO",
        CMD_INIT => "INIT",
        CMD_PROMPT => "PROMPT",
        CMD_WINK => "WINK",
        CMD_USB_TEST => "USB_TEST",
        CMD_DFU => "DFU",
        CMD_SYNC => "SYNC",
        CMD_ERROR => "ERROR",
        c if c & TYPE_INIT == 0 => "CONT",
        _ => "UNKNOWN",
    }
}

/// Returns true for the channel ids every client listens on.
pub fn is_special_cid(cid: u32) -> bool {
    cid == CID_BROADCAST || cid == CID_NOTIFICATION
}
