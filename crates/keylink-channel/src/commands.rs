use bytes::Bytes;
use keylink_frame::{
    CMD_APDU, CMD_ATR, CMD_DFU, CMD_LOCK, CMD_PING, CMD_PROMPT, CMD_SYSINFO, CMD_USB_TEST,
    CMD_WINK,
};
use rand::RngCore;
use tracing::warn;

use crate::channel::Channel;
use crate::config::{MAX_TIMEOUT, NORMAL_TIMEOUT};
use crate::error::{ChannelError, Result};

/// APDU success.
pub const SW_NO_ERROR: u16 = 0x9000;
/// Conditions of use not satisfied: the key wants a touch.
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
/// Wrong data, e.g. a key handle the key does not own.
pub const SW_WRONG_DATA: u16 = 0x6a80;
/// Instruction not supported.
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6d00;

impl Channel {
    /// Echo `data` through the key.
    pub async fn ping(&self, data: &[u8]) -> Result<Bytes> {
        self.exchange(CMD_PING, data, NORMAL_TIMEOUT).await
    }

    /// Echo `len` random bytes through the key.
    pub async fn ping_random(&self, len: usize) -> Result<Bytes> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        self.ping(&data).await
    }

    /// Flash the prompt indicator for `seconds`.
    pub async fn blink(&self, seconds: u8) -> Result<Bytes> {
        self.exchange(CMD_PROMPT, &[seconds], NORMAL_TIMEOUT).await
    }

    /// Lock the key to this channel for `seconds`. Zero releases the lock.
    pub async fn lock(&self, seconds: u8) -> Result<Bytes> {
        self.exchange(CMD_LOCK, &[seconds], NORMAL_TIMEOUT).await
    }

    pub async fn unlock(&self) -> Result<Bytes> {
        self.lock(0).await
    }

    /// Read the system information record.
    pub async fn sysinfo(&self) -> Result<Bytes> {
        self.exchange(CMD_SYSINFO, &[], NORMAL_TIMEOUT).await
    }

    /// Blink so the user can tell which key is meant.
    pub async fn wink(&self) -> Result<Bytes> {
        self.exchange(CMD_WINK, &[], NORMAL_TIMEOUT).await
    }

    /// Send a firmware upgrade command.
    pub async fn dfu(&self, data: &[u8]) -> Result<Bytes> {
        self.exchange(CMD_DFU, data, NORMAL_TIMEOUT).await
    }

    /// Send a raw APDU. The reply still carries its status word.
    pub async fn apdu(&self, data: &[u8]) -> Result<Bytes> {
        self.exchange(CMD_APDU, data, MAX_TIMEOUT).await
    }

    /// Reset the key and read its answer-to-reset.
    pub async fn reset(&self) -> Result<Bytes> {
        self.exchange(CMD_ATR, &[], NORMAL_TIMEOUT).await
    }

    /// USB self test. `delays` are milliseconds before disabling interrupts,
    /// before detaching and before re-attaching.
    pub async fn usb_test(&self, delays: [u8; 3]) -> Result<Bytes> {
        self.exchange(CMD_USB_TEST, &delays, NORMAL_TIMEOUT).await
    }

    /// Send an APDU and split off its status word.
    ///
    /// Returns the response body on 9000. Any other status word comes back
    /// as [`ChannelError::Apdu`]; for "conditions not satisfied" the key is
    /// winked first so the user knows to touch it, unless `no_wink` is set.
    pub async fn apdu_reply(&self, request: &[u8], no_wink: bool) -> Result<Bytes> {
        let err = match self.apdu(request).await {
            Ok(reply) if reply.len() < 2 => ChannelError::Apdu(0),
            Ok(reply) => {
                let body_len = reply.len() - 2;
                let sw = u16::from_be_bytes([reply[body_len], reply[body_len + 1]]);
                if sw == SW_NO_ERROR {
                    return Ok(reply.slice(..body_len));
                }
                if sw == SW_CONDITIONS_NOT_SATISFIED && !no_wink {
                    let _ = self.wink().await;
                }
                ChannelError::Apdu(sw)
            }
            Err(err) => err,
        };

        let code = err.code();
        if !matches!(
            code,
            SW_CONDITIONS_NOT_SATISFIED | SW_WRONG_DATA | SW_INS_NOT_SUPPORTED
        ) {
            warn!(code = %format_args!("{code:#x}"), "apdu failed");
        }
        Err(err)
    }
}
