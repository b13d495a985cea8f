use std::fmt;
use std::fmt::Write as _;

use keylink_transport::{Report, REPORT_SIZE};

use crate::command::{is_special_cid, CMD_ERROR, TYPE_INIT};
use crate::error::{FrameError, Result};

/// Init header: cid (4) + command (1) + length (2) = 7 bytes.
pub const INIT_HEADER_SIZE: usize = 7;

/// Continuation header: cid (4) + sequence (1) = 5 bytes.
pub const CONT_HEADER_SIZE: usize = 5;

/// Payload bytes carried by an init frame.
pub const INIT_DATA_SIZE: usize = REPORT_SIZE - INIT_HEADER_SIZE;

/// Payload bytes carried by a continuation frame.
pub const CONT_DATA_SIZE: usize = REPORT_SIZE - CONT_HEADER_SIZE;

/// Largest message that fits one init frame and 128 continuation frames.
pub const MAX_MESSAGE_SIZE: usize = INIT_DATA_SIZE + 128 * CONT_DATA_SIZE;

/// One 64-byte link-layer frame.
///
/// Wire format:
/// ```text
/// init:  ┌──────────────┬───────────────┬──────────────┬──────────────┐
///        │ CID (4B BE)  │ 1ccc cccc     │ Length (2B)  │ Data (57B)   │
///        └──────────────┴───────────────┴──────────────┴──────────────┘
/// cont:  ┌──────────────┬───────────────┬─────────────────────────────┐
///        │ CID (4B BE)  │ 0sss ssss     │ Data (59B)                  │
///        └──────────────┴───────────────┴─────────────────────────────┘
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    report: Report,
}

impl Frame {
    /// Wrap a raw report.
    pub fn from_report(report: Report) -> Self {
        Self { report }
    }

    /// Build an init frame. `chunk` is truncated to [`INIT_DATA_SIZE`].
    pub fn init(cid: u32, cmd: u8, total_len: u16, chunk: &[u8]) -> Self {
        let mut report = [0u8; REPORT_SIZE];
        report[..4].copy_from_slice(&cid.to_be_bytes());
        report[4] = cmd | TYPE_INIT;
        report[5..7].copy_from_slice(&total_len.to_be_bytes());
        let n = chunk.len().min(INIT_DATA_SIZE);
        report[INIT_HEADER_SIZE..INIT_HEADER_SIZE + n].copy_from_slice(&chunk[..n]);
        Self { report }
    }

    /// Build a continuation frame. `chunk` is truncated to [`CONT_DATA_SIZE`].
    pub fn cont(cid: u32, seq: u8, chunk: &[u8]) -> Self {
        let mut report = [0u8; REPORT_SIZE];
        report[..4].copy_from_slice(&cid.to_be_bytes());
        report[4] = seq & !TYPE_INIT;
        let n = chunk.len().min(CONT_DATA_SIZE);
        report[CONT_HEADER_SIZE..CONT_HEADER_SIZE + n].copy_from_slice(&chunk[..n]);
        Self { report }
    }

    /// Build an error frame carrying one status byte.
    pub fn error(cid: u32, status: u8) -> Self {
        Self::init(cid, CMD_ERROR, 1, &[status])
    }

    pub fn as_report(&self) -> &Report {
        &self.report
    }

    pub fn into_report(self) -> Report {
        self.report
    }

    /// Channel id this frame is addressed to.
    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.report[0], self.report[1], self.report[2], self.report[3]])
    }

    /// Raw command / sequence byte.
    pub fn command(&self) -> u8 {
        self.report[4]
    }

    pub fn is_init(&self) -> bool {
        self.report[4] & TYPE_INIT != 0
    }

    /// Sequence number of a continuation frame.
    pub fn seq(&self) -> Option<u8> {
        (!self.is_init()).then_some(self.report[4] & !TYPE_INIT)
    }

    /// Declared total payload length of an init frame.
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes([self.report[5], self.report[6]])
    }

    /// Payload area of an init frame.
    pub fn init_data(&self) -> &[u8] {
        &self.report[INIT_HEADER_SIZE..]
    }

    /// Payload area of a continuation frame.
    pub fn cont_data(&self) -> &[u8] {
        &self.report[CONT_HEADER_SIZE..]
    }

    /// Status byte if this is an error frame.
    pub fn error_status(&self) -> Option<u8> {
        (self.report[4] == CMD_ERROR && self.total_len() == 1).then_some(self.report[7])
    }

    /// Whether a client listening on `cid` should see this frame.
    pub fn matches_cid(&self, cid: u32) -> bool {
        let own = self.cid();
        own == cid || is_special_cid(own)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("cid", &format_args!("{:08x}", self.cid()))
            .field("command", &format_args!("{:#04x}", self.command()))
            .field("bytes", &hex(&self.report))
            .finish()
    }
}

/// Lowercase hex rendering used for traffic logs.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Number of continuation frames needed for a message of `len` bytes.
pub fn continuation_count(len: usize) -> usize {
    len.saturating_sub(INIT_DATA_SIZE).div_ceil(CONT_DATA_SIZE)
}

/// Split a message into an init frame followed by continuation frames.
pub fn fragment(cid: u32, cmd: u8, data: &[u8]) -> Result<Vec<Frame>> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let first = data.len().min(INIT_DATA_SIZE);
    let mut frames = Vec::with_capacity(1 + continuation_count(data.len()));
    frames.push(Frame::init(cid, cmd, data.len() as u16, &data[..first]));
    for (seq, chunk) in data[first..].chunks(CONT_DATA_SIZE).enumerate() {
        frames.push(Frame::cont(cid, seq as u8, chunk));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CID_BROADCAST, CID_NOTIFICATION, CMD_PING};

    #[test]
    fn init_frame_layout() {
        let frame = Frame::init(0x0102_0304, CMD_PING, 3, b"abc");
        let report = frame.as_report();

        assert_eq!(&report[..4], &[1, 2, 3, 4]);
        assert_eq!(report[4], 0x81);
        assert_eq!(&report[5..7], &[0, 3]);
        assert_eq!(&report[7..10], b"abc");
        assert!(frame.is_init());
        assert_eq!(frame.seq(), None);
        assert_eq!(frame.total_len(), 3);
    }

    #[test]
    fn cont_frame_layout() {
        let frame = Frame::cont(0xaabb_ccdd, 5, b"xy");
        let report = frame.as_report();

        assert_eq!(&report[..4], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(report[4], 5);
        assert_eq!(&report[5..7], b"xy");
        assert!(!frame.is_init());
        assert_eq!(frame.seq(), Some(5));
    }

    #[test]
    fn error_frame_status() {
        let frame = Frame::error(7, 6);
        assert_eq!(frame.error_status(), Some(6));
        assert_eq!(frame.total_len(), 1);

        let ping = Frame::init(7, CMD_PING, 1, &[6]);
        assert_eq!(ping.error_status(), None);
    }

    #[test]
    fn cid_matching() {
        let own = 0x0300_0001;
        assert!(Frame::init(own, CMD_PING, 0, &[]).matches_cid(own));
        assert!(Frame::init(CID_BROADCAST, CMD_PING, 0, &[]).matches_cid(own));
        assert!(Frame::init(CID_NOTIFICATION, CMD_PING, 0, &[]).matches_cid(own));
        assert!(!Frame::init(0x0300_0002, CMD_PING, 0, &[]).matches_cid(own));
    }

    #[test]
    fn continuation_counts() {
        assert_eq!(continuation_count(0), 0);
        assert_eq!(continuation_count(57), 0);
        assert_eq!(continuation_count(58), 1);
        assert_eq!(continuation_count(57 + 59), 1);
        assert_eq!(continuation_count(57 + 59 + 1), 2);
        assert_eq!(continuation_count(MAX_MESSAGE_SIZE), 128);
    }

    #[test]
    fn fragment_sequences_from_zero() {
        let data: Vec<u8> = (0..200u8).collect();
        let frames = fragment(9, CMD_PING, &data).unwrap();

        assert_eq!(frames.len(), 1 + continuation_count(data.len()));
        assert!(frames[0].is_init());
        assert_eq!(frames[0].total_len(), 200);
        for (i, frame) in frames[1..].iter().enumerate() {
            assert_eq!(frame.seq(), Some(i as u8));
            assert_eq!(frame.cid(), 9);
        }
    }

    #[test]
    fn fragment_empty_payload() {
        let frames = fragment(1, CMD_PING, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].total_len(), 0);
    }

    #[test]
    fn fragment_rejects_oversized_payload() {
        let data = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let err = fragment(1, CMD_PING, &data).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn debug_renders_hex() {
        let rendered = format!("{:?}", Frame::error(1, 8));
        assert!(rendered.contains("00000001bf000108"));
    }
}
