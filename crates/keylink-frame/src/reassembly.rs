use bytes::{Bytes, BytesMut};

use crate::codec::Frame;
use crate::error::{FrameError, Result};

/// Reassembles one inbound message from its init and continuation frames.
///
/// The buffer is owned by the in-progress exchange; dropping it abandons the
/// message without touching any shared state.
#[derive(Debug)]
pub struct Reassembly {
    buf: BytesMut,
    expected: usize,
    next_seq: u8,
}

impl Reassembly {
    /// Start from an init frame, copying its first chunk.
    pub fn start(frame: &Frame) -> Result<Self> {
        if !frame.is_init() {
            return Err(FrameError::NotInitFrame);
        }
        let expected = usize::from(frame.total_len());
        let mut buf = BytesMut::with_capacity(expected);
        let n = expected.min(frame.init_data().len());
        buf.extend_from_slice(&frame.init_data()[..n]);
        Ok(Self {
            buf,
            expected,
            next_seq: 0,
        })
    }

    /// Append a continuation frame. Sequence numbers must run 0, 1, 2, ...
    pub fn push(&mut self, frame: &Frame) -> Result<()> {
        let Some(seq) = frame.seq() else {
            return Err(FrameError::UnexpectedInit(frame.command()));
        };
        if seq != self.next_seq {
            return Err(FrameError::BadSequence {
                expected: self.next_seq,
                got: seq,
            });
        }
        self.next_seq = self.next_seq.wrapping_add(1);

        let n = self.remaining().min(frame.cont_data().len());
        self.buf.extend_from_slice(&frame.cont_data()[..n]);
        Ok(())
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> usize {
        self.expected - self.buf.len()
    }

    pub fn is_complete(&self) -> bool {
        self.buf.len() == self.expected
    }

    /// Sequence number the next continuation frame must carry.
    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    /// Hand out the reassembled payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
