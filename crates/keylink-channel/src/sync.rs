//! Channel-id negotiation.
//!
//! A fresh channel asks the key for a channel id with INIT, sent on the
//! broadcast id together with a random nonce. Keys that do not implement
//! INIT get a randomized default id instead, confirmed with a SYNC round
//! trip. Channels that already hold a negotiated id only SYNC.

use keylink_frame::{Frame, Status, CID_BROADCAST, CMD_INIT, CMD_SYNC};
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, Inbox, Pending};
use crate::error::{ChannelError, Result};

/// Nonce bytes sent with INIT and echoed back by the key.
pub const INIT_NONCE_SIZE: usize = 8;

/// Channel id bytes following the nonce in an INIT reply.
const INIT_CID_SIZE: usize = 4;

enum Sentinel {
    Init([u8; INIT_NONCE_SIZE]),
    Sync(u8),
}

impl Sentinel {
    fn matches(&self, frame: &Frame) -> bool {
        match self {
            Sentinel::Init(nonce) => {
                frame.command() == CMD_INIT && frame.init_data()[..INIT_NONCE_SIZE] == nonce[..]
            }
            // Old firmware answers SYNC without echoing the sentinel.
            Sentinel::Sync(count) => {
                frame.command() == CMD_SYNC
                    && (frame.total_len() == 0 || frame.init_data()[0] == *count)
            }
        }
    }
}

/// Statuses different firmwares use to reject INIT.
fn init_unsupported(err: &ChannelError) -> bool {
    matches!(
        err.status(),
        Some(Status::InvalidCommand | Status::InvalidParameter | Status::InvalidLength)
    )
}

impl Channel {
    /// Make sure this channel owns its channel id on the key.
    ///
    /// Tries INIT first while the channel still uses its default id, falling
    /// back to a randomized id verified with SYNC. Each attempt waits
    /// `sync_interval`; after `sync_attempts` the result is TIMEOUT.
    pub async fn sync(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Status::Gone.into());
        }
        let device = self.device().ok_or(ChannelError::Status(Status::Gone))?;
        let mut inbox = self.inbox.lock().await;
        let _pending = Pending::begin(self);

        let mut init = self.cid() == self.default_cid();
        let nonce: [u8; INIT_NONCE_SIZE] = rand::random();
        let mut abandoned = inbox.awaiting.take();

        for attempt in 0..self.config().sync_attempts {
            let sentinel = if init {
                self.queue(&device, CID_BROADCAST, CMD_INIT, &nonce)?;
                Sentinel::Init(nonce)
            } else {
                inbox.sync_count = inbox.sync_count.wrapping_add(1);
                let count = inbox.sync_count;
                self.queue(&device, self.cid(), CMD_SYNC, &[count])?;
                Sentinel::Sync(count)
            };

            let stale = abandoned.take();
            let inbox = &mut *inbox;
            let reply = async {
                if let Some(stale) = stale {
                    self.skip_abandoned_reply(&mut *inbox, stale).await?;
                }
                self.await_sentinel(&mut *inbox, &sentinel).await
            };
            let reply = match tokio::time::timeout(self.config().sync_interval, reply).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(
                        cid = %format_args!("{:08x}", self.cid()),
                        attempt,
                        "no sentinel reply"
                    );
                    continue;
                }
            };

            if !init {
                if let Err(err) = &reply {
                    warn!(error = %err, "sync failed");
                }
                return reply.map(|_| ());
            }

            match reply {
                Ok(frame)
                    if frame.command() == CMD_INIT
                        && usize::from(frame.total_len()) >= INIT_NONCE_SIZE + INIT_CID_SIZE =>
                {
                    let data = frame.init_data();
                    let cid = u32::from_be_bytes([
                        data[INIT_NONCE_SIZE],
                        data[INIT_NONCE_SIZE + 1],
                        data[INIT_NONCE_SIZE + 2],
                        data[INIT_NONCE_SIZE + 3],
                    ]);
                    self.set_cid(cid);
                    info!(cid = %format_args!("{cid:08x}"), "channel id assigned");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) if init_unsupported(&err) => {}
                Err(err) => {
                    warn!(error = %err, "init failed");
                    return Err(err);
                }
            }

            // Randomize bits 8-23 to make collisions on a shared bus unlikely.
            let [r0, r1]: [u8; 2] = rand::random();
            self.set_cid(self.cid() ^ ((u32::from(r0) << 16) | (u32::from(r1) << 8)));
            debug!(
                cid = %format_args!("{:08x}", self.cid()),
                "init unsupported, falling back to sync"
            );
            init = false;
        }

        warn!(cid = %format_args!("{:08x}", self.cid()), "sync timed out");
        Err(Status::Timeout.into())
    }

    /// Eat frames until the sentinel reply or an error frame shows up.
    async fn await_sentinel(&self, inbox: &mut Inbox, sentinel: &Sentinel) -> Result<Frame> {
        loop {
            let frame = inbox
                .next_frame()
                .await
                .ok_or(ChannelError::Status(Status::Gone))?;
            if let Some(status) = frame.error_status() {
                return self.error_reply(&frame, status).map(|_| frame);
            }
            if sentinel.matches(&frame) {
                return Ok(frame);
            }
            trace!(
                cid = %format_args!("{:08x}", self.cid()),
                command = frame.command(),
                "discarding frame while syncing"
            );
        }
    }
}
