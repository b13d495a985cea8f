use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use keylink_frame::{command_name, hex, Frame, Reassembly, Status, CID_BROADCAST};
use keylink_mux::{CountdownTimer, FrameListener, Registry, WeakDevice};
use keylink_transport::DeviceId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};

/// Device-side half of a channel: filters frames by channel id and queues
/// them for the running exchange.
pub(crate) struct ChannelListener {
    cid: AtomicU32,
    closed: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl ChannelListener {
    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Frame>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FrameListener for ChannelListener {
    fn cid(&self) -> u32 {
        self.cid.load(Ordering::SeqCst)
    }

    fn received_frame(&self, frame: &Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        if !frame.matches_cid(self.cid()) {
            return true;
        }
        match self.sender().as_ref() {
            Some(tx) => tx.send(*frame).is_ok(),
            None => false,
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Frames already queued stay readable; the exchange then sees the end.
        self.sender().take();
    }
}

/// Frames delivered to this channel and not yet consumed.
pub(crate) struct Inbox {
    rx: mpsc::UnboundedReceiver<Frame>,
    /// Init frames that showed up while a reply was being reassembled.
    deferred: VecDeque<Frame>,
    pub(crate) sync_count: u8,
    /// Command whose reply has not been read yet. Still set when the
    /// exchange waiting for it was dropped.
    pub(crate) awaiting: Option<u8>,
}

impl Inbox {
    /// Next frame, deferred ones first. `None` once the channel is closed.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        match self.deferred.pop_front() {
            Some(frame) => Some(frame),
            None => self.rx.recv().await,
        }
    }

    fn clear(&mut self) {
        self.deferred.clear();
        self.awaiting = None;
        while self.rx.try_recv().is_ok() {}
    }
}

#[derive(Default)]
struct Link {
    which: Option<DeviceId>,
    device: WeakDevice,
}

/// Marks the channel busy for the lifetime of one command.
pub(crate) struct Pending<'a> {
    channel: &'a Channel,
}

impl<'a> Pending<'a> {
    pub(crate) fn begin(channel: &'a Channel) -> Self {
        channel.pending.store(true, Ordering::SeqCst);
        Self { channel }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.channel.pending.store(false, Ordering::SeqCst);
        if self.channel.closing_when_idle.swap(false, Ordering::SeqCst) {
            self.channel.close();
        }
    }
}

/// One logical session with a security key.
///
/// Channels share their device with other channels. Each has its own
/// channel id, negotiated by [`Channel::sync`], and runs at most one command
/// at a time: concurrent callers queue up behind the command in flight.
///
/// Once a channel is closed, or has seen its device go away, every
/// operation fails with GONE without touching the device. Dropping a
/// channel closes it.
pub struct Channel {
    registry: Arc<Registry>,
    config: ChannelConfig,
    instance: u32,
    listener: Arc<ChannelListener>,
    link: Mutex<Link>,
    pub(crate) inbox: tokio::sync::Mutex<Inbox>,
    pending: AtomicBool,
    closing_when_idle: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Channel {
    /// An unopened channel backed by `registry`.
    pub fn new(registry: Arc<Registry>, config: ChannelConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let instance = registry.next_instance();
        Self {
            registry,
            config,
            instance,
            listener: Arc::new(ChannelListener {
                cid: AtomicU32::new(CID_BROADCAST),
                closed: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
            link: Mutex::new(Link::default()),
            inbox: tokio::sync::Mutex::new(Inbox {
                rx,
                deferred: VecDeque::new(),
                sync_count: 0,
                awaiting: None,
            }),
            pending: AtomicBool::new(false),
            closing_when_idle: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Create a channel and open it on `which`, or on the first device
    /// found.
    pub fn connect(
        registry: Arc<Registry>,
        which: Option<DeviceId>,
        config: ChannelConfig,
    ) -> Result<Self> {
        let channel = Self::new(registry, config);
        channel.open(which)?;
        Ok(channel)
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Current channel id.
    pub fn cid(&self) -> u32 {
        self.listener.cid()
    }

    pub(crate) fn set_cid(&self, cid: u32) {
        self.listener.cid.store(cid, Ordering::SeqCst);
    }

    /// Channel id used before negotiation. Unique within this process, but
    /// may collide with other processes sharing the key.
    pub fn default_cid(&self) -> u32 {
        let index = self.link().which.as_ref().map_or(0, |id| id.index);
        (self.instance & 0x00ff_ffff) | (index.wrapping_add(1) << 24)
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.link().which.clone()
    }

    pub(crate) fn device(&self) -> Option<keylink_mux::Device> {
        self.link().device.upgrade()
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_closed()
    }

    /// Whether a command is in flight.
    pub fn is_busy(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Attach to `which`, or to the first enumerated device.
    ///
    /// When no device is named and the first one vanishes before it can be
    /// opened, enumeration is retried a few times.
    pub fn open(&self, which: Option<DeviceId>) -> Result<()> {
        if self.is_closed() {
            return Err(Status::NoDevice.into());
        }
        self.closing_when_idle.store(false, Ordering::SeqCst);

        if let Some(id) = which {
            return self.attach(id);
        }

        let mut retries = self.config.open_retries;
        loop {
            let Some(id) = self.registry.enumerate()?.into_iter().next() else {
                return Err(Status::NoDevice.into());
            };
            match self.attach(id) {
                Err(err) if err.is_status(Status::NoDevice) && retries > 0 => {
                    retries -= 1;
                    debug!(retries, "device vanished before open, enumerating again");
                }
                result => return result,
            }
        }
    }

    fn attach(&self, id: DeviceId) -> Result<()> {
        let previous = {
            let mut link = self.link();
            link.which = Some(id.clone());
            std::mem::take(&mut link.device).upgrade()
        };
        if let Some(previous) = previous {
            let listener: Arc<dyn FrameListener> = self.listener.clone();
            self.registry.remove_client(&previous, &listener);
        }

        self.set_cid(self.default_cid());
        let device = self.registry.add_client(&id, self.listener.clone())?;
        self.link().device = device.downgrade();

        info!(
            device = %id,
            cid = %format_args!("{:08x}", self.cid()),
            "channel opened"
        );
        Ok(())
    }

    /// Close the channel. Queued frames are dropped and the channel leaves
    /// its device after a short grace period. A command in flight ends with
    /// GONE.
    pub fn close(&self) {
        self.listener.mark_closed();
        if let Ok(mut inbox) = self.inbox.try_lock() {
            inbox.clear();
        }
        let device = std::mem::take(&mut self.link().device).upgrade();
        self.closed_tx.send_replace(true);

        let Some(device) = device else {
            return;
        };
        debug!(
            device = %device.id(),
            cid = %format_args!("{:08x}", self.cid()),
            "channel closed"
        );

        let registry = Arc::clone(&self.registry);
        let listener: Arc<dyn FrameListener> = self.listener.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let grace = self.config.close_grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    registry.remove_client(&device, &listener);
                });
            }
            Err(_) => registry.remove_client(&device, &listener),
        }
    }

    /// Close once the command in flight, if any, has completed. Resolves
    /// when the channel is closed.
    pub async fn close_when_idle(&self) {
        let mut closed = self.closed_tx.subscribe();
        self.closing_when_idle.store(true, Ordering::SeqCst);
        if !self.is_busy() && self.closing_when_idle.swap(false, Ordering::SeqCst) {
            self.close();
        }
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Send `cmd` and wait for its reply, retrying while the key answers
    /// BUSY and the busy budget lasts.
    pub async fn exchange(&self, cmd: u8, data: &[u8], timeout: Duration) -> Result<Bytes> {
        let mut inbox = self.inbox.lock().await;
        let _pending = Pending::begin(self);
        let busy = CountdownTimer::new(self.config.busy_budget);

        loop {
            match self.transact(&mut inbox, cmd, data, timeout).await {
                Err(err) if err.is_status(Status::Busy) && !busy.expired() => {
                    tokio::time::sleep(self.config.busy_retry_interval.min(busy.remaining())).await;
                }
                result => return result,
            }
        }
    }

    /// One write and read, bounded by `timeout`. On timeout the device is
    /// considered dead and torn down.
    async fn transact(
        &self,
        inbox: &mut Inbox,
        cmd: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        if self.is_closed() {
            return Err(Status::Gone.into());
        }
        let device = self.device().ok_or(ChannelError::Status(Status::Gone))?;

        let abandoned = inbox.awaiting.take();
        self.queue(&device, self.cid(), cmd, data)?;
        inbox.awaiting = Some(cmd);

        let reply = async {
            if let Some(abandoned) = abandoned {
                self.skip_abandoned_reply(&mut *inbox, abandoned).await?;
            }
            self.read_reply(&mut *inbox, cmd).await
        };
        let result = tokio::time::timeout(timeout, reply).await;
        inbox.awaiting = None;
        match result {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    cid = %format_args!("{:08x}", self.cid()),
                    command = command_name(cmd),
                    "timeout"
                );
                device.destroy();
                Err(Status::Timeout.into())
            }
        }
    }

    /// Queue a command on `device`. A BUSY answer for a locked device comes
    /// back to this channel only.
    pub(crate) fn queue(
        &self,
        device: &keylink_mux::Device,
        cid: u32,
        cmd: u8,
        data: &[u8],
    ) -> Result<()> {
        Ok(device.queue_command_from(&*self.listener, cid, cmd, data)?)
    }

    /// Consume the reply to `abandoned`, a command whose exchange was dropped
    /// before its answer arrived. The key answers in order, so that reply
    /// precedes the one to the command just sent.
    pub(crate) async fn skip_abandoned_reply(&self, inbox: &mut Inbox, abandoned: u8) -> Result<()> {
        loop {
            let frame = inbox.next_frame().await.ok_or(ChannelError::Status(Status::Gone))?;
            if let Some(status) = frame.error_status() {
                if Status::from_wire(status) == Some(Status::Gone) {
                    return self.error_reply(&frame, status).map(|_| ());
                }
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    status,
                    "dropping error frame of an abandoned command"
                );
                return Ok(());
            }
            if !frame.is_init() {
                continue;
            }
            if frame.command() != abandoned {
                // Nothing came back for the abandoned command.
                inbox.deferred.push_front(frame);
                return Ok(());
            }

            let mut msg = Reassembly::start(&frame)?;
            while !msg.is_complete() {
                let frame = inbox.rx.recv().await.ok_or(ChannelError::Status(Status::Gone))?;
                if frame.is_init() || frame.error_status().is_some() {
                    inbox.deferred.push_front(frame);
                    break;
                }
                if msg.push(&frame).is_err() {
                    break;
                }
            }
            debug!(
                cid = %format_args!("{:08x}", self.cid()),
                command = command_name(abandoned),
                "dropped reply of an abandoned command"
            );
            return Ok(());
        }
    }

    /// Wait for the reply to `cmd` and reassemble it.
    async fn read_reply(&self, inbox: &mut Inbox, cmd: u8) -> Result<Bytes> {
        let mut msg = loop {
            let frame = inbox.next_frame().await.ok_or(ChannelError::Status(Status::Gone))?;
            if let Some(status) = frame.error_status() {
                return self.error_reply(&frame, status);
            }
            if !frame.is_init() {
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    frame = %hex(frame.as_report()),
                    "ignoring non-init frame"
                );
                continue;
            }
            if frame.command() != cmd {
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    frame = %hex(frame.as_report()),
                    "ignoring non-ack frame"
                );
                continue;
            }
            break Reassembly::start(&frame)?;
        };

        while !msg.is_complete() {
            // Deferred frames belong to the next exchange.
            let frame = inbox.rx.recv().await.ok_or(ChannelError::Status(Status::Gone))?;
            if let Some(status) = frame.error_status() {
                return self.error_reply(&frame, status);
            }
            if frame.is_init() {
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    frame = %hex(frame.as_report()),
                    "deferring init frame"
                );
                inbox.deferred.push_back(frame);
                continue;
            }
            if let Err(err) = msg.push(&frame) {
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    error = %err,
                    frame = %hex(frame.as_report()),
                    "bad continuation frame"
                );
                return Err(Status::InvalidSequence.into());
            }
        }

        Ok(msg.finish())
    }

    /// Outcome of an error frame carrying `status`.
    pub(crate) fn error_reply(&self, frame: &Frame, status: u8) -> Result<Bytes> {
        match Status::from_wire(status) {
            None => Ok(Bytes::new()),
            // Busy is routine, not logged.
            Some(Status::Busy) => Err(Status::Busy.into()),
            Some(Status::Gone) => {
                debug!(cid = %format_args!("{:08x}", self.cid()), "device gone");
                self.listener.mark_closed();
                Err(Status::Gone.into())
            }
            Some(status) => {
                debug!(
                    cid = %format_args!("{:08x}", self.cid()),
                    frame = %hex(frame.as_report()),
                    "error frame"
                );
                Err(status.into())
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("cid", &format_args!("{:08x}", self.cid()))
            .field("device", &self.device_id())
            .field("closed", &self.is_closed())
            .field("busy", &self.is_busy())
            .finish()
    }
}
