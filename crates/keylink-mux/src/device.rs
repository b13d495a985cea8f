use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use keylink_frame::{
    command_name, fragment, hex, Frame, Status, CID_NOTIFICATION, CMD_LOCK, CMD_SYNC,
};
use keylink_transport::{DeviceId, Transport};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::timer::CountdownTimer;

/// Slack added to a lock's duration so the host never releases a lock the
/// device still holds.
pub const LOCK_SLACK: Duration = Duration::from_millis(100);

/// A client of a [`Device`] that receives every inbound frame.
pub trait FrameListener: Send + Sync {
    /// Channel id the client currently answers to.
    fn cid(&self) -> u32;

    /// Offer one inbound frame. Returning `false` means the client is closed
    /// and should be dropped from the device.
    fn received_frame(&self, frame: &Frame) -> bool;

    /// The device is gone; refuse further frames.
    fn mark_closed(&self);
}

struct LockState {
    cid: u32,
    duration: Duration,
    timer: CountdownTimer,
}

struct DeviceState {
    closed: bool,
    txqueue: VecDeque<Frame>,
    clients: Vec<Arc<dyn FrameListener>>,
    lock: Option<LockState>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

struct DeviceInner {
    id: DeviceId,
    transport: Arc<dyn Transport>,
    wake: Arc<Notify>,
    state: Mutex<DeviceState>,
}

impl DeviceInner {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in [state.writer.take(), state.reader.take()].into_iter().flatten() {
            task.abort();
        }
        if !state.closed {
            self.transport.close();
        }
    }
}

/// One open security key shared by any number of channels.
///
/// The device owns the transport. Outbound commands go through a FIFO queue
/// drained by a single write pump, so the frames of one command are always
/// sent back to back. Inbound reports are read by a receive loop and offered
/// to every registered [`FrameListener`] in arrival order; listeners filter
/// by channel id themselves.
///
/// `Device` is a cheap handle. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Wrap an open transport and start the write pump. Must be called
    /// within a tokio runtime.
    pub fn new(id: DeviceId, transport: Arc<dyn Transport>) -> Self {
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(DeviceInner {
            id,
            transport: Arc::clone(&transport),
            wake: Arc::clone(&wake),
            state: Mutex::new(DeviceState {
                closed: false,
                txqueue: VecDeque::new(),
                clients: Vec::new(),
                lock: None,
                writer: None,
                reader: None,
            }),
        });

        let writer = tokio::spawn(write_pump(Arc::downgrade(&inner), transport, wake));
        inner.state().writer = Some(writer);

        debug!(device = %inner.id, "device attached");
        Self { inner }
    }

    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    /// Name of the underlying transport binding.
    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.transport_name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Channel id currently holding the lock, if any.
    pub fn lock_holder(&self) -> Option<u32> {
        let mut state = self.inner.state();
        expire_lock(&mut state);
        state.lock.as_ref().map(|lock| lock.cid)
    }

    /// Frames queued but not yet sent.
    pub fn pending_frames(&self) -> usize {
        self.inner.state().txqueue.len()
    }

    pub fn client_count(&self) -> usize {
        self.inner.state().clients.len()
    }

    pub fn downgrade(&self) -> WeakDevice {
        WeakDevice {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn has_client(&self, listener: &Arc<dyn FrameListener>) -> bool {
        self.inner
            .state()
            .clients
            .iter()
            .any(|client| same_listener(client, listener))
    }

    /// Add a client. The first client starts the receive loop.
    ///
    /// Returns `false` if the device is already closed.
    pub fn register_client(&self, listener: Arc<dyn FrameListener>) -> bool {
        let mut state = self.inner.state();
        if state.closed {
            return false;
        }
        if state
            .clients
            .iter()
            .any(|client| same_listener(client, &listener))
        {
            return true;
        }
        state.clients.push(listener);

        if state.clients.len() == 1 && state.reader.is_none() {
            let reader = tokio::spawn(receive_loop(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.transport),
            ));
            state.reader = Some(reader);
            debug!(device = %self.inner.id, "receive loop started");
        }
        true
    }

    /// Remove a client. Returns the number of clients left, or -1 if the
    /// listener was not registered.
    pub fn deregister_client(&self, listener: &Arc<dyn FrameListener>) -> isize {
        let mut state = self.inner.state();
        let Some(pos) = state
            .clients
            .iter()
            .position(|client| same_listener(client, listener))
        else {
            return -1;
        };
        state.clients.remove(pos);
        state.clients.len() as isize
    }

    /// Queue a command for `cid`.
    ///
    /// Ignored once the device is gone. While another channel holds the lock
    /// every command except SYNC is answered locally with a BUSY error frame
    /// and never reaches the transport. That BUSY frame is published to every
    /// client, so commands sent on a shared channel id (INIT on BROADCAST)
    /// should go through [`Device::queue_command_from`].
    pub fn queue_command(&self, cid: u32, cmd: u8, data: &[u8]) -> Result<()> {
        self.enqueue(None, cid, cmd, data)
    }

    /// Like [`Device::queue_command`], but a locally generated BUSY answer
    /// goes to `requester` alone.
    pub fn queue_command_from(
        &self,
        requester: &dyn FrameListener,
        cid: u32,
        cmd: u8,
        data: &[u8],
    ) -> Result<()> {
        self.enqueue(Some(requester), cid, cmd, data)
    }

    fn enqueue(
        &self,
        requester: Option<&dyn FrameListener>,
        cid: u32,
        cmd: u8,
        data: &[u8],
    ) -> Result<()> {
        let frames = fragment(cid, cmd, data)?;

        let mut state = self.inner.state();
        if state.closed {
            debug!(
                device = %self.inner.id,
                cid = %format_args!("{cid:08x}"),
                command = command_name(cmd),
                "device gone, command dropped"
            );
            return Ok(());
        }

        expire_lock(&mut state);
        let holder = state.lock.as_ref().map(|lock| lock.cid);
        if let Some(holder) = holder {
            if holder != cid && cmd != CMD_SYNC {
                drop(state);
                debug!(
                    device = %self.inner.id,
                    cid = %format_args!("{cid:08x}"),
                    holder = %format_args!("{holder:08x}"),
                    "device locked, answering busy"
                );
                let busy = Frame::error(cid, Status::Busy.code() as u8);
                match requester {
                    Some(requester) => {
                        requester.received_frame(&busy);
                    }
                    None => {
                        self.publish_frame(&busy);
                    }
                }
                return Ok(());
            }
        }

        self.update_lock(&mut state, cid, cmd, data);
        state.txqueue.extend(frames);
        drop(state);

        self.inner.wake.notify_one();
        Ok(())
    }

    fn update_lock(&self, state: &mut DeviceState, cid: u32, cmd: u8, data: &[u8]) {
        if cmd == CMD_LOCK {
            let seconds = data.first().copied().unwrap_or(0);
            if seconds == 0 {
                if state.lock.take().is_some() {
                    debug!(
                        device = %self.inner.id,
                        cid = %format_args!("{cid:08x}"),
                        "lock released"
                    );
                }
                return;
            }
            let duration = Duration::from_secs(u64::from(seconds)) + LOCK_SLACK;
            state.lock = Some(LockState {
                cid,
                duration,
                timer: self.lock_timer(cid, duration),
            });
            debug!(
                device = %self.inner.id,
                cid = %format_args!("{cid:08x}"),
                seconds,
                "lock granted"
            );
            return;
        }

        let rearm = match state.lock.as_ref() {
            Some(lock) if lock.cid == cid => Some(lock.duration),
            _ => None,
        };
        if let (Some(duration), Some(lock)) = (rearm, state.lock.as_mut()) {
            lock.timer = self.lock_timer(cid, duration);
        }
    }

    fn lock_timer(&self, cid: u32, duration: Duration) -> CountdownTimer {
        let weak = Arc::downgrade(&self.inner);
        CountdownTimer::with_callback(duration, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state();
            if state.lock.as_ref().is_some_and(|lock| lock.cid == cid) {
                warn!(
                    device = %inner.id,
                    cid = %format_args!("{cid:08x}"),
                    "lock expired"
                );
                state.lock = None;
            }
        })
    }

    /// Offer a frame to every client. Closed clients are dropped. Returns the
    /// number of clients left.
    pub fn publish_frame(&self, frame: &Frame) -> usize {
        let clients = self.inner.state().clients.clone();

        let closed: Vec<_> = clients
            .iter()
            .filter(|client| !client.received_frame(frame))
            .collect();

        let mut state = self.inner.state();
        if !closed.is_empty() {
            state
                .clients
                .retain(|client| !closed.iter().any(|gone| same_listener(gone, client)));
            debug!(
                device = %self.inner.id,
                dropped = closed.len(),
                "dropped closed clients"
            );
        }
        state.clients.len()
    }

    /// Tear the device down. Every client sees a GONE error frame and is
    /// marked closed; the transport is released. Idempotent.
    pub fn destroy(&self) {
        let (clients, tasks) = {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.txqueue.clear();
            state.lock = None;
            (
                std::mem::take(&mut state.clients),
                [state.writer.take(), state.reader.take()],
            )
        };

        let gone = Frame::error(CID_NOTIFICATION, Status::Gone.code() as u8);
        for client in &clients {
            client.received_frame(&gone);
            client.mark_closed();
        }

        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        self.inner.transport.close();
        info!(
            device = %self.inner.id,
            clients = clients.len(),
            "device destroyed"
        );
    }
}

/// Non-owning handle to a [`Device`].
#[derive(Clone, Default)]
pub struct WeakDevice {
    inner: Weak<DeviceInner>,
}

impl WeakDevice {
    pub fn upgrade(&self) -> Option<Device> {
        self.inner.upgrade().map(|inner| Device { inner })
    }
}

impl fmt::Debug for WeakDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDevice")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("transport", &self.transport_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn FrameListener>, b: &Arc<dyn FrameListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn expire_lock(state: &mut DeviceState) {
    if state.lock.as_ref().is_some_and(|lock| lock.timer.expired()) {
        state.lock = None;
    }
}

async fn write_pump(weak: Weak<DeviceInner>, transport: Arc<dyn Transport>, wake: Arc<Notify>) {
    loop {
        let (id, next) = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let state = inner.state();
            if state.closed {
                return;
            }
            let next = state.txqueue.front().copied();
            (inner.id.clone(), next)
        };

        let Some(frame) = next else {
            wake.notified().await;
            continue;
        };

        trace!(device = %id, "> {}", hex(frame.as_report()));
        if let Err(err) = transport.send(frame.as_report()).await {
            if let Some(inner) = weak.upgrade() {
                warn!(device = %id, error = %err, "send failed");
                Device { inner }.destroy();
            }
            return;
        }

        match weak.upgrade() {
            Some(inner) => {
                inner.state().txqueue.pop_front();
            }
            None => return,
        }
    }
}

async fn receive_loop(weak: Weak<DeviceInner>, transport: Arc<dyn Transport>) {
    loop {
        let result = transport.receive().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let device = Device { inner };

        match result {
            Ok(report) => {
                trace!(device = %device.id(), "< {}", hex(&report));
                if device.publish_frame(&Frame::from_report(report)) == 0 {
                    debug!(device = %device.id(), "no clients left");
                    device.destroy();
                    return;
                }
            }
            Err(err) => {
                if !device.is_closed() {
                    warn!(device = %device.id(), error = %err, "receive failed");
                    device.destroy();
                }
                return;
            }
        }
    }
}
