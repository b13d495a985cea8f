#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keylink_frame::Frame;
use keylink_mux::FrameListener;
use keylink_transport::{
    Backend, DeviceId, Report, Transport, TransportError, TransportFuture,
};
use tokio::sync::mpsc;

/// Transport double: records outbound reports, replays injected inbound ones.
pub struct MockTransport {
    sent: Mutex<Vec<Frame>>,
    inbound_tx: mpsc::UnboundedSender<Result<Report, TransportError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Report, TransportError>>>,
    pub fail_sends: AtomicBool,
    pub closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            fail_sends: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn inject(&self, frame: Frame) {
        let _ = self.inbound_tx.send(Ok(frame.into_report()));
    }

    pub fn inject_error(&self) {
        let _ = self
            .inbound_tx
            .send(Err(TransportError::Transfer("unplugged".into())));
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    /// Let the device pumps run until `n` frames were sent.
    pub async fn wait_sent(&self, n: usize) {
        for _ in 0..1000 {
            if self.sent.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {n} frames, got {}", self.sent().len());
    }
}

impl Transport for MockTransport {
    fn send<'a>(&'a self, report: &'a Report) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Transfer("stalled".into()));
            }
            self.sent.lock().unwrap().push(Frame::from_report(*report));
            Ok(())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Report> {
        Box::pin(async move {
            let mut rx = self.inbound_rx.lock().await;
            rx.recv().await.unwrap_or(Err(TransportError::Closed))
        })
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn transport_name(&self) -> &'static str {
        "mock"
    }
}

/// Backend double handing out [`MockTransport`]s.
pub struct MockBackend {
    pub namespace: &'static str,
    pub devices: Vec<u32>,
    pub fail_enumerate: bool,
    pub opened: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockBackend {
    pub fn new(namespace: &'static str, devices: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            devices,
            fail_enumerate: false,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(namespace: &'static str) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            devices: Vec::new(),
            fail_enumerate: true,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn last_opened(&self) -> Arc<MockTransport> {
        self.opened.lock().unwrap().last().cloned().unwrap()
    }
}

impl Backend for MockBackend {
    fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn enumerate(&self) -> keylink_transport::Result<Vec<DeviceId>> {
        if self.fail_enumerate {
            return Err(TransportError::NoPermission);
        }
        Ok(self
            .devices
            .iter()
            .map(|index| DeviceId::new(self.namespace, *index))
            .collect())
    }

    fn open(&self, id: &DeviceId) -> keylink_transport::Result<Arc<dyn Transport>> {
        if !self.devices.contains(&id.index) {
            return Err(TransportError::NoDevice);
        }
        let transport = MockTransport::new();
        self.opened.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Listener that keeps every frame addressed to it.
pub struct RecordingListener {
    cid: u32,
    closed: AtomicBool,
    frames: Mutex<Vec<Frame>>,
}

impl RecordingListener {
    pub fn new(cid: u32) -> Arc<Self> {
        Arc::new(Self {
            cid,
            closed: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn FrameListener> {
        Arc::clone(self) as Arc<dyn FrameListener>
    }
}

impl FrameListener for RecordingListener {
    fn cid(&self) -> u32 {
        self.cid
    }

    fn received_frame(&self, frame: &Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        if frame.matches_cid(self.cid) {
            self.frames.lock().unwrap().push(*frame);
        }
        true
    }

    fn mark_closed(&self) {
        self.close();
    }
}

/// Yield long enough for spawned pump tasks to drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
