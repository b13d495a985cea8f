#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keylink_channel::{Channel, ChannelConfig};
use keylink_frame::{
    fragment, Frame, Reassembly, Status, CID_BROADCAST, CMD_APDU, CMD_INIT, CMD_PING, CMD_SYNC,
};
use keylink_mux::Registry;
use keylink_transport::{
    Backend, DeviceId, Report, Transport, TransportError, TransportFuture,
};
use tokio::sync::mpsc;

pub const ASSIGNED_CID: u32 = 0xc0ff_ee01;

/// How the simulated key answers.
#[derive(Clone)]
pub struct Behavior {
    pub init_supported: bool,
    pub echo_sync: bool,
    pub silent: bool,
    pub always_busy: bool,
    pub busy_answers: usize,
    pub apdu_reply: Vec<u8>,
    pub reply_delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            init_supported: true,
            echo_sync: true,
            silent: false,
            always_busy: false,
            busy_answers: 0,
            apdu_reply: vec![0x90, 0x00],
            reply_delay: Duration::ZERO,
        }
    }
}

/// A request the key fully received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cid: u32,
    pub cmd: u8,
    pub data: Vec<u8>,
}

struct SimState {
    behavior: Behavior,
    partial: HashMap<u32, (u8, Reassembly)>,
    requests: Vec<Request>,
    next_cid: u32,
}

/// In-memory security key speaking the link protocol.
pub struct SimKey {
    state: Mutex<SimState>,
    out_tx: mpsc::UnboundedSender<Result<Report, TransportError>>,
    out_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Report, TransportError>>>,
    pub closes: AtomicUsize,
}

impl SimKey {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Mutex::new(SimState {
                behavior,
                partial: HashMap::new(),
                requests: Vec::new(),
                next_cid: ASSIGNED_CID,
            }),
            out_tx,
            out_rx: tokio::sync::Mutex::new(out_rx),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_for(&self, cmd: u8) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.cmd == cmd)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    /// Push a raw frame towards the host.
    pub fn inject(&self, frame: Frame) {
        let _ = self.out_tx.send(Ok(frame.into_report()));
    }

    /// Make the next host read fail, as if the key was pulled.
    pub fn unplug(&self) {
        let _ = self
            .out_tx
            .send(Err(TransportError::Transfer("unplugged".into())));
    }

    fn handle(&self, frame: Frame) {
        let mut state = self.state.lock().unwrap();
        let cid = frame.cid();

        let complete = if frame.is_init() {
            let msg = Reassembly::start(&frame).unwrap();
            if msg.is_complete() {
                Some((frame.command(), msg.finish().to_vec()))
            } else {
                state.partial.insert(cid, (frame.command(), msg));
                None
            }
        } else {
            let Some((cmd, mut msg)) = state.partial.remove(&cid) else {
                return;
            };
            msg.push(&frame).unwrap();
            if msg.is_complete() {
                Some((cmd, msg.finish().to_vec()))
            } else {
                state.partial.insert(cid, (cmd, msg));
                None
            }
        };
        let Some((cmd, data)) = complete else {
            return;
        };

        state.requests.push(Request {
            cid,
            cmd,
            data: data.clone(),
        });

        let behavior = state.behavior.clone();
        if behavior.silent {
            return;
        }

        let reply = if behavior.always_busy {
            vec![Frame::error(cid, Status::Busy.code() as u8)]
        } else if state.behavior.busy_answers > 0 {
            state.behavior.busy_answers -= 1;
            vec![Frame::error(cid, Status::Busy.code() as u8)]
        } else {
            match cmd {
                CMD_INIT if behavior.init_supported => {
                    let mut payload = data.clone();
                    payload.extend_from_slice(&state.next_cid.to_be_bytes());
                    state.next_cid += 1;
                    fragment(CID_BROADCAST, CMD_INIT, &payload).unwrap()
                }
                CMD_INIT => vec![Frame::error(
                    CID_BROADCAST,
                    Status::InvalidCommand.code() as u8,
                )],
                CMD_SYNC if behavior.echo_sync => fragment(cid, CMD_SYNC, &data).unwrap(),
                CMD_SYNC => fragment(cid, CMD_SYNC, &[]).unwrap(),
                CMD_PING => fragment(cid, CMD_PING, &data).unwrap(),
                CMD_APDU => fragment(cid, CMD_APDU, &behavior.apdu_reply).unwrap(),
                other => fragment(cid, other, &[]).unwrap(),
            }
        };
        drop(state);

        if behavior.reply_delay.is_zero() {
            for frame in reply {
                self.inject(frame);
            }
        } else {
            let tx = self.out_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(behavior.reply_delay).await;
                for frame in reply {
                    let _ = tx.send(Ok(frame.into_report()));
                }
            });
        }
    }
}

impl Transport for SimKey {
    fn send<'a>(&'a self, report: &'a Report) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.handle(Frame::from_report(*report));
            Ok(())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Report> {
        Box::pin(async move {
            let mut rx = self.out_rx.lock().await;
            rx.recv().await.unwrap_or(Err(TransportError::Closed))
        })
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn transport_name(&self) -> &'static str {
        "sim"
    }
}

/// Backend serving a fixed set of simulated keys. Each open hands out the
/// same key object.
pub struct SimBackend {
    keys: Vec<Arc<SimKey>>,
}

impl Backend for SimBackend {
    fn namespace(&self) -> &'static str {
        "sim"
    }

    fn enumerate(&self) -> keylink_transport::Result<Vec<DeviceId>> {
        Ok((0..self.keys.len() as u32)
            .map(|index| DeviceId::new("sim", index))
            .collect())
    }

    fn open(&self, id: &DeviceId) -> keylink_transport::Result<Arc<dyn Transport>> {
        let key = self
            .keys
            .get(id.index as usize)
            .ok_or(TransportError::NoDevice)?;
        Ok(Arc::clone(key) as Arc<dyn Transport>)
    }
}

pub fn registry_with(keys: Vec<Arc<SimKey>>) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry.register_backend(Arc::new(SimBackend { keys }));
    registry
}

/// A registry with one simulated key.
pub fn single_key(behavior: Behavior) -> (Arc<Registry>, Arc<SimKey>) {
    let key = SimKey::new(behavior);
    (registry_with(vec![Arc::clone(&key)]), key)
}

pub fn open_channel(registry: &Arc<Registry>) -> Channel {
    Channel::connect(Arc::clone(registry), None, ChannelConfig::default()).unwrap()
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
