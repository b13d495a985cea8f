use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hidapi::{HidApi, HidDevice};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::permits::PermittedDevices;
use crate::traits::{pad_report, Backend, DeviceId, Report, Transport, TransportFuture, REPORT_SIZE};

/// Poll interval of the blocking reader. Writes wait at most this long for
/// the device handle.
const READ_POLL_MS: i32 = 50;

/// HID report binding.
///
/// hidapi is blocking, so every call runs on tokio's blocking pool. Reads
/// poll with a short timeout and release the handle between polls so the
/// write pump can interleave.
pub struct HidTransport {
    device: Arc<Mutex<Option<HidDevice>>>,
    closed: Arc<AtomicBool>,
    id: DeviceId,
}

impl HidTransport {
    pub const NAMESPACE: &'static str = "hid";
}

fn join_error(err: tokio::task::JoinError) -> TransportError {
    TransportError::Transfer(format!("hid worker failed: {err}"))
}

impl Transport for HidTransport {
    fn send<'a>(&'a self, report: &'a Report) -> TransportFuture<'a, ()> {
        let device = Arc::clone(&self.device);
        // Report id 0 prefix.
        let mut out = Vec::with_capacity(REPORT_SIZE + 1);
        out.push(0);
        out.extend_from_slice(report);

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let guard = device.lock().unwrap_or_else(PoisonError::into_inner);
                let device = guard.as_ref().ok_or(TransportError::Closed)?;
                device.write(&out)?;
                Ok(())
            })
            .await
            .map_err(join_error)?
        })
    }

    fn receive(&self) -> TransportFuture<'_, Report> {
        Box::pin(async move {
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(TransportError::Closed);
                }
                let device = Arc::clone(&self.device);
                let read = tokio::task::spawn_blocking(move || {
                    let guard = device.lock().unwrap_or_else(PoisonError::into_inner);
                    let device = guard.as_ref().ok_or(TransportError::Closed)?;
                    let mut buf = [0u8; REPORT_SIZE];
                    let n = device.read_timeout(&mut buf, READ_POLL_MS)?;
                    Ok::<_, TransportError>((buf, n))
                })
                .await
                .map_err(join_error)??;

                match read {
                    (_, 0) => continue,
                    (buf, n) => return pad_report(&buf[..n]),
                }
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!(device = %self.id, "hid device closed");
        }
    }

    fn transport_name(&self) -> &'static str {
        "hid-report"
    }
}

/// Device indices keyed by OS path.
///
/// The table only grows: a path keeps its index across enumerations and an
/// unplugged key's index is never handed to another one.
#[derive(Debug, Default)]
struct PathIndex {
    by_path: HashMap<CString, u32>,
    present: HashSet<u32>,
    next: u32,
}

impl PathIndex {
    /// Start a new enumeration pass.
    fn begin(&mut self) {
        self.present.clear();
    }

    /// Index for `path`, assigning the next free one on first sight.
    fn index_of(&mut self, path: &CStr) -> u32 {
        let index = match self.by_path.get(path) {
            Some(&index) => index,
            None => {
                let index = self.next;
                self.next += 1;
                self.by_path.insert(path.to_owned(), index);
                index
            }
        };
        self.present.insert(index);
        index
    }

    /// Path of a device seen in the latest enumeration.
    fn path_of(&self, index: u32) -> Option<&CStr> {
        if !self.present.contains(&index) {
            return None;
        }
        self.by_path
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(path, _)| path.as_c_str())
    }
}

/// Enumerates and opens permitted HID keys.
pub struct HidBackend {
    api: Mutex<HidApi>,
    permits: PermittedDevices,
    paths: Mutex<PathIndex>,
}

impl HidBackend {
    pub fn new(permits: PermittedDevices) -> Result<Self> {
        Ok(Self {
            api: Mutex::new(HidApi::new()?),
            permits,
            paths: Mutex::new(PathIndex::default()),
        })
    }
}

impl Backend for HidBackend {
    fn namespace(&self) -> &'static str {
        HidTransport::NAMESPACE
    }

    fn enumerate(&self) -> Result<Vec<DeviceId>> {
        let mut api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        api.refresh_devices()?;

        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        paths.begin();
        let mut ids: Vec<DeviceId> = api
            .device_list()
            .filter(|info| self.permits.permits(info.vendor_id(), info.product_id()))
            .map(|info| DeviceId::new(HidTransport::NAMESPACE, paths.index_of(info.path())))
            .collect();
        ids.sort_by_key(|id| id.index);
        ids.dedup();
        debug!(count = ids.len(), "enumerated hid devices");
        Ok(ids)
    }

    fn open(&self, id: &DeviceId) -> Result<Arc<dyn Transport>> {
        let path = self
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path_of(id.index)
            .map(CStr::to_owned)
            .ok_or(TransportError::NoDevice)?;

        let api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        let device = api.open_path(&path).map_err(|err| {
            warn!(device = %id, error = %err, "failed to connect device, permissions issue?");
            TransportError::NoDevice
        })?;

        info!(device = %id, "opened hid device");

        Ok(Arc::new(HidTransport {
            device: Arc::new(Mutex::new(Some(device))),
            closed: Arc::new(AtomicBool::new(false)),
            id: id.clone(),
        }))
    }
}
