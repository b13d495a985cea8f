use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, TransportError};

/// Size of every report exchanged with a device.
pub const REPORT_SIZE: usize = 64;

/// One raw report as it travels over the wire.
pub type Report = [u8; REPORT_SIZE];

/// Boxed future returned by [`Transport`] operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Identifies one physical device within a backend namespace.
///
/// The namespace selects the binding (`"usb"` or `"hid"`); the index is the
/// backend's own device number and also seeds default channel ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId {
    pub namespace: &'static str,
    pub index: u32,
}

impl DeviceId {
    pub fn new(namespace: &'static str, index: u32) -> Self {
        Self { namespace, index }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.index)
    }
}

/// A connected device handle that moves whole reports.
///
/// Implementations must be usable from several tasks at once: the device
/// multiplexer keeps one receive outstanding while its write pump sends.
pub trait Transport: Send + Sync {
    /// Send one report. Resolves once the OS accepted the transfer.
    fn send<'a>(&'a self, report: &'a Report) -> TransportFuture<'a, ()>;

    /// Receive the next report from the device.
    fn receive(&self) -> TransportFuture<'_, Report>;

    /// Release the underlying handle. Further operations fail with
    /// [`TransportError::Closed`].
    fn close(&self);

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Enumerates and opens the devices of one namespace.
pub trait Backend: Send + Sync {
    /// Namespace this backend serves, e.g. `"usb"`.
    fn namespace(&self) -> &'static str;

    /// List permitted devices currently visible to the OS.
    fn enumerate(&self) -> Result<Vec<DeviceId>>;

    /// Open a device previously returned by [`Backend::enumerate`].
    fn open(&self, id: &DeviceId) -> Result<Arc<dyn Transport>>;
}

/// Copy a short read into a zero-padded report.
pub fn pad_report(data: &[u8]) -> Result<Report> {
    if data.len() > REPORT_SIZE {
        return Err(TransportError::ReportTooLong {
            len: data.len(),
            max: REPORT_SIZE,
        });
    }
    let mut report = [0u8; REPORT_SIZE];
    report[..data.len()].copy_from_slice(data);
    Ok(report)
}
