use crate::traits::DeviceId;

/// Host-local status: no such device.
pub const NODEVICE: u16 = 512;
/// Host-local status: permission denied.
pub const NOPERMISSION: u16 = 666;
/// Link status reported when a device is claimed by someone else.
const BUSY: u16 = 6;
/// Link status reported when a device disappeared.
const GONE: u16 = 8;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested device is not (or no longer) attached.
    #[error("no such device")]
    NoDevice,

    /// The OS refused access to the device.
    #[error("permission denied")]
    NoPermission,

    /// The device interface is claimed by another process.
    #[error("device busy (interface already claimed)")]
    Busy,

    /// The device lacks a bulk IN or bulk OUT endpoint.
    #[error("device {0} lacks a bulk endpoint")]
    MissingEndpoint(DeviceId),

    /// No backend is registered for the namespace.
    #[error("unknown device namespace '{0}'")]
    UnknownNamespace(String),

    /// Failed to open the device.
    #[error("failed to open {device}: {source}")]
    Open {
        device: DeviceId,
        source: std::io::Error,
    },

    /// An I/O error occurred on the device handle.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A USB transfer failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The device returned more than one report worth of data.
    #[error("report too long ({len} bytes, max {max})")]
    ReportTooLong { len: usize, max: usize },

    /// The permitted-device list could not be parsed.
    #[error("invalid permitted-device list: {0}")]
    Permits(#[from] serde_json::Error),

    /// HID layer error.
    #[cfg(feature = "hid")]
    #[error("hid error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Status code surfaced to channel callers when this error ends an operation.
    pub fn status_code(&self) -> u16 {
        match self {
            TransportError::NoDevice
            | TransportError::MissingEndpoint(_)
            | TransportError::UnknownNamespace(_) => NODEVICE,
            TransportError::NoPermission => NOPERMISSION,
            TransportError::Open { source, .. } | TransportError::Io(source)
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                NOPERMISSION
            }
            TransportError::Open { .. } => NODEVICE,
            TransportError::Busy => BUSY,
            _ => GONE,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
