//! Host-side link layer for USB security keys.
//!
//! keylink talks to security keys over 64-byte reports, shares each key
//! between many logical channels, and runs the key's command protocol on
//! top.
//!
//! # Crate Structure
//!
//! - [`transport`]: report-level transports and device backends (USB bulk
//!   behind `usb`, HID behind `hid`)
//! - [`frame`]: init/continuation framing, command and status codes
//! - [`mux`]: shared devices, channel locks and the device registry
//! - [`channel`]: logical channels with channel-id negotiation and commands

use std::sync::Arc;

/// Re-export transport types.
pub mod transport {
    pub use keylink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use keylink_frame::*;
}

/// Re-export device multiplexing types.
pub mod mux {
    pub use keylink_mux::*;
}

/// Re-export channel types.
pub mod channel {
    pub use keylink_channel::*;
}

pub use keylink_channel::{Channel, ChannelConfig, ChannelError};
pub use keylink_mux::Registry;
pub use keylink_transport::{DeviceId, PermittedDevices};

/// A registry with every backend compiled into this build.
///
/// Backends that cannot start on this host are skipped with a warning, so
/// the registry may end up with no backends at all.
pub fn system_registry(permits: &PermittedDevices) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());

    #[cfg(feature = "usb")]
    registry.register_backend(Arc::new(keylink_transport::UsbBackend::new(permits.clone())));

    #[cfg(feature = "hid")]
    match keylink_transport::HidBackend::new(permits.clone()) {
        Ok(backend) => registry.register_backend(Arc::new(backend)),
        Err(err) => tracing::warn!(error = %err, "hid backend unavailable"),
    }

    #[cfg(not(any(feature = "usb", feature = "hid")))]
    let _ = permits;

    registry
}

/// Resolve a backend namespace name to the one compiled in.
pub fn namespace(name: &str) -> Option<&'static str> {
    match name {
        #[cfg(feature = "usb")]
        "usb" => Some(keylink_transport::UsbTransport::NAMESPACE),
        #[cfg(feature = "hid")]
        "hid" => Some(keylink_transport::HidTransport::NAMESPACE),
        _ => None,
    }
}

/// Parse a `namespace:index` device id, e.g. `usb:259`.
pub fn parse_device_id(input: &str) -> Option<DeviceId> {
    let (name, index) = input.split_once(':')?;
    Some(DeviceId::new(namespace(name)?, index.parse().ok()?))
}
