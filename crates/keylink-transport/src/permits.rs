use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// A USB vendor/product pair the host is allowed to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceSpec {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbDeviceSpec {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// Permitted devices, in the `{"usbDevices": [{"vendorId": .., "productId": ..}]}`
/// shape of an extension manifest permission entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermittedDevices {
    #[serde(rename = "usbDevices", default)]
    pub usb_devices: Vec<UsbDeviceSpec>,
}

impl PermittedDevices {
    /// Build a list from explicit specs.
    pub fn new(usb_devices: Vec<UsbDeviceSpec>) -> Self {
        Self { usb_devices }
    }

    /// Parse a permission document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a permission document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(TransportError::Io)?;
        tracing::debug!(?path, "loaded permitted device list");
        Self::from_json(&text)
    }

    /// Whether a device with these ids may be opened.
    pub fn permits(&self, vendor_id: u16, product_id: u16) -> bool {
        self.usb_devices
            .iter()
            .any(|spec| spec.vendor_id == vendor_id && spec.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.usb_devices.is_empty()
    }
}

impl Default for PermittedDevices {
    fn default() -> Self {
        Self::new(vec![
            // Yubico security key / gnubby firmware.
            UsbDeviceSpec::new(0x1050, 0x0120),
            UsbDeviceSpec::new(0x1050, 0x0211),
            // Google Titan.
            UsbDeviceSpec::new(0x18d1, 0x5026),
        ])
    }
}
