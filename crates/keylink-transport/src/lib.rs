//! Report-level transport abstraction for security keys.
//!
//! Every device speaks in fixed 64-byte reports. This crate provides:
//! - the [`Transport`] trait implemented by each binding
//! - the [`Backend`] trait used to enumerate and open devices of one namespace
//! - the permitted-device list that scopes enumeration
//!
//! Two bindings ship behind features: USB bulk endpoints (`usb`, via `nusb`)
//! and HID reports (`hid`, via `hidapi`).
//!
//! This is the lowest layer of keylink. Everything else builds on the
//! [`Report`] type and the traits defined here.

pub mod error;
pub mod permits;
pub mod traits;

#[cfg(feature = "hid")]
pub mod hid;
#[cfg(feature = "usb")]
pub mod usb;

pub use error::{Result, TransportError};
pub use permits::{PermittedDevices, UsbDeviceSpec};
pub use traits::{pad_report, Backend, DeviceId, Report, Transport, TransportFuture, REPORT_SIZE};

#[cfg(feature = "hid")]
pub use hid::{HidBackend, HidTransport};
#[cfg(feature = "usb")]
pub use usb::{UsbBackend, UsbTransport};
