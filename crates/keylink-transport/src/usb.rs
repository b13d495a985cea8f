use std::sync::{Arc, Mutex, PoisonError};

use nusb::transfer::{Direction, EndpointType, RequestBuffer};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::permits::PermittedDevices;
use crate::traits::{pad_report, Backend, DeviceId, Report, Transport, TransportFuture, REPORT_SIZE};

/// Interface claimed on every key.
const INTERFACE: u8 = 0;

/// USB bulk-transfer binding.
///
/// Reports travel on the first bulk OUT / bulk IN endpoint pair of the
/// device's active configuration.
pub struct UsbTransport {
    interface: Mutex<Option<nusb::Interface>>,
    in_endpoint: u8,
    out_endpoint: u8,
    id: DeviceId,
}

impl UsbTransport {
    pub const NAMESPACE: &'static str = "usb";

    fn interface(&self) -> Result<nusb::Interface> {
        self.interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)
    }
}

impl Transport for UsbTransport {
    fn send<'a>(&'a self, report: &'a Report) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let interface = self.interface()?;
            interface
                .bulk_out(self.out_endpoint, report.to_vec())
                .await
                .into_result()
                .map_err(|err| TransportError::Transfer(format!("bulk out: {err}")))?;
            Ok(())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Report> {
        Box::pin(async move {
            let interface = self.interface()?;
            let data = interface
                .bulk_in(self.in_endpoint, RequestBuffer::new(REPORT_SIZE))
                .await
                .into_result()
                .map_err(|err| TransportError::Transfer(format!("bulk in: {err}")))?;
            pad_report(&data)
        })
    }

    fn close(&self) {
        if self
            .interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!(device = %self.id, "usb interface released");
        }
    }

    fn transport_name(&self) -> &'static str {
        "usb-bulk"
    }
}

/// Enumerates and opens permitted USB keys.
pub struct UsbBackend {
    permits: PermittedDevices,
}

impl UsbBackend {
    pub fn new(permits: PermittedDevices) -> Self {
        Self { permits }
    }

    fn device_index(info: &nusb::DeviceInfo) -> u32 {
        (u32::from(info.bus_number()) << 8) | u32::from(info.device_address())
    }

    fn find(&self, id: &DeviceId) -> Result<nusb::DeviceInfo> {
        nusb::list_devices()?
            .filter(|info| self.permits.permits(info.vendor_id(), info.product_id()))
            .find(|info| Self::device_index(info) == id.index)
            .ok_or(TransportError::NoDevice)
    }
}

/// First bulk IN and bulk OUT endpoint addresses among `endpoints`.
fn bulk_pair(
    endpoints: impl IntoIterator<Item = (EndpointType, Direction, u8)>,
) -> (Option<u8>, Option<u8>) {
    let mut in_endpoint = None;
    let mut out_endpoint = None;
    for (transfer_type, direction, address) in endpoints {
        if transfer_type != EndpointType::Bulk {
            continue;
        }
        match direction {
            Direction::In if in_endpoint.is_none() => in_endpoint = Some(address),
            Direction::Out if out_endpoint.is_none() => out_endpoint = Some(address),
            _ => {}
        }
    }
    (in_endpoint, out_endpoint)
}

impl Backend for UsbBackend {
    fn namespace(&self) -> &'static str {
        UsbTransport::NAMESPACE
    }

    fn enumerate(&self) -> Result<Vec<DeviceId>> {
        let ids: Vec<DeviceId> = nusb::list_devices()?
            .filter(|info| self.permits.permits(info.vendor_id(), info.product_id()))
            .map(|info| DeviceId::new(UsbTransport::NAMESPACE, Self::device_index(&info)))
            .collect();
        debug!(count = ids.len(), "enumerated usb devices");
        Ok(ids)
    }

    fn open(&self, id: &DeviceId) -> Result<Arc<dyn Transport>> {
        let info = self.find(id)?;
        let device = info.open().map_err(|source| {
            warn!(device = %id, "failed to open device, permissions issue?");
            TransportError::Open {
                device: id.clone(),
                source,
            }
        })?;

        let config = device
            .active_configuration()
            .map_err(|err| TransportError::Transfer(format!("active configuration: {err}")))?;

        let descriptors = config
            .interface_alt_settings()
            .filter(|alt| alt.interface_number() == INTERFACE && alt.alternate_setting() == 0)
            .flat_map(|alt| {
                alt.endpoints()
                    .map(|endpoint| (endpoint.transfer_type(), endpoint.direction(), endpoint.address()))
                    .collect::<Vec<_>>()
            });
        let (in_endpoint, out_endpoint) = bulk_pair(descriptors);
        let (Some(in_endpoint), Some(out_endpoint)) = (in_endpoint, out_endpoint) else {
            warn!(device = %id, "device lacking an endpoint (broken?)");
            return Err(TransportError::MissingEndpoint(id.clone()));
        };

        let interface = device.claim_interface(INTERFACE).map_err(|err| {
            warn!(device = %id, error = %err, "failed to claim interface, busy?");
            TransportError::Busy
        })?;

        info!(
            device = %id,
            in_endpoint = format_args!("{in_endpoint:#04x}"),
            out_endpoint = format_args!("{out_endpoint:#04x}"),
            "opened usb device"
        );

        Ok(Arc::new(UsbTransport {
            interface: Mutex::new(Some(interface)),
            in_endpoint,
            out_endpoint,
            id: id.clone(),
        }))
    }
}
