use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keylink_transport::{Backend, DeviceId, TransportError};
use tracing::{debug, info, warn};

use crate::device::{Device, FrameListener};
use crate::error::{MuxError, Result};

/// Owns the set of open devices and the backends that produce them.
///
/// A registry is created by the application and shared with every channel
/// it opens. Devices are opened on first use and destroyed when their last
/// client leaves.
#[derive(Default)]
pub struct Registry {
    backends: Mutex<Vec<Arc<dyn Backend>>>,
    devices: Mutex<HashMap<DeviceId, Device>>,
    instances: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceId, Device>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backends(&self) -> MutexGuard<'_, Vec<Arc<dyn Backend>>> {
        self.backends.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a backend. A backend registered for an existing namespace
    /// replaces the previous one.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) {
        let mut backends = self.backends();
        let namespace = backend.namespace();
        match backends.iter().position(|b| b.namespace() == namespace) {
            Some(pos) => backends[pos] = backend,
            None => backends.push(backend),
        }
        debug!(namespace, "backend registered");
    }

    pub fn backend(&self, namespace: &str) -> Option<Arc<dyn Backend>> {
        self.backends()
            .iter()
            .find(|b| b.namespace() == namespace)
            .cloned()
    }

    /// Devices visible through every backend, in registration order.
    ///
    /// A failing backend is skipped as long as another one produced
    /// devices.
    pub fn enumerate(&self) -> Result<Vec<DeviceId>> {
        let backends = self.backends().clone();
        let mut ids = Vec::new();
        let mut first_error = None;

        for backend in backends {
            match backend.enumerate() {
                Ok(found) => ids.extend(found),
                Err(err) => {
                    warn!(namespace = backend.namespace(), error = %err, "enumeration failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if ids.is_empty() => Err(err.into()),
            _ => Ok(ids),
        }
    }

    /// Attach `listener` to the device `id`, opening it if necessary.
    pub fn add_client(&self, id: &DeviceId, listener: Arc<dyn FrameListener>) -> Result<Device> {
        let mut devices = self.devices();

        if devices.get(id).is_some_and(Device::is_closed) {
            debug!(device = %id, "evicting closed device");
            devices.remove(id);
        }

        let device = match devices.get(id) {
            Some(device) => device.clone(),
            None => {
                let backend = self
                    .backend(id.namespace)
                    .ok_or_else(|| TransportError::UnknownNamespace(id.namespace.to_string()))?;
                let transport = backend.open(id)?;
                let device = Device::new(id.clone(), transport);
                devices.insert(id.clone(), device.clone());
                info!(device = %id, transport = device.transport_name(), "device opened");
                device
            }
        };

        if !device.register_client(listener) {
            devices.remove(id);
            return Err(MuxError::Closed(id.clone()));
        }
        Ok(device)
    }

    /// Detach `listener` from `device`. The device is destroyed once its last
    /// client is gone.
    pub fn remove_client(&self, device: &Device, listener: &Arc<dyn FrameListener>) {
        let mut devices = self.devices();

        // A closed listener may already have been dropped by the receive loop.
        device.deregister_client(listener);
        if device.client_count() > 0 {
            return;
        }

        if devices
            .get(device.id())
            .is_some_and(|open| open.ptr_eq(device))
        {
            devices.remove(device.id());
        }
        drop(devices);

        debug!(device = %device.id(), "last client removed");
        device.destroy();
    }

    /// Next per-registry instance number, used to seed default channel ids.
    pub fn next_instance(&self) -> u32 {
        self.instances.fetch_add(1, Ordering::Relaxed)
    }

    /// Ids of devices currently open.
    pub fn open_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self
            .devices()
            .iter()
            .filter(|(_, device)| !device.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Destroy every open device.
    pub fn close_all(&self) {
        let devices: Vec<Device> = self.devices().drain().map(|(_, device)| device).collect();
        for device in devices {
            device.destroy();
        }
    }
}
