use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keylink::{parse_device_id, system_registry, Channel, ChannelConfig, DeviceId, PermittedDevices};
use keylink_mux::Registry;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::cmd::LinkOptions;
use crate::exit::{channel_error, io_error, transport_error, CliError, CliResult, USAGE};

/// What a command produced, with the channel it ran on.
pub struct Outcome<T> {
    pub value: T,
    pub device: String,
    pub cid: u32,
    pub elapsed: Duration,
}

/// A registry plus the runtime its device pumps run on.
pub struct Session {
    registry: Arc<Registry>,
    runtime: Runtime,
    config: ChannelConfig,
    device: Option<DeviceId>,
}

impl Session {
    pub fn new(options: &LinkOptions) -> CliResult<Self> {
        let device = parse_device(options)?;
        let registry = build_registry(options)?;
        let config = options
            .busy_seconds
            .map_or_else(ChannelConfig::default, ChannelConfig::with_busy_seconds);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| io_error("runtime start failed", err))?;

        Ok(Self {
            registry,
            runtime,
            config,
            device,
        })
    }

    /// Open the selected key, negotiate a channel id and run `op` on the
    /// channel.
    pub fn run<T, F, Fut>(&self, context: &str, op: F) -> CliResult<Outcome<T>>
    where
        F: FnOnce(Arc<Channel>) -> Fut,
        Fut: Future<Output = keylink_channel::Result<T>>,
    {
        self.runtime.block_on(async {
            let channel = Channel::connect(
                Arc::clone(&self.registry),
                self.device.clone(),
                self.config.clone(),
            )
            .map(Arc::new)
            .map_err(|err| channel_error("open failed", err))?;

            channel
                .sync()
                .await
                .map_err(|err| channel_error("sync failed", err))?;

            let device = channel
                .device_id()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let cid = channel.cid();
            debug!(%device, cid = %format_args!("{cid:08x}"), "channel ready");

            let start = Instant::now();
            let result = op(Arc::clone(&channel)).await;
            let elapsed = start.elapsed();
            channel.close();

            let value = result.map_err(|err| channel_error(context, err))?;
            Ok::<_, CliError>(Outcome {
                value,
                device,
                cid,
                elapsed,
            })
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}

fn parse_device(options: &LinkOptions) -> CliResult<Option<DeviceId>> {
    options
        .device
        .as_deref()
        .map(|input| {
            parse_device_id(input).ok_or_else(|| {
                CliError::new(
                    USAGE,
                    format!("invalid device '{input}' (expected usb:N or hid:N)"),
                )
            })
        })
        .transpose()
}

/// Registry over the compiled-in backends, scoped by the permitted-device
/// list.
pub fn build_registry(options: &LinkOptions) -> CliResult<Arc<Registry>> {
    let permits = match &options.permits {
        Some(path) => PermittedDevices::from_file(path).map_err(|err| {
            CliError::new(
                crate::exit::DATA_INVALID,
                format!("cannot load permits from {}: {err}", path.display()),
            )
        })?,
        None => PermittedDevices::default(),
    };
    if permits.is_empty() {
        return Err(transport_error(
            "no permitted devices",
            keylink_transport::TransportError::NoDevice,
        ));
    }
    Ok(system_registry(&permits))
}
