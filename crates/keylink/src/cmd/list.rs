use keylink_channel::ChannelError;

use crate::cmd::session::build_registry;
use crate::cmd::{LinkOptions, ListArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_devices, DeviceRow, OutputFormat};

pub fn run(_args: ListArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let registry = build_registry(options)?;
    let ids = registry
        .enumerate()
        .map_err(|err| channel_error("enumeration failed", ChannelError::from(err)))?;
    let open = registry.open_devices();

    let rows: Vec<DeviceRow> = ids
        .into_iter()
        .map(|id| DeviceRow {
            id: id.to_string(),
            namespace: id.namespace,
            index: id.index,
            open: open.contains(&id),
        })
        .collect();

    print_devices(&rows, format);
    Ok(SUCCESS)
}
