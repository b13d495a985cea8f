use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("keylink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: keylink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "backends: usb={}, hid={}",
        cfg!(feature = "usb"),
        cfg!(feature = "hid")
    );
    println!(
        "report_size: {}, max_message: {}",
        keylink_transport::REPORT_SIZE,
        keylink_frame::MAX_MESSAGE_SIZE
    );

    Ok(SUCCESS)
}
