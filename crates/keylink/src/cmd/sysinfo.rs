use crate::cmd::session::Session;
use crate::cmd::{LinkOptions, SysinfoArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(_args: SysinfoArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let session = Session::new(options)?;
    let outcome = session.run("sysinfo failed", |channel| async move {
        channel.sysinfo().await
    })?;

    let out = ReplyOutput::new(
        "sysinfo",
        outcome.device,
        outcome.cid,
        &outcome.value,
        outcome.elapsed,
    );
    print_reply(&out, format);
    Ok(SUCCESS)
}
