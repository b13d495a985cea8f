use crate::cmd::session::Session;
use crate::cmd::{LinkOptions, WinkArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(_args: WinkArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let session = Session::new(options)?;
    let outcome = session.run("wink failed", |channel| async move { channel.wink().await })?;

    let out = ReplyOutput::new(
        "wink",
        outcome.device,
        outcome.cid,
        &outcome.value,
        outcome.elapsed,
    );
    print_reply(&out, format);
    Ok(SUCCESS)
}
