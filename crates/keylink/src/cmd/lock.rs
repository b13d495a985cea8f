use crate::cmd::session::Session;
use crate::cmd::{LinkOptions, LockArgs, UnlockArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run_lock(args: LockArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let session = Session::new(options)?;
    let seconds = args.seconds;
    let outcome = session.run("lock failed", |channel| async move {
        channel.lock(seconds).await
    })?;

    let out = ReplyOutput::new(
        "lock",
        outcome.device,
        outcome.cid,
        &outcome.value,
        outcome.elapsed,
    );
    print_reply(&out, format);
    Ok(SUCCESS)
}

pub fn run_unlock(_args: UnlockArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let session = Session::new(options)?;
    let outcome = session.run("unlock failed", |channel| async move { channel.unlock().await })?;

    let out = ReplyOutput::new(
        "unlock",
        outcome.device,
        outcome.cid,
        &outcome.value,
        outcome.elapsed,
    );
    print_reply(&out, format);
    Ok(SUCCESS)
}
