use keylink_frame::MAX_MESSAGE_SIZE;

use crate::cmd::session::Session;
use crate::cmd::{LinkOptions, PingArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(args: PingArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    if args.size > MAX_MESSAGE_SIZE {
        return Err(CliError::new(
            USAGE,
            format!("ping size must be at most {MAX_MESSAGE_SIZE} bytes"),
        ));
    }

    let session = Session::new(options)?;
    let size = args.size;
    let count = args.count.max(1);
    let outcome = session.run("ping failed", |channel| async move {
        let mut replies = Vec::with_capacity(count as usize);
        for _ in 0..count {
            replies.push(channel.ping_random(size).await?);
        }
        Ok(replies)
    })?;

    let per_ping = outcome.elapsed / count;
    for reply in &outcome.value {
        if reply.len() != size {
            return Err(CliError::new(
                DATA_INVALID,
                format!("echo size mismatch: sent {size}, got {}", reply.len()),
            ));
        }
        let out = ReplyOutput::new("ping", outcome.device.clone(), outcome.cid, reply, per_ping);
        print_reply(&out, format);
    }
    Ok(SUCCESS)
}
