use crate::cmd::session::Session;
use crate::cmd::{ApduArgs, LinkOptions};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(args: ApduArgs, format: OutputFormat, options: &LinkOptions) -> CliResult<i32> {
    let request = parse_hex(&args.hex)?;
    let no_wink = args.no_wink;

    let session = Session::new(options)?;
    let outcome = session.run("apdu failed", |channel| async move {
        channel.apdu_reply(&request, no_wink).await
    })?;

    let out = ReplyOutput::new(
        "apdu",
        outcome.device,
        outcome.cid,
        &outcome.value,
        outcome.elapsed,
    );
    print_reply(&out, format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.is_empty() {
        return Err(CliError::new(USAGE, "apdu must not be empty"));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "apdu hex has an odd number of digits"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).unwrap_or("");
            u8::from_str_radix(text, 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex byte '{text}'")))
        })
        .collect()
}
