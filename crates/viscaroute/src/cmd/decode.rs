use tracing::warn;
use viscaroute_frame::ReassemblyBuffer;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut bytes = Vec::new();
    for chunk in &args.hex {
        bytes.extend(parse_hex(chunk)?);
    }

    let mut buffer = ReassemblyBuffer::new();
    buffer
        .append(&bytes)
        .map_err(|err| frame_error("input too large", err))?;

    let mut decoded = 0usize;
    let mut invalid = 0usize;
    for frame in buffer.drain_frames() {
        if let Err(err) = frame.validate() {
            warn!(frame = %frame, error = %err, "invalid frame");
            invalid += 1;
            continue;
        }
        print_frame(&frame, "input", format);
        decoded += 1;
    }

    if !buffer.is_empty() {
        warn!(pending = buffer.len(), "trailing bytes without terminator");
    }
    if decoded == 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("no valid frames in input ({invalid} invalid, {} trailing bytes)", buffer.len()),
        ));
    }
    Ok(SUCCESS)
}

/// Accepts `81 09 FF`, `8109FF`, `0x81,0x09,0xff` and mixes of those.
fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let mut digits = String::with_capacity(input.len());
    for token in input.split(|c: char| c.is_whitespace() || c == ',' || c == ':') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CliError::new(USAGE, format!("invalid hex byte in: {input}")));
        }
        if token.len() == 1 {
            digits.push('0');
        }
        digits.push_str(token);
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, format!("odd number of hex digits: {input}")));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex byte in: {input}")))
        })
        .collect()
}
