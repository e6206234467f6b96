use viscaroute_frame::Command;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let command: Command = args
        .command
        .parse()
        .map_err(|err| frame_error("unknown command", err))?;
    let frame = command
        .encode(args.address)
        .map_err(|err| frame_error("encode failed", err))?;
    print_frame(&frame, command.name(), format);
    Ok(SUCCESS)
}
