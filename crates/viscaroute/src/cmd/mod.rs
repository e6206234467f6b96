use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod client;
pub mod controller;
pub mod decode;
pub mod encode;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controller: one pty per endpoint, console on stdin.
    Controller(ControllerArgs),
    /// Attach to a controller's pty as the operator client.
    Client(ClientArgs),
    /// Reassemble a hex byte stream and describe each frame.
    Decode(DecodeArgs),
    /// Print the frame for a console command.
    Encode(EncodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Controller(args) => controller::run(args, format),
        Command::Client(args) => client::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// What sits on the device side of each camera pty.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CameraMode {
    /// Simulated camera answering like a device.
    Respond,
    /// Simulated camera echoing every frame.
    Echo,
    /// Nothing; real or external cameras attach to the printed paths.
    External,
}

#[derive(Args, Debug)]
pub struct ControllerArgs {
    /// Number of camera endpoints (addresses 1..=N).
    #[arg(
        long,
        default_value_t = 7,
        env = "VISCAROUTE_CAMERAS",
        value_parser = clap::value_parser!(u8).range(0..=7)
    )]
    pub cameras: u8,
    /// Device side of each camera pty.
    #[arg(long, value_enum, default_value = "respond", env = "VISCAROUTE_CAMERA_MODE")]
    pub camera_mode: CameraMode,
    /// Camera that controller traffic is routed to.
    #[arg(
        long,
        default_value_t = 1,
        env = "VISCAROUTE_TARGET",
        value_parser = clap::value_parser!(u8).range(1..=7)
    )]
    pub target: u8,
    /// Line speed for every pty.
    #[arg(long, default_value_t = 9600, env = "VISCAROUTE_BAUD")]
    pub baud: u32,
    /// Readiness wait per loop iteration (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", env = "VISCAROUTE_POLL_TIMEOUT")]
    pub poll_timeout: String,
    /// Bound on waiting for a destination to accept a frame.
    #[arg(long, default_value = "1s", env = "VISCAROUTE_WRITE_TIMEOUT")]
    pub write_timeout: String,
    /// Pause after a destination hangs up.
    #[arg(long, default_value = "100ms", env = "VISCAROUTE_HANGUP_BACKOFF")]
    pub hangup_backoff: String,
    /// Double the hangup pause on consecutive hangups, up to this bound.
    #[arg(long, value_name = "DURATION")]
    pub backoff_max: Option<String>,
    /// Do not read operator commands from stdin.
    #[arg(long)]
    pub no_console: bool,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Controller pty path printed by `viscaroute controller`.
    pub path: PathBuf,
    /// Line speed.
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    /// Camera address written into command headers.
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=8)
    )]
    pub address: u8,
    /// Readiness wait per loop iteration.
    #[arg(long, default_value = "1s")]
    pub poll_timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex bytes, e.g. "81 09 02 00 02 FF" or 81090200FF; chunks are
    /// concatenated in order.
    #[arg(required = true)]
    pub hex: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Console token (1-5) or command name (e.g. power-on).
    pub command: String,
    /// Receiver address (0 is sent as broadcast).
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=8)
    )]
    pub address: u8,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }
}
