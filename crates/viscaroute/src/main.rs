mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "viscaroute", version, about = "VISCA camera-control router")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "VISCAROUTE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_controller_subcommand() {
        let cli = Cli::try_parse_from([
            "viscaroute",
            "controller",
            "--cameras",
            "3",
            "--camera-mode",
            "echo",
            "--target",
            "2",
            "--write-timeout",
            "250ms",
        ])
        .expect("controller args should parse");

        match cli.command {
            Command::Controller(args) => {
                assert_eq!(args.cameras, 3);
                assert_eq!(args.target, 2);
                assert_eq!(args.write_timeout, "250ms");
            }
            other => panic!("expected controller, got {other:?}"),
        }
    }

    #[test]
    fn rejects_too_many_cameras() {
        let err = Cli::try_parse_from(["viscaroute", "controller", "--cameras", "8"])
            .expect_err("eight cameras should be rejected");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_decode_with_multiple_chunks() {
        let cli = Cli::try_parse_from(["viscaroute", "decode", "81 09", "02 00 FF"])
            .expect("decode args should parse");
        match cli.command {
            Command::Decode(args) => assert_eq!(args.hex.len(), 2),
            other => panic!("expected decode, got {other:?}"),
        }
    }

    #[test]
    fn parses_encode_subcommand() {
        let cli = Cli::try_parse_from(["viscaroute", "encode", "record", "--address", "4"])
            .expect("encode args should parse");
        assert!(matches!(cli.command, Command::Encode(_)));
    }

    #[test]
    fn client_requires_path() {
        let err = Cli::try_parse_from(["viscaroute", "client"]).expect_err("path is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
