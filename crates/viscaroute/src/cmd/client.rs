use std::time::Duration;

use tracing::{debug, info, warn};
use viscaroute_frame::ReassemblyBuffer;
use viscaroute_router::{parse_line, BackoffPolicy, ConsoleInput, LineBuffer, ShutdownFlag};
use viscaroute_transport::{
    open_serial, poll_readable_set, BaudRate, Channel, FdChannel, LineConfig, ReadOutcome,
    Readiness,
};

use crate::cmd::{parse_duration, ClientArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// Why the operator loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Quit,
    Interrupted,
    StdinClosed,
}

pub fn run(args: ClientArgs, format: OutputFormat) -> CliResult<i32> {
    let poll_timeout = parse_duration(&args.poll_timeout)?;
    let line = LineConfig {
        baud: BaudRate::new(args.baud).map_err(|err| transport_error("invalid baud", err))?,
        ..LineConfig::default()
    };
    let mut link =
        open_serial(&args.path, &line).map_err(|err| transport_error("open failed", err))?;
    let mut stdin = FdChannel::stdin().map_err(|err| transport_error("stdin unavailable", err))?;

    let flag = ShutdownFlag::new();
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || handler_flag.request()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })?;

    info!(path = %args.path.display(), address = args.address, "client attached");

    let mut session = Session {
        address: args.address,
        format,
        lines: LineBuffer::new(),
        frames: ReassemblyBuffer::new(),
        backoff: BackoffPolicy::default(),
        hangups: 0,
        write_timeout: poll_timeout,
        undelivered: 0,
    };
    let mut scratch = [0u8; 4096];
    let mut stdin_open = true;

    let stop = loop {
        if flag.is_requested() {
            break Stop::Interrupted;
        }

        let ready = {
            let mut set: Vec<&dyn Channel> = Vec::with_capacity(2);
            set.push(&link);
            if stdin_open {
                set.push(&stdin);
            }
            poll_readable_set(&set, poll_timeout)
                .map_err(|err| transport_error("poll failed", err))?
        };

        if let Some(state) = ready.get(1) {
            match state {
                Readiness::Ready => match stdin.read(&mut scratch) {
                    Ok(ReadOutcome::Data(n)) => {
                        let lines = session.lines.push(&scratch[..n]);
                        if session.handle_lines(&mut link, lines)? {
                            break Stop::Quit;
                        }
                    }
                    Ok(ReadOutcome::WouldBlock) => {}
                    Ok(ReadOutcome::Hangup) | Err(_) => {
                        let rest = session.lines.take_partial().into_iter().collect();
                        if session.handle_lines(&mut link, rest)? {
                            break Stop::Quit;
                        }
                        stdin_open = false;
                    }
                },
                Readiness::Hangup => stdin_open = false,
                Readiness::Timeout => {}
            }
            if !stdin_open {
                break Stop::StdinClosed;
            }
        }

        match ready[0] {
            Readiness::Ready => match link.read(&mut scratch) {
                Ok(ReadOutcome::Data(n)) => {
                    session.hangups = 0;
                    session.receive(&scratch[..n]);
                }
                Ok(ReadOutcome::WouldBlock) => {}
                Ok(ReadOutcome::Hangup) | Err(_) => session.link_hangup(),
            },
            Readiness::Hangup => session.link_hangup(),
            Readiness::Timeout => {}
        }
    };

    info!(reason = ?stop, undelivered = session.undelivered, "client stopped");
    Ok(SUCCESS)
}

struct Session {
    address: u8,
    format: OutputFormat,
    lines: LineBuffer,
    frames: ReassemblyBuffer,
    backoff: BackoffPolicy,
    hangups: u32,
    /// Bound on waiting for the controller link to take a frame.
    write_timeout: Duration,
    undelivered: u64,
}

impl Session {
    /// Returns true once a quit line is seen.
    fn handle_lines(&mut self, link: &mut impl Channel, lines: Vec<String>) -> CliResult<bool> {
        for line in lines {
            match parse_line(&line) {
                ConsoleInput::Command(command) => {
                    let frame = command
                        .encode(self.address)
                        .map_err(|err| frame_error("encode failed", err))?;
                    debug!(%command, frame = %frame, "sending");
                    match link.write_all_within(frame.as_bytes(), self.write_timeout) {
                        Ok(Readiness::Ready) => {}
                        Ok(Readiness::Timeout) => {
                            self.undelivered += 1;
                            warn!(
                                timeout = ?self.write_timeout,
                                "controller not writable, command dropped"
                            );
                        }
                        Ok(Readiness::Hangup) => {
                            self.undelivered += 1;
                            warn!("controller hung up, command dropped");
                        }
                        Err(err) => {
                            self.undelivered += 1;
                            warn!(error = %err, "send failed");
                        }
                    }
                }
                ConsoleInput::Quit => {
                    println!("quit...");
                    return Ok(true);
                }
                ConsoleInput::Unknown(token) => eprintln!("unsupported command ({token})"),
                ConsoleInput::Empty => {}
            }
        }
        Ok(false)
    }

    fn receive(&mut self, bytes: &[u8]) {
        if let Err(err) = self.frames.append(bytes) {
            warn!(error = %err, "dropped incoming chunk");
            return;
        }
        for frame in self.frames.drain_frames() {
            print_frame(&frame, "controller", self.format);
        }
        if self.frames.is_stalled() {
            warn!(pending = self.frames.len(), "incoming data has no terminator");
        }
    }

    fn link_hangup(&mut self) {
        let delay = self.backoff.delay(self.hangups);
        self.hangups = self.hangups.saturating_add(1);
        warn!(attempt = self.hangups, ?delay, "controller hung up");
        std::thread::sleep(delay);
    }
}
