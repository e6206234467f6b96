//! Operator console input.

use tracing::warn;
use viscaroute_frame::Command;

/// Longest line kept; anything longer is discarded up to the next newline.
pub const MAX_LINE_LEN: usize = 256;

/// Numeric quit token kept from older operator clients.
pub const LEGACY_QUIT_TOKEN: &str = "6";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(Command),
    Quit,
    Unknown(String),
    Empty,
}

/// Parse one line, with or without its trailing newline.
pub fn parse_line(line: &str) -> ConsoleInput {
    let token = line.trim();
    if token.is_empty() {
        return ConsoleInput::Empty;
    }
    if token.eq_ignore_ascii_case("quit")
        || token.eq_ignore_ascii_case("exit")
        || token == LEGACY_QUIT_TOKEN
    {
        return ConsoleInput::Quit;
    }
    match Command::from_console_token(token) {
        Some(command) => ConsoleInput::Command(command),
        None => ConsoleInput::Unknown(token.to_string()),
    }
}

/// Splits console bytes into lines across reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if !self.discarding {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                }
                self.pending.clear();
                self.discarding = false;
            } else if !self.discarding {
                if self.pending.len() == MAX_LINE_LEN {
                    warn!(limit = MAX_LINE_LEN, "console line too long, discarded");
                    self.pending.clear();
                    self.discarding = true;
                } else {
                    self.pending.push(byte);
                }
            }
        }
        lines
    }

    /// Whatever is left without a newline (used when the console closes).
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() || self.discarding {
            self.pending.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tokens() {
        assert_eq!(parse_line("1\n"), ConsoleInput::Command(Command::PowerOn));
        assert_eq!(parse_line(" 5 "), ConsoleInput::Command(Command::RecordPause));
        assert_eq!(parse_line("QUIT"), ConsoleInput::Quit);
        assert_eq!(parse_line("exit\r\n"), ConsoleInput::Quit);
        assert_eq!(parse_line("\n"), ConsoleInput::Empty);
        assert_eq!(parse_line("9"), ConsoleInput::Unknown("9".to_string()));
    }

    #[test]
    fn console_accepts_only_numeric_command_tokens() {
        assert_eq!(
            parse_line("power-query"),
            ConsoleInput::Unknown("power-query".to_string())
        );
        assert_eq!(parse_line("Record"), ConsoleInput::Unknown("Record".to_string()));
        assert_eq!(parse_line("12"), ConsoleInput::Unknown("12".to_string()));
    }

    #[test]
    fn six_is_a_quit_alias() {
        assert_eq!(parse_line("6\n"), ConsoleInput::Quit);
        assert_eq!(parse_line(" 6 "), ConsoleInput::Quit);
    }

    #[test]
    fn lines_span_reads() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"qu").is_empty());
        assert_eq!(buffer.push(b"it\n1\n3"), vec!["quit", "1"]);
        assert_eq!(buffer.push(b"\n"), vec!["3"]);
        assert_eq!(buffer.take_partial(), None);
    }

    #[test]
    fn partial_line_on_close() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"2");
        assert_eq!(buffer.take_partial().as_deref(), Some("2"));
    }

    #[test]
    fn overlong_line_dropped() {
        let mut buffer = LineBuffer::new();
        let long = vec![b'x'; MAX_LINE_LEN + 10];
        assert!(buffer.push(&long).is_empty());
        assert_eq!(buffer.push(b"tail\n4\n"), vec!["4"]);
    }
}
