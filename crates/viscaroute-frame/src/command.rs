//! The operator command catalogue.
//!
//! Each console token maps to one fixed inquiry frame. The mapping is
//! static; nothing is negotiated with the device.

use std::fmt;
use std::str::FromStr;

use crate::codec::{encode, Category, Frame, MessageType};
use crate::error::{FrameError, Result};

/// A command the operator can issue from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PowerOn,
    PowerOff,
    PowerQuery,
    Record,
    RecordPause,
}

impl Command {
    /// Every command, in token order.
    pub const ALL: [Command; 5] = [
        Command::PowerOn,
        Command::PowerOff,
        Command::PowerQuery,
        Command::Record,
        Command::RecordPause,
    ];

    /// Console token (`'1'`..`'5'`).
    pub fn token(self) -> char {
        match self {
            Command::PowerOn => '1',
            Command::PowerOff => '2',
            Command::PowerQuery => '3',
            Command::Record => '4',
            Command::RecordPause => '5',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::PowerOn => "power-on",
            Command::PowerOff => "power-off",
            Command::PowerQuery => "power-query",
            Command::Record => "record",
            Command::RecordPause => "record-pause",
        }
    }

    /// Resolve a console token (`1`..`5`) only.
    pub fn from_console_token(token: &str) -> Option<Self> {
        let mut chars = token.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::ALL.into_iter().find(|cmd| cmd.token() == c),
            _ => None,
        }
    }

    /// Resolve a console token or a command name (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::from_console_token(token).or_else(|| {
            Self::ALL
                .into_iter()
                .find(|cmd| token.eq_ignore_ascii_case(cmd.name()))
        })
    }

    /// Fixed payload bytes.
    pub fn payload(self) -> &'static [u8] {
        match self {
            Command::PowerOn => &[0x00, 0x02],
            Command::PowerOff => &[0x00, 0x03],
            Command::PowerQuery => &[0x00],
            Command::Record => &[0x01, TransportControl::Record as u8],
            Command::RecordPause => &[0x01, TransportControl::RecordPause as u8],
        }
    }

    pub fn category(self) -> Category {
        Category::Mode
    }

    pub fn message_type(self) -> MessageType {
        MessageType::Inquiry
    }

    /// Build the frame for this command addressed to `address`.
    pub fn encode(self, address: u8) -> Result<Frame> {
        encode(
            address,
            self.message_type(),
            Some(self.category()),
            self.payload(),
        )
    }

    /// Match a frame back to the catalogue entry that produced it.
    pub fn recognize(frame: &Frame) -> Option<Self> {
        let kind = frame.message_type()?;
        let category = frame.category()?;
        Self::ALL.into_iter().find(|cmd| {
            cmd.message_type() == kind
                && cmd.category() == category
                && cmd.payload() == frame.payload()
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s).ok_or_else(|| FrameError::UnknownCommand(s.trim().to_string()))
    }
}

/// Transport-control function codes, used to name payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportControl {
    Stop = 0x00,
    Forward = 0x08,
    Rewind = 0x10,
    Eject = 0x18,
    Still = 0x20,
    Slow10 = 0x24,
    Slow5 = 0x26,
    Play = 0x28,
    RecordPause = 0x40,
    Record = 0x48,
}

impl TransportControl {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let control = match byte {
            0x00 => TransportControl::Stop,
            0x08 => TransportControl::Forward,
            0x10 => TransportControl::Rewind,
            0x18 => TransportControl::Eject,
            0x20 => TransportControl::Still,
            0x24 => TransportControl::Slow10,
            0x26 => TransportControl::Slow5,
            0x28 => TransportControl::Play,
            0x40 => TransportControl::RecordPause,
            0x48 => TransportControl::Record,
            _ => return None,
        };
        Some(control)
    }

    pub fn name(self) -> &'static str {
        match self {
            TransportControl::Stop => "stop",
            TransportControl::Forward => "forward",
            TransportControl::Rewind => "rewind",
            TransportControl::Eject => "eject",
            TransportControl::Still => "still",
            TransportControl::Slow10 => "slow-10",
            TransportControl::Slow5 => "slow-5",
            TransportControl::Play => "play",
            TransportControl::RecordPause => "record-pause",
            TransportControl::Record => "record",
        }
    }
}
