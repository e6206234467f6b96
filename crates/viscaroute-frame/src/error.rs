/// Errors that can occur while building, decoding, or buffering frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The address does not fit the header nibble.
    #[error("address {address} out of range")]
    AddressOutOfRange { address: u8 },

    /// The encoded frame would exceed the 16-byte limit.
    #[error("payload too long ({len} bytes, max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// Appending would exceed the reassembly buffer capacity. Nothing was stored.
    #[error("reassembly buffer overflow ({incoming} bytes incoming, {available} available)")]
    BufferOverflow { incoming: usize, available: usize },

    /// No bytes at all.
    #[error("empty frame")]
    Empty,

    /// Fewer bytes than a header plus terminator.
    #[error("frame too short ({len} bytes)")]
    TooShort { len: usize },

    /// More than 16 bytes.
    #[error("frame too long ({len} bytes, max 16)")]
    TooLong { len: usize },

    /// The last byte is not the `0xFF` terminator.
    #[error("frame not terminated")]
    Unterminated,

    /// A terminator appears before the last byte.
    #[error("terminator inside frame at offset {at}")]
    InteriorTerminator { at: usize },

    /// The header byte lacks the `0x80` marker or names an impossible receiver.
    #[error("invalid header byte {header:#04x}")]
    InvalidHeader { header: u8 },

    /// The text does not name a catalogue command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
