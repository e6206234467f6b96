use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::address::{Address, BROADCAST};
use crate::error::{FrameError, Result};

/// Maximum encoded frame length, terminator included.
pub const MAX_FRAME_LEN: usize = 16;

/// Frame terminator.
pub const TERMINATOR: u8 = 0xFF;

/// Fixed high bit of every header byte.
pub const HEADER_MARKER: u8 = 0x80;

/// Header + type + terminator.
const RESERVED: usize = 3;

/// Message-type byte (byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `0x01`
    Command,
    /// `0x09`
    Inquiry,
    /// `0x30`
    AddressSet,
    /// `0x04 | address`
    Ack,
    /// `0x50 | address`
    Completion,
    /// `0x60 | address`
    Error,
    /// `0x38`
    NetworkChange,
    /// Anything else, kept verbatim.
    Unknown(u8),
}

impl MessageType {
    /// Base tag. Response kinds get the responder's address OR-ed in by
    /// [`encode_ack`], [`encode_complete`] and [`encode_error`].
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Command => 0x01,
            MessageType::Inquiry => 0x09,
            MessageType::AddressSet => 0x30,
            MessageType::Ack => 0x04,
            MessageType::Completion => 0x50,
            MessageType::Error => 0x60,
            MessageType::NetworkChange => 0x38,
            MessageType::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0x01 => MessageType::Command,
            0x09 => MessageType::Inquiry,
            0x30 => MessageType::AddressSet,
            0x38 => MessageType::NetworkChange,
            0x04..=0x07 => MessageType::Ack,
            0x50..=0x57 => MessageType::Completion,
            0x60..=0x67 => MessageType::Error,
            other => MessageType::Unknown(other),
        }
    }

    /// Whether byte 2 of this kind of frame can carry a category.
    pub fn has_category(self) -> bool {
        matches!(self, MessageType::Command | MessageType::Inquiry)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Command => "command",
            MessageType::Inquiry => "inquiry",
            MessageType::AddressSet => "address-set",
            MessageType::Ack => "ack",
            MessageType::Completion => "completion",
            MessageType::Error => "error",
            MessageType::NetworkChange => "network-change",
            MessageType::Unknown(_) => "unknown",
        }
    }
}

/// Category byte of commands and inquiries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    System = 0x00,
    Address = 0x01,
    Mode = 0x02,
}

impl Category {
    /// Only values below 3 are categories.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Category::System),
            0x01 => Some(Category::Address),
            0x02 => Some(Category::Mode),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::System => "system",
            Category::Address => "address",
            Category::Mode => "mode",
        }
    }
}

/// Error codes carried by error response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    MessageLength = 0x01,
    Syntax = 0x02,
    CommandBuffer = 0x03,
    CommandCancel = 0x04,
    NoSocket = 0x05,
    PowerOff = 0x40,
    CommandFailed = 0x41,
    Search = 0x42,
    Condition = 0x43,
    CounterType = 0x46,
    Tuner = 0x47,
    EmergencyStop = 0x48,
    MediaUnmounted = 0x49,
    Register = 0x4A,
    RegisterModeSetting = 0x4B,
}

impl ErrorCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let code = match byte {
            0x01 => ErrorCode::MessageLength,
            0x02 => ErrorCode::Syntax,
            0x03 => ErrorCode::CommandBuffer,
            0x04 => ErrorCode::CommandCancel,
            0x05 => ErrorCode::NoSocket,
            0x40 => ErrorCode::PowerOff,
            0x41 => ErrorCode::CommandFailed,
            0x42 => ErrorCode::Search,
            0x43 => ErrorCode::Condition,
            0x46 => ErrorCode::CounterType,
            0x47 => ErrorCode::Tuner,
            0x48 => ErrorCode::EmergencyStop,
            0x49 => ErrorCode::MediaUnmounted,
            0x4A => ErrorCode::Register,
            0x4B => ErrorCode::RegisterModeSetting,
            _ => return None,
        };
        Some(code)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::MessageLength => "message-length",
            ErrorCode::Syntax => "syntax",
            ErrorCode::CommandBuffer => "command-buffer",
            ErrorCode::CommandCancel => "command-cancel",
            ErrorCode::NoSocket => "no-socket",
            ErrorCode::PowerOff => "power-off",
            ErrorCode::CommandFailed => "command-failed",
            ErrorCode::Search => "search",
            ErrorCode::Condition => "condition",
            ErrorCode::CounterType => "counter-type",
            ErrorCode::Tuner => "tuner",
            ErrorCode::EmergencyStop => "emergency-stop",
            ErrorCode::MediaUnmounted => "media-unmounted",
            ErrorCode::Register => "register",
            ErrorCode::RegisterModeSetting => "register-mode-setting",
        }
    }
}

/// One complete, terminator-delimited packet.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Wrap bytes already known to end in exactly one terminator.
    pub(crate) fn from_wire(raw: Bytes) -> Self {
        Self { raw }
    }

    /// The encoded bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Cheap clone of the encoded bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn header(&self) -> u8 {
        self.raw.first().copied().unwrap_or(0)
    }

    /// Sender nibble: bits 4-6 of the header.
    pub fn sender(&self) -> u8 {
        (self.header() >> 4) & 0x07
    }

    /// Receiver nibble: bits 0-3 of the header (8 is broadcast).
    pub fn receiver(&self) -> u8 {
        self.header() & 0x0F
    }

    /// Bytes between the header and the terminator.
    fn body(&self) -> &[u8] {
        match self.raw.len() {
            0..=2 => &[],
            n => &self.raw[1..n - 1],
        }
    }

    /// `None` for a bare header + terminator.
    pub fn message_type(&self) -> Option<MessageType> {
        self.body().first().copied().map(MessageType::from_tag)
    }

    /// Raw type byte, including any address bits of a response.
    pub fn type_tag(&self) -> Option<u8> {
        self.body().first().copied()
    }

    pub fn category(&self) -> Option<Category> {
        let kind = self.message_type()?;
        if !kind.has_category() {
            return None;
        }
        self.body().get(1).copied().and_then(Category::from_byte)
    }

    /// Opaque payload after the type (and category, when present).
    pub fn payload(&self) -> &[u8] {
        let body = self.body();
        if body.is_empty() {
            return body;
        }
        let skip = if self.category().is_some() { 2 } else { 1 };
        &body[skip..]
    }

    /// Header checks shared by [`decode`] and stream consumers.
    pub fn validate(&self) -> Result<()> {
        check_structure(&self.raw)?;
        check_header(self.header())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]", hex(&self.raw))
    }
}

/// Space-separated upper-case hex, e.g. `81 09 02 00 02 FF`.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Payload up to (not including) the first terminator.
fn until_terminator(payload: &[u8]) -> &[u8] {
    match payload.iter().position(|&b| b == TERMINATOR) {
        Some(at) => {
            debug!(
                offset = at,
                dropped = payload.len() - at,
                "payload cut short at embedded terminator"
            );
            &payload[..at]
        }
        None => payload,
    }
}

/// Encode a controller-to-device frame.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────┬────────────┬──────────────┬──────┐
/// │ 0x80 | addr  │ type   │ [category] │ payload      │ 0xFF │
/// │ (1B)         │ (1B)   │ (0-1B)     │ (0-13B)      │ (1B) │
/// └──────────────┴────────┴────────────┴──────────────┴──────┘
/// ```
///
/// Address 0 is remapped to the broadcast slot 8. The payload is cut at its
/// first `0xFF`, since that byte would end the frame on the wire; callers
/// must keep the terminator value out of payloads. The length check applies
/// to the payload that is actually encoded.
pub fn encode(
    address: u8,
    kind: MessageType,
    category: Option<Category>,
    payload: &[u8],
) -> Result<Frame> {
    if address > BROADCAST {
        return Err(FrameError::AddressOutOfRange { address });
    }
    let address = if address == 0 { BROADCAST } else { address };

    let payload = until_terminator(payload);
    let max = MAX_FRAME_LEN - RESERVED - usize::from(category.is_some());
    if payload.len() > max {
        return Err(FrameError::PayloadTooLong {
            len: payload.len(),
            max,
        });
    }

    let mut dst = BytesMut::with_capacity(MAX_FRAME_LEN);
    dst.put_u8(HEADER_MARKER | address);
    dst.put_u8(kind.tag());
    if let Some(category) = category {
        dst.put_u8(category.byte());
    }
    dst.put_slice(payload);
    dst.put_u8(TERMINATOR);
    Ok(Frame::from_wire(dst.freeze()))
}

fn response_header(address: Address) -> u8 {
    HEADER_MARKER | (address.get() << 4)
}

/// `ack` from `address`: `[0x80 | addr << 4, 0x04 | addr, 0xFF]`.
pub fn encode_ack(address: Address) -> Frame {
    let raw = [
        response_header(address),
        MessageType::Ack.tag() | address.get(),
        TERMINATOR,
    ];
    Frame::from_wire(Bytes::copy_from_slice(&raw))
}

/// `completion` from `address` with an optional reply payload.
pub fn encode_complete(address: Address, payload: &[u8]) -> Result<Frame> {
    let payload = until_terminator(payload);
    let max = MAX_FRAME_LEN - RESERVED;
    if payload.len() > max {
        return Err(FrameError::PayloadTooLong {
            len: payload.len(),
            max,
        });
    }

    let mut dst = BytesMut::with_capacity(RESERVED + payload.len());
    dst.put_u8(response_header(address));
    dst.put_u8(MessageType::Completion.tag() | address.get());
    dst.put_slice(payload);
    dst.put_u8(TERMINATOR);
    Ok(Frame::from_wire(dst.freeze()))
}

/// `error` from `address`: `[0x80 | addr << 4, 0x60 | addr, code, 0xFF]`.
pub fn encode_error(address: Address, code: ErrorCode) -> Frame {
    let raw = [
        response_header(address),
        MessageType::Error.tag() | address.get(),
        code.byte(),
        TERMINATOR,
    ];
    Frame::from_wire(Bytes::copy_from_slice(&raw))
}

fn check_structure(bytes: &[u8]) -> Result<()> {
    match bytes.len() {
        0 => return Err(FrameError::Empty),
        len if len > MAX_FRAME_LEN => return Err(FrameError::TooLong { len }),
        _ => {}
    }
    if bytes[bytes.len() - 1] != TERMINATOR {
        return Err(FrameError::Unterminated);
    }
    if bytes.len() < 2 {
        return Err(FrameError::TooShort { len: bytes.len() });
    }
    if let Some(at) = bytes[..bytes.len() - 1]
        .iter()
        .position(|&b| b == TERMINATOR)
    {
        return Err(FrameError::InteriorTerminator { at });
    }
    Ok(())
}

fn check_header(header: u8) -> Result<()> {
    if header & HEADER_MARKER == 0 || header & 0x0F > BROADCAST {
        return Err(FrameError::InvalidHeader { header });
    }
    Ok(())
}

/// Structural decode of one frame.
///
/// Checks length, termination and the header's address nibbles only; it
/// never interprets the command. Use [`crate::inspect`] for that.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    check_structure(bytes)?;
    check_header(bytes[0])?;
    Ok(Frame::from_wire(Bytes::copy_from_slice(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(raw: u8) -> Address {
        Address::device(raw).unwrap()
    }

    #[test]
    fn power_on_inquiry_bytes() {
        let frame = encode(1, MessageType::Inquiry, Some(Category::Mode), &[0x00, 0x02]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x81, 0x09, 0x02, 0x00, 0x02, 0xFF]);
        assert_eq!(frame.to_string(), "81 09 02 00 02 FF");
    }

    #[test]
    fn address_zero_maps_to_broadcast() {
        let frame = encode(0, MessageType::Command, Some(Category::System), &[0x00]).unwrap();
        assert_eq!(frame.header(), 0x88);
        assert_eq!(frame.receiver(), BROADCAST);
    }

    #[test]
    fn address_above_eight_rejected() {
        let err = encode(9, MessageType::Command, None, &[]).unwrap_err();
        assert_eq!(err, FrameError::AddressOutOfRange { address: 9 });
    }

    #[test]
    fn roundtrip_with_category() {
        let payloads: [&[u8]; 4] = [&[], &[0x00], &[0x01, 0x48], &[0x10; 12]];
        for address in 1..=8u8 {
            for category in [Category::System, Category::Address, Category::Mode] {
                for kind in [MessageType::Command, MessageType::Inquiry] {
                    for payload in payloads {
                        let frame = encode(address, kind, Some(category), payload).unwrap();
                        let decoded = decode(frame.as_bytes()).unwrap();
                        assert_eq!(decoded.receiver(), address);
                        assert_eq!(decoded.message_type(), Some(kind));
                        assert_eq!(decoded.category(), Some(category));
                        assert_eq!(decoded.payload(), payload);
                        assert!(decoded.len() <= MAX_FRAME_LEN);
                    }
                }
            }
        }
    }

    #[test]
    fn roundtrip_without_category() {
        let payload = [0x30; 13];
        let frame = encode(2, MessageType::AddressSet, None, &payload).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        let decoded = decode(frame.as_bytes()).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::AddressSet));
        assert_eq!(decoded.category(), None);
        assert_eq!(decoded.payload(), &payload);
    }

    #[test]
    fn payload_limits() {
        let err = encode(1, MessageType::Command, Some(Category::Mode), &[0; 13]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { len: 13, max: 12 });

        let err = encode(1, MessageType::Command, None, &[0; 14]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { len: 14, max: 13 });
    }

    #[test]
    fn payload_truncated_at_first_terminator() {
        let payload = [0x01, 0x02, 0x03, 0xFF, 0x04, 0x05];
        let frame = encode(1, MessageType::Command, Some(Category::Mode), &payload).unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x02, 0x03]);
        assert_eq!(frame.as_bytes(), &[0x81, 0x01, 0x02, 0x01, 0x02, 0x03, 0xFF]);
    }

    #[test]
    fn long_payload_fits_after_truncation() {
        let mut payload = vec![0x11; 20];
        payload[5] = 0xFF;
        let frame = encode(3, MessageType::Command, Some(Category::System), &payload).unwrap();
        assert_eq!(frame.payload(), &[0x11; 5]);
    }

    #[test]
    fn ack_bytes() {
        assert_eq!(encode_ack(device(1)).as_bytes(), &[0x90, 0x05, 0xFF]);
        assert_eq!(encode_ack(device(2)).as_bytes(), &[0xA0, 0x06, 0xFF]);
        assert_eq!(encode_ack(device(2)).message_type(), Some(MessageType::Ack));
    }

    #[test]
    fn complete_bytes() {
        let frame = encode_complete(device(1), &[0x02]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x90, 0x51, 0x02, 0xFF]);
        assert_eq!(frame.message_type(), Some(MessageType::Completion));
        assert_eq!(frame.payload(), &[0x02]);

        let empty = encode_complete(device(3), &[]).unwrap();
        assert_eq!(empty.as_bytes(), &[0xB0, 0x53, 0xFF]);
    }

    #[test]
    fn complete_too_long() {
        let err = encode_complete(device(1), &[0x00; 14]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { len: 14, max: 13 });
        assert!(encode_complete(device(1), &[0x00; 13]).is_ok());
    }

    #[test]
    fn error_bytes() {
        let frame = encode_error(device(1), ErrorCode::Syntax);
        assert_eq!(frame.as_bytes(), &[0x90, 0x61, 0x02, 0xFF]);
        assert_eq!(frame.sender(), 1);
        assert_eq!(frame.receiver(), 0);
        assert_eq!(frame.payload(), &[ErrorCode::Syntax.byte()]);
    }

    #[test]
    fn decode_structural_errors() {
        assert_eq!(decode(&[]).unwrap_err(), FrameError::Empty);
        assert_eq!(decode(&[0x81, 0x01]).unwrap_err(), FrameError::Unterminated);
        assert_eq!(decode(&[0xFF]).unwrap_err(), FrameError::TooShort { len: 1 });
        assert_eq!(
            decode(&[0x81; 17]).unwrap_err(),
            FrameError::TooLong { len: 17 }
        );
        assert_eq!(
            decode(&[0x81, 0xFF, 0x01, 0xFF]).unwrap_err(),
            FrameError::InteriorTerminator { at: 1 }
        );
    }

    #[test]
    fn decode_header_errors() {
        assert_eq!(
            decode(&[0x01, 0x01, 0xFF]).unwrap_err(),
            FrameError::InvalidHeader { header: 0x01 }
        );
        assert_eq!(
            decode(&[0x8C, 0x01, 0xFF]).unwrap_err(),
            FrameError::InvalidHeader { header: 0x8C }
        );
    }

    #[test]
    fn decode_minimal_frame() {
        let frame = decode(&[0x90, 0xFF]).unwrap();
        assert_eq!(frame.message_type(), None);
        assert_eq!(frame.category(), None);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn category_only_for_commands_and_inquiries() {
        let frame = decode(&[0x90, 0x51, 0x02, 0xFF]).unwrap();
        assert_eq!(frame.category(), None);
        assert_eq!(frame.payload(), &[0x02]);

        let frame = decode(&[0x81, 0x01, 0x05, 0x00, 0xFF]).unwrap();
        assert_eq!(frame.category(), None);
        assert_eq!(frame.payload(), &[0x05, 0x00]);
    }

    #[test]
    fn message_type_tags() {
        for kind in [
            MessageType::Command,
            MessageType::Inquiry,
            MessageType::AddressSet,
            MessageType::Ack,
            MessageType::Completion,
            MessageType::Error,
            MessageType::NetworkChange,
        ] {
            assert_eq!(MessageType::from_tag(kind.tag()), kind);
        }
        assert_eq!(MessageType::from_tag(0x57), MessageType::Completion);
        assert_eq!(MessageType::from_tag(0x22), MessageType::Unknown(0x22));
    }

    #[test]
    fn error_codes_roundtrip_through_byte() {
        for byte in 0u8..=0x4F {
            if let Some(code) = ErrorCode::from_byte(byte) {
                assert_eq!(code.byte(), byte);
            }
        }
        assert_eq!(ErrorCode::from_byte(0x44), None);
        assert_eq!(ErrorCode::from_byte(0x4B), Some(ErrorCode::RegisterModeSetting));
    }
}
