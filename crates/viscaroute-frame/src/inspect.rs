//! Human-readable frame breakdown for logs and the CLI.
//!
//! Nothing here feeds routing decisions.

use std::fmt;

use crate::codec::{hex, Category, ErrorCode, Frame, MessageType};
use crate::command::{Command, TransportControl};

/// Named view of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub bytes: String,
    pub header: u8,
    pub sender: u8,
    pub receiver: u8,
    pub message_type: Option<MessageType>,
    pub category: Option<Category>,
    pub payload: Vec<u8>,
    pub command: Option<Command>,
    pub transport_control: Option<TransportControl>,
    pub error_code: Option<ErrorCode>,
}

impl Inspection {
    pub fn message_type_name(&self) -> &'static str {
        self.message_type.map_or("none", MessageType::name)
    }
}

/// Break a frame down into named fields.
pub fn inspect(frame: &Frame) -> Inspection {
    let message_type = frame.message_type();
    let payload = frame.payload().to_vec();

    let error_code = match message_type {
        Some(MessageType::Error) => payload.first().copied().and_then(ErrorCode::from_byte),
        _ => None,
    };
    // Mode payloads of the form `01 xx` carry a transport-control code.
    let transport_control = match (frame.category(), payload.as_slice()) {
        (Some(Category::Mode), [0x01, code, ..]) => TransportControl::from_byte(*code),
        _ => None,
    };

    Inspection {
        bytes: hex(frame.as_bytes()),
        header: frame.header(),
        sender: frame.sender(),
        receiver: frame.receiver(),
        message_type,
        category: frame.category(),
        payload,
        command: Command::recognize(frame),
        transport_control,
        error_code,
    }
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frame     {}", self.bytes)?;
        writeln!(
            f,
            "header    {:#04x} (sender {}, receiver {})",
            self.header, self.sender, self.receiver
        )?;
        write!(f, "type      {}", self.message_type_name())?;
        if let Some(category) = self.category {
            write!(f, "\ncategory  {}", category.name())?;
        }
        if !self.payload.is_empty() {
            write!(f, "\npayload   {}", hex(&self.payload))?;
        }
        if let Some(command) = self.command {
            write!(f, "\ncommand   {} ({})", command.name(), command.token())?;
        }
        if let Some(control) = self.transport_control {
            write!(f, "\ncontrol   {}", control.name())?;
        }
        if let Some(code) = self.error_code {
            write!(f, "\nerror     {} ({:#04x})", code.name(), code.byte())?;
        }
        Ok(())
    }
}
