//! VISCA packet codec and stream reassembly.
//!
//! Every packet on the wire is at most 16 bytes:
//! - 1 header byte carrying sender and receiver addresses over a `0x80` marker
//! - 1 message-type byte
//! - an optional category byte (commands and inquiries only)
//! - opaque payload
//! - the `0xFF` terminator
//!
//! There is no byte stuffing: the terminator value can never appear inside a
//! payload, and the encoder cuts a payload short at the first `0xFF`.

pub mod address;
pub mod codec;
pub mod command;
pub mod error;
pub mod inspect;
pub mod reassembler;

pub use address::{Address, BROADCAST};
pub use codec::{
    decode, encode, encode_ack, encode_complete, encode_error, Category, ErrorCode, Frame,
    MessageType, MAX_FRAME_LEN, TERMINATOR,
};
pub use command::{Command, TransportControl};
pub use error::{FrameError, Result};
pub use inspect::{inspect, Inspection};
pub use reassembler::{ReassemblyBuffer, BUFFER_CAPACITY};
