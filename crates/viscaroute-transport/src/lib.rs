//! Byte channel abstraction for VISCA links.
//!
//! Everything above this crate talks to a [`Channel`]: something that can be
//! read, written, and asked "are you readable/writable within this timeout".
//! The routing core never opens or configures devices itself; the [`pty`]
//! module is the collaborator that does, and only the CLI calls it.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod fd;
#[cfg(unix)]
pub mod pty;

pub use error::{Result, TransportError};
pub use traits::{Channel, ReadOutcome, Readiness};

#[cfg(unix)]
pub use fd::{poll_readable_set, FdChannel};
#[cfg(unix)]
pub use pty::{open_serial, BaudRate, LineConfig, Pty};
