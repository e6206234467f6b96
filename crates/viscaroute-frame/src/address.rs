//! Endpoint addresses.
//!
//! Address 0 is the controller, 1-7 are devices. The codec additionally
//! accepts 8 as the broadcast receiver slot; 0 is remapped to it.

use std::fmt;

use crate::error::{FrameError, Result};

/// Receiver slot used when a command is addressed to "0".
pub const BROADCAST: u8 = 8;

/// One addressable party on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u8);

impl Address {
    /// The controller.
    pub const CONTROLLER: Address = Address(0);

    /// Default destination of controller traffic.
    pub const FIRST_DEVICE: Address = Address(1);

    /// Highest device address.
    pub const MAX_DEVICE: u8 = 7;

    /// Validate a raw address in `0..=7`.
    pub fn new(raw: u8) -> Result<Self> {
        if raw > Self::MAX_DEVICE {
            return Err(FrameError::AddressOutOfRange { address: raw });
        }
        Ok(Self(raw))
    }

    /// Validate a device address in `1..=7`.
    pub fn device(raw: u8) -> Result<Self> {
        if raw == 0 {
            return Err(FrameError::AddressOutOfRange { address: raw });
        }
        Self::new(raw)
    }

    /// All device addresses, in order.
    pub fn devices() -> impl Iterator<Item = Address> {
        (1..=Self::MAX_DEVICE).map(Address)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_controller(self) -> bool {
        self.0 == 0
    }

    /// Role name used in logs and output.
    pub fn role(self) -> &'static str {
        if self.is_controller() {
            "controller"
        } else {
            "camera"
        }
    }
}

impl TryFrom<u8> for Address {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> u8 {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
