use std::time::Duration;

use viscaroute_frame::Address;

/// Errors that can occur while registering endpoints or routing frames.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] viscaroute_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] viscaroute_frame::FrameError),

    /// The destination hung up; the frame was not delivered.
    #[error("endpoint {address} hung up")]
    ChannelHangup { address: Address },

    /// The destination did not become writable in time; the frame was dropped.
    #[error("write to endpoint {address} timed out after {timeout:?}")]
    WriteTimeout { address: Address, timeout: Duration },

    /// No endpoint is registered at this address.
    #[error("no endpoint registered at address {0}")]
    UnknownEndpoint(Address),

    /// An endpoint is already registered at this address.
    #[error("endpoint {0} already registered")]
    DuplicateEndpoint(Address),

    /// The route policy has no destination for this frame.
    #[error("no route for frame from endpoint {origin}")]
    NoRoute { origin: Address },

    /// An execution unit could not be started.
    #[error("failed to spawn execution unit: {0}")]
    Spawn(std::io::Error),

    /// An execution unit panicked.
    #[error("execution unit {0} panicked")]
    UnitPanicked(String),
}

impl RouteError {
    /// Whether the frame was dropped because of the destination's state
    /// (hangup or timeout) rather than a local fault.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            RouteError::ChannelHangup { .. } | RouteError::WriteTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;
