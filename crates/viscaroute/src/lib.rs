//! VISCA camera-control routing.
//!
//! A controller relays terminator-delimited VISCA packets between one
//! operator channel and up to seven cameras, one thread per endpoint.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte channels, readiness polling, pseudo terminals
//! - [`frame`]: packet codec, command catalogue, stream reassembly
//! - [`router`]: endpoint registry, routing, execution units (behind `router` feature)

/// Re-export transport types.
pub mod transport {
    pub use viscaroute_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use viscaroute_frame::*;
}

/// Re-export routing types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use viscaroute_router::*;
}
