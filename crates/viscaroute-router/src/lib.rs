//! Endpoint registry, routing, and execution units for a VISCA controller.
//!
//! The controller sits between one operator-facing channel (address 0) and up
//! to seven camera channels (addresses 1-7). Frames from the controller go to
//! a target camera; frames from any camera go back to the controller. Each
//! endpoint is served by its own thread.

pub mod config;
pub mod console;
pub mod error;
pub mod harness;
pub mod registry;
pub mod router;
pub mod simulator;

pub use config::{BackoffPolicy, HarnessConfig, RouterConfig};
pub use console::{parse_line, ConsoleInput, LineBuffer};
pub use error::{Result, RouteError};
pub use harness::{ExitReason, Harness, HarnessHandle, HarnessReport, ShutdownFlag, UnitReport};
pub use registry::{ChannelHandle, Endpoint, EndpointRegistry, Outlets};
pub use router::{
    Delivery, FixedPolicy, RouteEvent, RouteOutcome, RoutePolicy, Router, RouterStats,
    StatsSnapshot,
};
pub use simulator::{CameraSimulator, SimulatorHandle, SimulatorMode};
