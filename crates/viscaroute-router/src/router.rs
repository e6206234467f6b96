use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::debug;
use viscaroute_frame::{inspect, Address, Frame};

use crate::config::RouterConfig;
use crate::error::{Result, RouteError};
use crate::registry::Outlets;

/// Chooses where a frame goes.
pub trait RoutePolicy: Send + Sync {
    /// Destination for `frame` arriving from `origin`, or `None` to drop it.
    fn destination(&self, origin: Address, frame: &Frame) -> Option<Address>;
}

/// Controller traffic goes to one fixed device; device traffic goes back to
/// the controller. Frames are never parsed.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    target: Address,
}

impl FixedPolicy {
    pub fn new(target: Address) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Address {
        self.target
    }
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self::new(Address::FIRST_DEVICE)
    }
}

impl RoutePolicy for FixedPolicy {
    fn destination(&self, origin: Address, _frame: &Frame) -> Option<Address> {
        if origin.is_controller() {
            Some(self.target)
        } else {
            Some(Address::CONTROLLER)
        }
    }
}

/// A successful hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub origin: Address,
    pub destination: Address,
    pub bytes: usize,
}

/// What happened to a routed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    Dropped(String),
}

/// Copy of every routed frame, sent to the tap when one is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEvent {
    pub origin: Address,
    pub destination: Option<Address>,
    pub frame: Frame,
    pub outcome: RouteOutcome,
}

/// Running totals across all units.
#[derive(Debug, Default)]
pub struct RouterStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    hangups: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub dropped: u64,
    pub hangups: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            hangups: self.hangups.load(Ordering::Relaxed),
        }
    }
}

/// Forwards frames between endpoints. Shared by every execution unit.
pub struct Router {
    outlets: Outlets,
    policy: Arc<dyn RoutePolicy>,
    config: RouterConfig,
    stats: RouterStats,
    tap: Option<Sender<RouteEvent>>,
}

impl Router {
    /// Router using [`FixedPolicy`] towards `config.target`.
    pub fn new(outlets: Outlets, config: RouterConfig) -> Self {
        Self {
            outlets,
            policy: Arc::new(FixedPolicy::new(config.target)),
            config,
            stats: RouterStats::default(),
            tap: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RoutePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Mirror every routed frame into `tap`.
    pub fn with_tap(mut self, tap: Sender<RouteEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Send `frame` from `origin` to wherever the policy says.
    ///
    /// Delivery is at most once: a frame that cannot be written is dropped
    /// and the error returned, nothing is queued for retry.
    pub fn dispatch(&self, origin: Address, frame: &Frame) -> Result<Delivery> {
        if !origin.is_controller() {
            debug!(%origin, "device frame\n{}", inspect(frame));
        }

        let result = self.deliver(origin, frame);
        match &result {
            Ok(delivery) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    %origin,
                    destination = %delivery.destination,
                    frame = %frame,
                    "frame routed"
                );
                self.emit(origin, Some(delivery.destination), frame, RouteOutcome::Delivered);
            }
            Err(err) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if matches!(err, RouteError::ChannelHangup { .. }) {
                    self.stats.hangups.fetch_add(1, Ordering::Relaxed);
                }
                let destination = match err {
                    RouteError::ChannelHangup { address }
                    | RouteError::WriteTimeout { address, .. }
                    | RouteError::UnknownEndpoint(address) => Some(*address),
                    _ => None,
                };
                self.emit(origin, destination, frame, RouteOutcome::Dropped(err.to_string()));
            }
        }
        result
    }

    fn deliver(&self, origin: Address, frame: &Frame) -> Result<Delivery> {
        let destination = self
            .policy
            .destination(origin, frame)
            .ok_or(RouteError::NoRoute { origin })?;
        let outlet = self
            .outlets
            .get(destination)
            .ok_or(RouteError::UnknownEndpoint(destination))?;
        outlet.send(frame, &self.config)?;
        Ok(Delivery {
            origin,
            destination,
            bytes: frame.len(),
        })
    }

    fn emit(&self, origin: Address, destination: Option<Address>, frame: &Frame, outcome: RouteOutcome) {
        if let Some(tap) = &self.tap {
            // A closed tap only means nobody is watching any more.
            let _ = tap.send(RouteEvent {
                origin,
                destination,
                frame: frame.clone(),
                outcome,
            });
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("outlets", &self.outlets)
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .field("tap", &self.tap.is_some())
            .finish()
    }
}
