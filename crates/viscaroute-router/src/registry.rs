//! Address-keyed endpoints.
//!
//! Each endpoint is split at registration: the read half and its reassembly
//! buffer move into exactly one execution unit, the write half is shared
//! behind a mutex so concurrent senders never interleave frames.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, trace, warn};
use viscaroute_frame::{Address, Frame, ReassemblyBuffer};
use viscaroute_transport::{Channel, Readiness, TransportError};

use crate::config::RouterConfig;
use crate::error::{Result, RouteError};

/// Shared, serialized write half of an endpoint's channel.
pub struct ChannelHandle {
    address: Address,
    label: String,
    writer: Mutex<Box<dyn Channel>>,
    alive: AtomicBool,
    hangups: AtomicU32,
}

impl ChannelHandle {
    fn new(address: Address, writer: Box<dyn Channel>) -> Self {
        Self {
            address,
            label: writer.label().to_string(),
            writer: Mutex::new(writer),
            alive: AtomicBool::new(true),
            hangups: AtomicU32::new(0),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False after the last send saw a hangup; true again after a successful one.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Deliver one whole frame, at most once.
    ///
    /// The whole frame must be accepted within `write_timeout`, measured
    /// across partial and would-block writes.
    /// A hangup marks the endpoint down and sleeps for the configured
    /// backoff before returning, with the destination lock released.
    pub fn send(&self, frame: &Frame, config: &RouterConfig) -> Result<()> {
        let outcome = {
            let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
            match writer.write_all_within(frame.as_bytes(), config.write_timeout) {
                Ok(readiness) => readiness,
                Err(TransportError::Closed) => Readiness::Hangup,
                Err(err) => return Err(err.into()),
            }
        };

        match outcome {
            Readiness::Ready => {
                self.alive.store(true, Ordering::Release);
                self.hangups.store(0, Ordering::Relaxed);
                trace!(address = %self.address, frame = %frame, "frame written");
                Ok(())
            }
            Readiness::Hangup => {
                let attempt = self.hangups.fetch_add(1, Ordering::Relaxed);
                self.alive.store(false, Ordering::Release);
                let delay = config.hangup_backoff.delay(attempt);
                warn!(
                    address = %self.address,
                    channel = %self.label,
                    attempt,
                    backoff = ?delay,
                    "destination hung up, frame not delivered"
                );
                thread::sleep(delay);
                Err(RouteError::ChannelHangup {
                    address: self.address,
                })
            }
            Readiness::Timeout => {
                warn!(
                    address = %self.address,
                    channel = %self.label,
                    timeout = ?config.write_timeout,
                    frame = %frame,
                    "destination not writable, frame dropped"
                );
                Err(RouteError::WriteTimeout {
                    address: self.address,
                    timeout: config.write_timeout,
                })
            }
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("address", &self.address)
            .field("label", &self.label)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Everything one execution unit owns for its address.
pub struct Endpoint {
    pub address: Address,
    pub reader: Box<dyn Channel>,
    pub reassembler: ReassemblyBuffer,
    pub outlet: Arc<ChannelHandle>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("reader", &self.reader.label())
            .field("pending", &self.reassembler.len())
            .finish()
    }
}

/// Write halves of every endpoint, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct Outlets {
    handles: BTreeMap<Address, Arc<ChannelHandle>>,
}

impl Outlets {
    pub fn get(&self, address: Address) -> Option<&Arc<ChannelHandle>> {
        self.handles.get(&address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.handles.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Endpoints for addresses 0 (controller) through 7, created once at startup.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<Address, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` as the endpoint at `address`.
    ///
    /// The channel is duplicated so that reads and writes are owned
    /// separately.
    pub fn register<C>(&mut self, address: Address, channel: C) -> Result<()>
    where
        C: Channel + 'static,
    {
        if self.endpoints.contains_key(&address) {
            return Err(RouteError::DuplicateEndpoint(address));
        }
        let writer = channel.try_clone_channel()?;
        let reader: Box<dyn Channel> = Box::new(channel);
        debug!(%address, role = address.role(), channel = reader.label(), "endpoint registered");

        self.endpoints.insert(
            address,
            Endpoint {
                address,
                outlet: Arc::new(ChannelHandle::new(address, writer)),
                reader,
                reassembler: ReassemblyBuffer::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, address: Address) -> bool {
        self.endpoints.contains_key(&address)
    }

    pub fn reassembler_for(&mut self, address: Address) -> Option<&mut ReassemblyBuffer> {
        self.endpoints
            .get_mut(&address)
            .map(|endpoint| &mut endpoint.reassembler)
    }

    pub fn channel_for(&self, address: Address) -> Option<&Arc<ChannelHandle>> {
        self.endpoints.get(&address).map(|endpoint| &endpoint.outlet)
    }

    /// Registered addresses in ascending order.
    pub fn addresses(&self) -> Vec<Address> {
        self.endpoints.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Shared write handles for the router.
    pub fn outlets(&self) -> Outlets {
        Outlets {
            handles: self
                .endpoints
                .iter()
                .map(|(address, endpoint)| (*address, Arc::clone(&endpoint.outlet)))
                .collect(),
        }
    }

    /// Hand every endpoint over to its execution unit.
    pub fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints.into_values().collect()
    }
}
