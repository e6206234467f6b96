//! Execution units.
//!
//! One controller-intake unit multiplexes the controller channel and the
//! operator console; one device unit per registered camera address reads
//! that camera's channel. Every unit owns its endpoint's read half and
//! reassembly buffer outright, sends through the shared [`Router`], and
//! checks a shared [`ShutdownFlag`] after each bounded readiness wait.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use viscaroute_frame::{Address, Frame, ReassemblyBuffer};
use viscaroute_transport::{poll_readable_set, Channel, ReadOutcome, Readiness};

use crate::config::{HarnessConfig, RouterConfig};
use crate::console::{parse_line, ConsoleInput, LineBuffer};
use crate::error::{Result, RouteError};
use crate::registry::{Endpoint, EndpointRegistry};
use crate::router::{RouteEvent, RoutePolicy, Router, StatsSnapshot};

/// Cooperative cancellation shared by every unit.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why a unit stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The shutdown flag was observed.
    Shutdown,
    /// The endpoint's channel hung up.
    Hangup,
    /// An unrecoverable channel error.
    Failed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Shutdown => f.write_str("shutdown"),
            ExitReason::Hangup => f.write_str("hangup"),
            ExitReason::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Final state of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub name: String,
    pub address: Address,
    pub exit: ExitReason,
    pub frames_routed: u64,
    pub frames_dropped: u64,
    /// Bytes still waiting in the unit's reassembly buffer.
    pub pending_bytes: usize,
}

/// Final state of the whole harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub units: Vec<UnitReport>,
    pub stats: StatsSnapshot,
}

impl HarnessReport {
    pub fn unit(&self, address: Address) -> Option<&UnitReport> {
        self.units.iter().find(|unit| unit.address == address)
    }

    pub fn total_routed(&self) -> u64 {
        self.units.iter().map(|unit| unit.frames_routed).sum()
    }
}

/// Builder for the set of execution units.
pub struct Harness {
    registry: EndpointRegistry,
    router_config: RouterConfig,
    config: HarnessConfig,
    console: Option<Box<dyn Channel>>,
    policy: Option<Arc<dyn RoutePolicy>>,
    tap: Option<Sender<RouteEvent>>,
    flag: ShutdownFlag,
}

impl Harness {
    pub fn new(registry: EndpointRegistry, router_config: RouterConfig, config: HarnessConfig) -> Self {
        Self {
            registry,
            router_config,
            config,
            console: None,
            policy: None,
            tap: None,
            flag: ShutdownFlag::new(),
        }
    }

    /// Read operator commands from `console`.
    pub fn with_console<C>(mut self, console: C) -> Self
    where
        C: Channel + 'static,
    {
        self.console = Some(Box::new(console));
        self
    }

    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: RoutePolicy + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn with_tap(mut self, tap: Sender<RouteEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Use an externally owned flag, e.g. one a signal handler also sets.
    pub fn with_shutdown_flag(mut self, flag: ShutdownFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    /// Start every unit.
    pub fn spawn(self) -> Result<HarnessHandle> {
        let mut router = Router::new(self.registry.outlets(), self.router_config);
        if let Some(policy) = self.policy {
            router = router.with_policy(policy);
        }
        if let Some(tap) = self.tap {
            router = router.with_tap(tap);
        }
        let router = Arc::new(router);
        let flag = self.flag;

        let mut controller = None;
        let mut devices = Vec::new();
        for endpoint in self.registry.into_endpoints() {
            if endpoint.address.is_controller() {
                controller = Some(endpoint);
            } else {
                devices.push(endpoint);
            }
        }

        let mut handle = HarnessHandle {
            flag: flag.clone(),
            router: Arc::clone(&router),
            units: Vec::new(),
        };

        if controller.is_some() || self.console.is_some() {
            let unit = IntakeUnit {
                controller,
                console: self.console,
                lines: LineBuffer::new(),
                router: Arc::clone(&router),
                config: self.config.clone(),
                flag: flag.clone(),
                counters: Counters::default(),
            };
            handle.start("intake".to_string(), move || unit.run())?;
        }

        for endpoint in devices {
            let name = format!("device-{}", endpoint.address);
            let unit = DeviceUnit {
                endpoint,
                router: Arc::clone(&router),
                config: self.config.clone(),
                flag: flag.clone(),
                counters: Counters::default(),
            };
            handle.start(name, move || unit.run())?;
        }

        info!(units = handle.units.len(), "harness started");
        Ok(handle)
    }
}

/// Running units.
pub struct HarnessHandle {
    flag: ShutdownFlag,
    router: Arc<Router>,
    units: Vec<(String, JoinHandle<UnitReport>)>,
}

impl HarnessHandle {
    fn start<F>(&mut self, name: String, body: F) -> Result<()>
    where
        F: FnOnce() -> UnitReport + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name(format!("visca-{name}"))
            .spawn(body);
        match spawned {
            Ok(join) => {
                self.units.push((name, join));
                Ok(())
            }
            Err(err) => {
                self.flag.request();
                for (_, join) in self.units.drain(..) {
                    let _ = join.join();
                }
                Err(RouteError::Spawn(err))
            }
        }
    }

    /// Ask every unit to stop after its current wait.
    pub fn shutdown(&self) {
        self.flag.request();
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.router.stats()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn is_finished(&self) -> bool {
        self.units.iter().all(|(_, join)| join.is_finished())
    }

    /// Wait for every unit to stop.
    ///
    /// Units only stop on shutdown or on their own channel's hangup, so this
    /// blocks until someone calls [`HarnessHandle::shutdown`] or the console
    /// sends `quit`.
    pub fn join(self) -> Result<HarnessReport> {
        let mut units = Vec::with_capacity(self.units.len());
        let mut panicked = None;
        for (name, join) in self.units {
            match join.join() {
                Ok(report) => units.push(report),
                Err(_) => {
                    warn!(unit = %name, "execution unit panicked");
                    panicked.get_or_insert(name);
                }
            }
        }
        if let Some(name) = panicked {
            return Err(RouteError::UnitPanicked(name));
        }
        let report = HarnessReport {
            units,
            stats: self.router.stats(),
        };
        info!(
            delivered = report.stats.delivered,
            dropped = report.stats.dropped,
            "harness stopped"
        );
        Ok(report)
    }
}

impl fmt::Debug for HarnessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.units.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("HarnessHandle")
            .field("units", &names)
            .field("shutdown", &self.flag.is_requested())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Counters {
    routed: u64,
    dropped: u64,
    stalled: bool,
}

impl Counters {
    fn route(&mut self, router: &Router, origin: Address, frame: &Frame) {
        match router.dispatch(origin, frame) {
            Ok(_) => self.routed += 1,
            Err(err) => {
                self.dropped += 1;
                debug!(%origin, error = %err, "frame not routed");
            }
        }
    }

    /// Append a chunk, then route every complete frame it finishes.
    fn feed(&mut self, router: &Router, origin: Address, buffer: &mut ReassemblyBuffer, chunk: &[u8]) {
        if let Err(err) = buffer.append(chunk) {
            warn!(%origin, error = %err, "chunk dropped");
            self.dropped += 1;
        }
        for frame in buffer.drain_frames() {
            if let Err(err) = frame.validate() {
                warn!(%origin, frame = %frame, error = %err, "malformed frame skipped");
                self.dropped += 1;
                continue;
            }
            self.route(router, origin, &frame);
        }
        match (buffer.is_stalled(), self.stalled) {
            (true, false) => {
                warn!(
                    %origin,
                    pending = buffer.len(),
                    "no terminator in pending bytes, endpoint stalled"
                );
                self.stalled = true;
            }
            (false, true) => self.stalled = false,
            _ => {}
        }
    }

    fn report(&self, name: &str, address: Address, exit: ExitReason, pending: usize) -> UnitReport {
        info!(unit = name, %address, exit = %exit, routed = self.routed, "unit stopped");
        UnitReport {
            name: name.to_string(),
            address,
            exit,
            frames_routed: self.routed,
            frames_dropped: self.dropped,
            pending_bytes: pending,
        }
    }
}

struct DeviceUnit {
    endpoint: Endpoint,
    router: Arc<Router>,
    config: HarnessConfig,
    flag: ShutdownFlag,
    counters: Counters,
}

impl DeviceUnit {
    fn run(mut self) -> UnitReport {
        let address = self.endpoint.address;
        let name = format!("device-{address}");
        info!(unit = %name, channel = self.endpoint.reader.label(), "unit started");

        let exit = self.serve();
        self.counters
            .report(&name, address, exit, self.endpoint.reassembler.len())
    }

    fn serve(&mut self) -> ExitReason {
        let address = self.endpoint.address;
        let mut scratch = vec![0u8; self.config.read_chunk.max(1)];
        loop {
            if self.flag.is_requested() {
                return ExitReason::Shutdown;
            }
            match self.endpoint.reader.poll_readable(self.config.poll_timeout) {
                Ok(Readiness::Timeout) => continue,
                Ok(Readiness::Hangup) => {
                    warn!(%address, "device channel hung up");
                    return ExitReason::Hangup;
                }
                Ok(Readiness::Ready) => {}
                Err(err) => return ExitReason::Failed(err.to_string()),
            }
            match self.endpoint.reader.read(&mut scratch) {
                Ok(ReadOutcome::Data(n)) => {
                    debug!(%address, bytes = n, "read from device");
                    self.counters.feed(
                        &self.router,
                        address,
                        &mut self.endpoint.reassembler,
                        &scratch[..n],
                    );
                }
                Ok(ReadOutcome::WouldBlock) => {}
                Ok(ReadOutcome::Hangup) => {
                    warn!(%address, "device channel hung up");
                    return ExitReason::Hangup;
                }
                Err(err) => return ExitReason::Failed(err.to_string()),
            }
        }
    }
}

struct IntakeUnit {
    controller: Option<Endpoint>,
    console: Option<Box<dyn Channel>>,
    lines: LineBuffer,
    router: Arc<Router>,
    config: HarnessConfig,
    flag: ShutdownFlag,
    counters: Counters,
}

impl IntakeUnit {
    fn run(mut self) -> UnitReport {
        info!(
            unit = "intake",
            controller = self.controller.is_some(),
            console = self.console.is_some(),
            "unit started"
        );
        let exit = self.serve();
        let pending = self
            .controller
            .as_ref()
            .map_or(0, |endpoint| endpoint.reassembler.len());
        self.counters
            .report("intake", Address::CONTROLLER, exit, pending)
    }

    fn serve(&mut self) -> ExitReason {
        let mut scratch = vec![0u8; self.config.read_chunk.max(1)];
        let mut hangups: u32 = 0;
        loop {
            if self.flag.is_requested() {
                return ExitReason::Shutdown;
            }

            let (controller_ready, console_ready) = {
                let mut set: Vec<&dyn Channel> = Vec::with_capacity(2);
                if let Some(endpoint) = &self.controller {
                    set.push(&*endpoint.reader);
                }
                if let Some(console) = &self.console {
                    set.push(&**console);
                }
                if set.is_empty() {
                    // Nothing left to read; idle until shutdown.
                    std::thread::sleep(self.config.poll_timeout);
                    continue;
                }
                let ready = match poll_readable_set(&set, self.config.poll_timeout) {
                    Ok(ready) => ready,
                    Err(err) => return ExitReason::Failed(err.to_string()),
                };
                let mut ready = ready.into_iter();
                let controller_ready = self.controller.as_ref().and_then(|_| ready.next());
                let console_ready = self.console.as_ref().and_then(|_| ready.next());
                (controller_ready, console_ready)
            };

            match console_ready {
                Some(Readiness::Ready) => self.read_console(&mut scratch),
                Some(Readiness::Hangup) => self.close_console(),
                _ => {}
            }
            if self.flag.is_requested() {
                return ExitReason::Shutdown;
            }

            match controller_ready {
                Some(Readiness::Ready) => {
                    if self.read_controller(&mut scratch) {
                        hangups = 0;
                    } else {
                        self.controller_hangup(&mut hangups);
                    }
                }
                Some(Readiness::Hangup) => self.controller_hangup(&mut hangups),
                _ => {}
            }
        }
    }

    /// Returns false if the controller hung up.
    fn read_controller(&mut self, scratch: &mut [u8]) -> bool {
        let Some(endpoint) = self.controller.as_mut() else {
            return true;
        };
        match endpoint.reader.read(scratch) {
            Ok(ReadOutcome::Data(n)) => {
                debug!(bytes = n, "read from controller");
                self.counters.feed(
                    &self.router,
                    Address::CONTROLLER,
                    &mut endpoint.reassembler,
                    &scratch[..n],
                );
                true
            }
            Ok(ReadOutcome::WouldBlock) => true,
            Ok(ReadOutcome::Hangup) => false,
            Err(err) => {
                warn!(error = %err, "controller read failed");
                false
            }
        }
    }

    /// The controller side comes and goes with its client, so a hangup only
    /// pauses this unit.
    fn controller_hangup(&mut self, attempt: &mut u32) {
        let delay = self.router.config().hangup_backoff.delay(*attempt);
        if *attempt == 0 {
            warn!(backoff = ?delay, "controller channel hung up");
        }
        *attempt = attempt.saturating_add(1);
        std::thread::sleep(delay.min(self.config.poll_timeout));
    }

    fn read_console(&mut self, scratch: &mut [u8]) {
        let Some(console) = self.console.as_mut() else {
            return;
        };
        match console.read(scratch) {
            Ok(ReadOutcome::Data(n)) => {
                for line in self.lines.push(&scratch[..n]) {
                    self.handle_line(&line);
                    if self.flag.is_requested() {
                        break;
                    }
                }
            }
            Ok(ReadOutcome::WouldBlock) => {}
            Ok(ReadOutcome::Hangup) => self.close_console(),
            Err(err) => {
                warn!(error = %err, "console read failed");
                self.close_console();
            }
        }
    }

    fn close_console(&mut self) {
        if self.console.take().is_some() {
            if let Some(line) = self.lines.take_partial() {
                self.handle_line(&line);
            }
            info!("console closed");
        }
    }

    fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => {
                info!("quit requested from console");
                self.flag.request();
            }
            ConsoleInput::Unknown(token) => {
                warn!(token = %token, "unsupported console command");
            }
            ConsoleInput::Command(command) => {
                let target = self.router.config().target;
                match command.encode(target.get()) {
                    Ok(frame) => {
                        debug!(command = command.name(), frame = %frame, "console command");
                        self.counters.route(&self.router, Address::CONTROLLER, &frame);
                    }
                    Err(err) => warn!(command = command.name(), error = %err, "cannot encode command"),
                }
            }
        }
    }
}
