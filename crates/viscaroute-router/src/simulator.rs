//! In-process stand-ins for cameras attached to the device side of a link.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use viscaroute_frame::{
    encode_ack, encode_complete, encode_error, Address, Command, ErrorCode, Frame, MessageType,
    ReassemblyBuffer,
};
use viscaroute_transport::{Channel, ReadOutcome, Readiness};

use crate::error::{Result, RouteError};
use crate::harness::ShutdownFlag;

/// Power-state payloads carried by a power-query completion.
const POWER_ON: u8 = 0x02;
const POWER_OFF: u8 = 0x03;

/// How a simulated camera answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatorMode {
    /// Write every received frame back unchanged.
    Echo,
    /// Answer like a device: ack + completion, power state on query,
    /// error for anything it does not understand.
    #[default]
    Respond,
}

/// One simulated camera.
pub struct CameraSimulator {
    address: Address,
    channel: Box<dyn Channel>,
    mode: SimulatorMode,
    poll_timeout: Duration,
    powered: bool,
    recording: bool,
}

impl CameraSimulator {
    pub fn new<C>(address: Address, channel: C, mode: SimulatorMode) -> Self
    where
        C: Channel + 'static,
    {
        Self {
            address,
            channel: Box::new(channel),
            mode,
            poll_timeout: Duration::from_millis(1000),
            powered: false,
            recording: false,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Frames to send back for one received frame.
    pub fn respond(&mut self, frame: &Frame) -> Vec<Frame> {
        if self.mode == SimulatorMode::Echo {
            return vec![frame.clone()];
        }
        if frame.validate().is_err() {
            return vec![encode_error(self.address, ErrorCode::Syntax)];
        }

        match frame.message_type() {
            Some(MessageType::Command | MessageType::Inquiry) => {}
            // Responses and bus management are not for us.
            _ => return Vec::new(),
        }

        let Some(command) = Command::recognize(frame) else {
            return vec![encode_error(self.address, ErrorCode::Syntax)];
        };
        let ack = encode_ack(self.address);
        match command {
            Command::PowerQuery => {
                let state = if self.powered { POWER_ON } else { POWER_OFF };
                self.complete(&[state])
            }
            Command::PowerOn => {
                self.powered = true;
                [vec![ack], self.complete(&[])].concat()
            }
            Command::PowerOff => {
                self.powered = false;
                self.recording = false;
                [vec![ack], self.complete(&[])].concat()
            }
            Command::Record | Command::RecordPause if !self.powered => {
                vec![encode_error(self.address, ErrorCode::PowerOff)]
            }
            Command::Record => {
                self.recording = true;
                [vec![ack], self.complete(&[])].concat()
            }
            Command::RecordPause => {
                self.recording = false;
                [vec![ack], self.complete(&[])].concat()
            }
        }
    }

    fn complete(&self, payload: &[u8]) -> Vec<Frame> {
        match encode_complete(self.address, payload) {
            Ok(frame) => vec![frame],
            Err(err) => {
                warn!(address = %self.address, error = %err, "cannot build completion");
                Vec::new()
            }
        }
    }

    /// Run on its own thread until `flag` is set or the link hangs up.
    pub fn spawn(self, flag: ShutdownFlag) -> Result<SimulatorHandle> {
        let address = self.address;
        let join = thread::Builder::new()
            .name(format!("visca-sim-{address}"))
            .spawn(move || self.run(flag))
            .map_err(RouteError::Spawn)?;
        Ok(SimulatorHandle { address, join })
    }

    fn run(mut self, flag: ShutdownFlag) -> u64 {
        info!(address = %self.address, mode = ?self.mode, "camera simulator started");
        let mut buffer = ReassemblyBuffer::new();
        let mut scratch = [0u8; 256];
        let mut handled = 0u64;

        while !flag.is_requested() {
            match self.channel.poll_readable(self.poll_timeout) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::Timeout) => continue,
                Ok(Readiness::Hangup) | Err(_) => break,
            }
            let n = match self.channel.read(&mut scratch) {
                Ok(ReadOutcome::Data(n)) => n,
                Ok(ReadOutcome::WouldBlock) => continue,
                Ok(ReadOutcome::Hangup) | Err(_) => break,
            };
            if let Err(err) = buffer.append(&scratch[..n]) {
                warn!(address = %self.address, error = %err, "simulator dropped chunk");
                continue;
            }
            let frames: Vec<Frame> = buffer.drain_frames().collect();
            for frame in frames {
                handled += 1;
                debug!(address = %self.address, frame = %frame, "camera received");
                for reply in self.respond(&frame) {
                    if let Err(err) = self.channel.write_all(reply.as_bytes()) {
                        warn!(address = %self.address, error = %err, "camera reply failed");
                    }
                }
            }
        }

        info!(address = %self.address, handled, "camera simulator stopped");
        handled
    }
}

impl std::fmt::Debug for CameraSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSimulator")
            .field("address", &self.address)
            .field("channel", &self.channel.label())
            .field("mode", &self.mode)
            .field("powered", &self.powered)
            .finish()
    }
}

/// A running simulator.
#[derive(Debug)]
pub struct SimulatorHandle {
    address: Address,
    join: JoinHandle<u64>,
}

impl SimulatorHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Wait for the simulator to stop; returns how many frames it handled.
    pub fn join(self) -> Result<u64> {
        self.join
            .join()
            .map_err(|_| RouteError::UnitPanicked(format!("simulator-{}", self.address)))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use viscaroute_frame::{decode, encode, Category};
    use viscaroute_transport::FdChannel;

    use super::*;

    fn simulator(mode: SimulatorMode) -> CameraSimulator {
        let (a, _b) = UnixStream::pair().expect("socket pair should open");
        CameraSimulator::new(
            Address::device(1).expect("address"),
            FdChannel::from_unix_stream(a, "cam"),
            mode,
        )
    }

    fn bytes(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.as_bytes().to_vec()).collect()
    }

    #[test]
    fn echo_returns_frame_unchanged() {
        let mut sim = simulator(SimulatorMode::Echo);
        let frame = Command::Record.encode(1).expect("encode");
        assert_eq!(sim.respond(&frame), vec![frame]);
    }

    #[test]
    fn power_cycle_and_query() {
        let mut sim = simulator(SimulatorMode::Respond);
        let query = Command::PowerQuery.encode(1).expect("encode");
        assert_eq!(bytes(&sim.respond(&query)), vec![vec![0x90, 0x51, 0x03, 0xFF]]);

        let on = Command::PowerOn.encode(1).expect("encode");
        assert_eq!(
            bytes(&sim.respond(&on)),
            vec![vec![0x90, 0x05, 0xFF], vec![0x90, 0x51, 0xFF]]
        );
        assert!(sim.is_powered());
        assert_eq!(bytes(&sim.respond(&query)), vec![vec![0x90, 0x51, 0x02, 0xFF]]);
    }

    #[test]
    fn record_needs_power() {
        let mut sim = simulator(SimulatorMode::Respond);
        let record = Command::Record.encode(1).expect("encode");
        assert_eq!(bytes(&sim.respond(&record)), vec![vec![0x90, 0x61, 0x40, 0xFF]]);

        sim.respond(&Command::PowerOn.encode(1).expect("encode"));
        assert_eq!(sim.respond(&record).len(), 2);
        assert!(sim.is_recording());
    }

    #[test]
    fn unknown_command_is_syntax_error() {
        let mut sim = simulator(SimulatorMode::Respond);
        let frame = encode(1, MessageType::Command, Some(Category::System), &[0x7E]).expect("encode");
        assert_eq!(bytes(&sim.respond(&frame)), vec![vec![0x90, 0x61, 0x02, 0xFF]]);
    }

    #[test]
    fn responses_are_ignored() {
        let mut sim = simulator(SimulatorMode::Respond);
        let ack = decode(&[0x90, 0x05, 0xFF]).expect("decode");
        assert!(sim.respond(&ack).is_empty());
    }
}
