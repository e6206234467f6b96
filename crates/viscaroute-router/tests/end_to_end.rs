//! Full harness runs over socket pairs.

use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use viscaroute_frame::{encode_ack, encode_complete, Address, Command};
use viscaroute_router::{
    CameraSimulator, EndpointRegistry, ExitReason, Harness, HarnessConfig, RouteOutcome,
    RouterConfig, ShutdownFlag, SimulatorMode,
};
use viscaroute_transport::{Channel, FdChannel, ReadOutcome, Readiness};

fn pair(label: &str) -> (FdChannel, FdChannel) {
    let (a, b) = UnixStream::pair().expect("socket pair should open");
    (
        FdChannel::from_unix_stream(a, label),
        FdChannel::from_unix_stream(b, format!("{label}-peer")),
    )
}

fn device(raw: u8) -> Address {
    Address::device(raw).expect("valid device address")
}

fn fast() -> HarnessConfig {
    HarnessConfig {
        poll_timeout: Duration::from_millis(25),
        ..HarnessConfig::default()
    }
}

/// Read until `want` bytes arrived or the deadline passes.
fn read_exact(channel: &mut FdChannel, want: usize, deadline: Duration) -> Vec<u8> {
    let start = Instant::now();
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    while out.len() < want && start.elapsed() < deadline {
        match channel
            .poll_readable(Duration::from_millis(50))
            .expect("poll should succeed")
        {
            Readiness::Ready => match channel.read(&mut buf).expect("read should succeed") {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::WouldBlock => {}
                ReadOutcome::Hangup => break,
            },
            Readiness::Timeout => {}
            Readiness::Hangup => break,
        }
    }
    out
}

#[test]
fn console_commands_reach_device_one() {
    let mut registry = EndpointRegistry::new();
    let (ctl, _ctl_peer) = pair("ctl");
    let (cam, mut cam_peer) = pair("cam1");
    let (console, mut operator) = pair("console");
    registry.register(Address::CONTROLLER, ctl).expect("register ctl");
    registry.register(device(1), cam).expect("register cam");

    let handle = Harness::new(registry, RouterConfig::default(), fast())
        .with_console(console)
        .spawn()
        .expect("spawn should succeed");

    operator.write_all(b"1\n3\nquit\n").expect("console write");
    let report = handle.join().expect("join should succeed");

    let received = read_exact(&mut cam_peer, 11, Duration::from_secs(2));
    assert_eq!(
        received,
        vec![0x81, 0x09, 0x02, 0x00, 0x02, 0xFF, 0x81, 0x09, 0x02, 0x00, 0xFF]
    );

    assert!(report.units.iter().all(|u| u.exit == ExitReason::Shutdown));
    assert!(report.units.iter().all(|u| u.pending_bytes == 0));
    assert_eq!(report.stats.delivered, 2);
    assert_eq!(
        report.unit(Address::CONTROLLER).map(|u| u.frames_routed),
        Some(2)
    );
}

#[test]
fn unknown_console_tokens_are_not_forwarded() {
    let mut registry = EndpointRegistry::new();
    let (cam, mut cam_peer) = pair("cam1");
    let (console, mut operator) = pair("console");
    registry.register(device(1), cam).expect("register cam");

    let handle = Harness::new(registry, RouterConfig::default(), fast())
        .with_console(console)
        .spawn()
        .expect("spawn should succeed");

    operator.write_all(b"zoom\n\n9\nEXIT\n").expect("console write");
    let report = handle.join().expect("join should succeed");

    assert!(read_exact(&mut cam_peer, 1, Duration::from_millis(200)).is_empty());
    assert_eq!(report.stats.delivered, 0);
}

#[test]
fn split_device_response_reaches_controller_intact() {
    let mut registry = EndpointRegistry::new();
    let (ctl, mut ctl_peer) = pair("ctl");
    let (cam, mut cam_peer) = pair("cam3");
    registry.register(Address::CONTROLLER, ctl).expect("register ctl");
    registry.register(device(3), cam).expect("register cam");

    let (tx, rx) = mpsc::channel();
    let handle = Harness::new(registry, RouterConfig::default(), fast())
        .with_tap(tx)
        .spawn()
        .expect("spawn should succeed");

    let mut response = encode_ack(device(3)).as_bytes().to_vec();
    response.extend_from_slice(
        encode_complete(device(3), &[0x02])
            .expect("encode")
            .as_bytes(),
    );
    for byte in &response {
        cam_peer.write_all(&[*byte]).expect("device write");
        std::thread::sleep(Duration::from_millis(2));
    }

    let received = read_exact(&mut ctl_peer, response.len(), Duration::from_secs(2));
    assert_eq!(received, response);

    handle.shutdown();
    let report = handle.join().expect("join should succeed");
    assert_eq!(report.unit(device(3)).map(|u| u.frames_routed), Some(2));

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.origin == device(3)
        && e.destination == Some(Address::CONTROLLER)
        && e.outcome == RouteOutcome::Delivered));
}

#[test]
fn controller_bytes_route_to_configured_target() {
    let mut registry = EndpointRegistry::new();
    let (ctl, mut client) = pair("ctl");
    let (cam1, mut cam1_peer) = pair("cam1");
    let (cam2, mut cam2_peer) = pair("cam2");
    registry.register(Address::CONTROLLER, ctl).expect("register ctl");
    registry.register(device(1), cam1).expect("register cam1");
    registry.register(device(2), cam2).expect("register cam2");

    let config = RouterConfig {
        target: device(2),
        ..RouterConfig::default()
    };
    let handle = Harness::new(registry, config, fast())
        .spawn()
        .expect("spawn should succeed");

    let frame = Command::Record.encode(2).expect("encode");
    let (head, tail) = frame.as_bytes().split_at(2);
    client.write_all(head).expect("client write");
    std::thread::sleep(Duration::from_millis(30));
    client.write_all(tail).expect("client write");

    assert_eq!(
        read_exact(&mut cam2_peer, frame.len(), Duration::from_secs(2)),
        frame.as_bytes()
    );
    assert!(read_exact(&mut cam1_peer, 1, Duration::from_millis(100)).is_empty());

    handle.shutdown();
    handle.join().expect("join should succeed");
}

#[test]
fn simulated_camera_answers_through_the_router() {
    let mut registry = EndpointRegistry::new();
    let (ctl, mut client) = pair("ctl");
    let (cam, cam_side) = pair("cam1");
    registry.register(Address::CONTROLLER, ctl).expect("register ctl");
    registry.register(device(1), cam).expect("register cam");

    let flag = ShutdownFlag::new();
    let simulator = CameraSimulator::new(device(1), cam_side, SimulatorMode::Respond)
        .with_poll_timeout(Duration::from_millis(25))
        .spawn(flag.clone())
        .expect("simulator should start");
    let handle = Harness::new(registry, RouterConfig::default(), fast())
        .with_shutdown_flag(flag.clone())
        .spawn()
        .expect("spawn should succeed");

    let on = Command::PowerOn.encode(1).expect("encode");
    client.write_all(on.as_bytes()).expect("client write");
    let reply = read_exact(&mut client, 6, Duration::from_secs(2));
    assert_eq!(reply, vec![0x90, 0x05, 0xFF, 0x90, 0x51, 0xFF]);

    let query = Command::PowerQuery.encode(1).expect("encode");
    client.write_all(query.as_bytes()).expect("client write");
    let reply = read_exact(&mut client, 4, Duration::from_secs(2));
    assert_eq!(reply, vec![0x90, 0x51, 0x02, 0xFF]);

    flag.request();
    handle.join().expect("join should succeed");
    assert_eq!(simulator.join().expect("simulator join"), 2);
}
