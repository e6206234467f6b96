use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use tracing::{info, warn};
use viscaroute_frame::Address;
use viscaroute_router::{
    BackoffPolicy, CameraSimulator, EndpointRegistry, Harness, HarnessConfig, RouteEvent,
    RouterConfig, ShutdownFlag, SimulatorHandle, SimulatorMode,
};
use viscaroute_transport::{BaudRate, FdChannel, LineConfig, Pty};

use crate::cmd::{parse_duration, CameraMode, ControllerArgs};
use crate::exit::{
    frame_error, route_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS,
};
use crate::output::{print_route_event, print_units, OutputFormat};

pub fn run(args: ControllerArgs, format: OutputFormat) -> CliResult<i32> {
    let poll_timeout = parse_duration(&args.poll_timeout)?;
    let router_config = router_config(&args)?;
    let harness_config = HarnessConfig {
        poll_timeout,
        ..HarnessConfig::default()
    };
    let line = LineConfig {
        baud: BaudRate::new(args.baud).map_err(|err| transport_error("invalid baud", err))?,
        ..LineConfig::default()
    };

    let flag = ShutdownFlag::new();
    install_ctrlc_handler(flag.clone())?;

    // Every pty stays alive until the harness has stopped.
    let mut ptys = Vec::with_capacity(usize::from(args.cameras) + 1);
    let mut registry = EndpointRegistry::new();
    let mut simulators = Vec::new();

    let controller = Pty::open(&line).map_err(|err| transport_error("pty allocation failed", err))?;
    register(&mut registry, Address::CONTROLLER, &controller)?;
    eprintln!("controller: {}", controller.slave_path().display());
    ptys.push(controller);

    for raw in 1..=args.cameras {
        let address = Address::device(raw).map_err(|err| frame_error("invalid camera", err))?;
        let pty = Pty::open(&line).map_err(|err| transport_error("pty allocation failed", err))?;
        register(&mut registry, address, &pty)?;
        match args.camera_mode {
            CameraMode::External => {
                eprintln!("camera {address}: {}", pty.slave_path().display());
            }
            CameraMode::Respond | CameraMode::Echo => {
                let mode = if args.camera_mode == CameraMode::Echo {
                    SimulatorMode::Echo
                } else {
                    SimulatorMode::Respond
                };
                let channel = pty
                    .slave_channel()
                    .map_err(|err| transport_error("pty slave unavailable", err))?;
                let simulator = CameraSimulator::new(address, channel, mode)
                    .with_poll_timeout(poll_timeout)
                    .spawn(flag.clone())
                    .map_err(|err| route_error("simulator start failed", err))?;
                simulators.push(simulator);
            }
        }
        ptys.push(pty);
    }

    if router_config.target.get() > args.cameras {
        warn!(
            camera = %router_config.target,
            cameras = args.cameras,
            "target camera is not attached; controller frames will be dropped"
        );
    }

    let (tap, events) = mpsc::channel::<RouteEvent>();
    let mut harness = Harness::new(registry, router_config, harness_config)
        .with_shutdown_flag(flag.clone())
        .with_tap(tap);
    if !args.no_console {
        let console =
            FdChannel::stdin().map_err(|err| transport_error("console unavailable", err))?;
        harness = harness.with_console(console);
    }

    let handle = harness
        .spawn()
        .map_err(|err| route_error("harness start failed", err))?;
    info!(
        cameras = args.cameras,
        mode = ?args.camera_mode,
        units = handle.unit_count(),
        "controller running"
    );

    while !handle.is_finished() {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => print_route_event(&event, format),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let report = handle
        .join()
        .map_err(|err| route_error("harness failed", err))?;
    for event in events.try_iter() {
        print_route_event(&event, format);
    }
    flag.request();
    join_simulators(simulators);
    drop(ptys);

    print_units(&report.units, format);
    info!(
        delivered = report.stats.delivered,
        dropped = report.stats.dropped,
        hangups = report.stats.hangups,
        "controller stopped"
    );
    Ok(SUCCESS)
}

fn router_config(args: &ControllerArgs) -> CliResult<RouterConfig> {
    let initial = parse_duration(&args.hangup_backoff)?;
    let hangup_backoff = match &args.backoff_max {
        Some(max) => BackoffPolicy::Exponential {
            initial,
            max: parse_duration(max)?,
        },
        None => BackoffPolicy::Fixed(initial),
    };
    Ok(RouterConfig {
        write_timeout: parse_duration(&args.write_timeout)?,
        hangup_backoff,
        target: Address::device(args.target).map_err(|err| frame_error("invalid target", err))?,
    })
}

fn register(registry: &mut EndpointRegistry, address: Address, pty: &Pty) -> CliResult<()> {
    let channel = pty
        .master_channel()
        .map_err(|err| transport_error("pty master unavailable", err))?;
    registry
        .register(address, channel)
        .map_err(|err| route_error("endpoint registration failed", err))
}

fn join_simulators(simulators: Vec<SimulatorHandle>) {
    for simulator in simulators {
        let address = simulator.address();
        match simulator.join() {
            Ok(handled) => info!(%address, handled, "camera simulator joined"),
            Err(err) => warn!(%address, error = %err, "camera simulator failed"),
        }
    }
}

fn install_ctrlc_handler(flag: ShutdownFlag) -> CliResult<()> {
    ctrlc::set_handler(move || flag.request()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}
