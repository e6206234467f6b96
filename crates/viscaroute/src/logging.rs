use clap::ValueEnum;
use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter};

/// Extra filter directives, e.g. `viscaroute_router=trace`.
pub const LOG_DIRECTIVES_ENV: &str = "VISCAROUTE_LOG";

/// Crates whose events follow `--log-level`; everything else stays at `warn`.
const OWN_TARGETS: [&str; 4] = [
    "viscaroute",
    "viscaroute_transport",
    "viscaroute_frame",
    "viscaroute_router",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// `--log-level` applied to the viscaroute crates, then any extra
/// directives layered on top. Unparseable extras are skipped.
fn build_filter(level: LogLevel, extra: Option<&str>) -> EnvFilter {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::WARN.into());
    for target in OWN_TARGETS {
        if let Ok(directive) = format!("{target}={}", level.as_str()).parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    for raw in extra.unwrap_or_default().split(',').map(str::trim) {
        if raw.is_empty() {
            continue;
        }
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(err) => eprintln!("ignoring log directive {raw:?}: {err}"),
        }
    }
    filter
}

/// Install the stderr subscriber. Thread names identify execution units
/// (`visca-intake`, `visca-device-N`, `visca-sim-N`).
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let extra = std::env::var(LOG_DIRECTIVES_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, extra.as_deref()))
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
}
