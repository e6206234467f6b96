use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use viscaroute_frame::codec::hex;
use viscaroute_frame::{inspect, Frame, Inspection};
use viscaroute_router::{RouteEvent, RouteOutcome, UnitReport};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    source: &'a str,
    bytes: String,
    length: usize,
    sender: u8,
    receiver: u8,
    message_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'a str>,
    timestamp: String,
}

impl<'a> FrameOutput<'a> {
    fn new(source: &'a str, frame: &Frame, info: &'a Inspection) -> Self {
        Self {
            source,
            bytes: info.bytes.clone(),
            length: frame.len(),
            sender: info.sender,
            receiver: info.receiver,
            message_type: info.message_type_name(),
            category: info.category.map(|c| c.name()),
            payload: hex(&info.payload),
            command: info.command.map(|c| c.name()),
            error_code: info.error_code.map(|c| c.name()),
            timestamp: now_unix_seconds(),
        }
    }
}

/// Print one frame with its inspection. `source` says where it came from.
pub fn print_frame(frame: &Frame, source: &str, format: OutputFormat) {
    let info = inspect(frame);
    match format {
        OutputFormat::Json => {
            let out = FrameOutput::new(source, frame, &info);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "BYTES", "TYPE", "COMMAND"])
                .add_row(vec![
                    source.to_string(),
                    info.bytes.clone(),
                    info.message_type_name().to_string(),
                    info.command.map_or("-", |c| c.name()).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("[{source}]");
            println!("{info}");
        }
        OutputFormat::Raw => print_raw(frame.as_bytes()),
    }
}

#[derive(Serialize)]
struct RouteOutput<'a> {
    origin: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<u8>,
    delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    frame: FrameOutput<'a>,
}

pub fn print_route_event(event: &RouteEvent, format: OutputFormat) {
    let (delivered, reason) = match &event.outcome {
        RouteOutcome::Delivered => (true, None),
        RouteOutcome::Dropped(reason) => (false, Some(reason.as_str())),
    };
    let source = event.origin.role();
    match format {
        OutputFormat::Json => {
            let info = inspect(&event.frame);
            let out = RouteOutput {
                origin: event.origin.get(),
                destination: event.destination.map(|d| d.get()),
                delivered,
                reason,
                frame: FrameOutput::new(source, &event.frame, &info),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Pretty | OutputFormat::Table => {
            let destination = event
                .destination
                .map_or_else(|| "-".to_string(), |d| d.to_string());
            let status = match reason {
                None => "delivered".to_string(),
                Some(reason) => format!("dropped ({reason})"),
            };
            println!(
                "{} -> {}  {}  {}",
                event.origin, destination, event.frame, status
            );
        }
        OutputFormat::Raw => print_raw(event.frame.as_bytes()),
    }
}

#[derive(Serialize)]
struct UnitOutput<'a> {
    unit: &'a str,
    address: u8,
    exit: String,
    frames_routed: u64,
    frames_dropped: u64,
    pending_bytes: usize,
}

pub fn print_units(units: &[UnitReport], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<UnitOutput<'_>> = units
                .iter()
                .map(|unit| UnitOutput {
                    unit: &unit.name,
                    address: unit.address.get(),
                    exit: unit.exit.to_string(),
                    frames_routed: unit.frames_routed,
                    frames_dropped: unit.frames_dropped,
                    pending_bytes: unit.pending_bytes,
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["UNIT", "ADDRESS", "EXIT", "ROUTED", "DROPPED", "PENDING"]);
            for unit in units {
                table.add_row(vec![
                    unit.name.clone(),
                    unit.address.to_string(),
                    unit.exit.to_string(),
                    unit.frames_routed.to_string(),
                    unit.frames_dropped.to_string(),
                    unit.pending_bytes.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
