use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hostipc_frame::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result printable in every output format.
pub trait Report: Serialize {
    /// Header line for the pretty format.
    fn title(&self) -> String;
    /// Ordered key/value rows for table and pretty formats.
    fn fields(&self) -> Vec<(&'static str, String)>;
    /// The single most useful value, for the raw format.
    fn raw(&self) -> String;
}

pub fn print_report<R: Report>(report: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in report.fields() {
                table.add_row(vec![key.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let fields: Vec<String> = report
                .fields()
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            println!("{} {}", report.title(), fields.join(" "));
        }
        OutputFormat::Raw => print_line(&report.raw()),
    }
}

#[derive(Serialize)]
struct MessageOutput {
    index: usize,
    tag: u32,
    kind: &'static str,
    value: serde_json::Value,
}

impl MessageOutput {
    fn new(index: usize, message: &Message) -> Self {
        let value = match message {
            Message::UInt32(v) => serde_json::Value::from(*v),
            // Non-finite floats have no JSON form and become null.
            Message::Float64(v) => serde_json::Value::from(*v),
            Message::String(s) => serde_json::Value::from(s.as_str()),
        };
        Self {
            index,
            tag: message.tag(),
            kind: message.kind(),
            value,
        }
    }
}

/// Print one received message. JSON prints one object per line so a stream
/// of messages stays line-delimited.
pub fn print_message(index: usize, message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&MessageOutput::new(index, message)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "KIND", "SIZE", "VALUE"])
                .add_row(vec![
                    index.to_string(),
                    message.kind().to_string(),
                    message.wire_size().to_string(),
                    message.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("#{index} {}:{message}", message.kind()),
        OutputFormat::Raw => print_line(&message.to_string()),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print a line and flush, so readers of a pipe see it immediately.
pub fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
