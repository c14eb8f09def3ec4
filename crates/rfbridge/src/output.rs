use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rfbridge_frame::Channel;
use rfbridge_session::{CommandResult, Notification, NotificationSink};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

/// Prints session notifications to stdout, one record per notification.
pub struct StdoutSink {
    format: OutputFormat,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl NotificationSink for StdoutSink {
    fn notify(&self, notification: Notification) {
        emit(&render_notification(&notification, self.format));
    }
}

#[derive(Serialize)]
struct IrOutput<'a> {
    channel: Channel,
    ir_signal: &'a str,
}

pub fn print_ir(channel: Channel, signal: &str, format: OutputFormat) {
    let text = match format {
        OutputFormat::Json => serde_json::to_string(&IrOutput {
            channel,
            ir_signal: signal,
        })
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "IR SIGNAL"])
                .add_row(vec![channel.to_string(), signal.to_string()]);
            table.to_string()
        }
        OutputFormat::Pretty => signal.to_string(),
    };
    emit(&text);
}

pub fn render_notification(notification: &Notification, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(notification).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "CHANNEL", "ORIGIN", "RESULT", "DETAIL"])
                .add_row(row(notification));
            table.to_string()
        }
        OutputFormat::Pretty => {
            let [kind, channel, origin, result, detail] = row(notification);
            let mut line = kind;
            for (key, value) in [
                ("channel", channel),
                ("origin", origin),
                ("result", result),
                ("detail", detail),
            ] {
                if !value.is_empty() {
                    line.push_str(&format!(" {key}={value}"));
                }
            }
            line
        }
    }
}

fn row(notification: &Notification) -> [String; 5] {
    match notification {
        Notification::Event { channel, fields } => {
            let detail = fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            [
                "event".into(),
                channel.to_string(),
                String::new(),
                String::new(),
                detail,
            ]
        }
        Notification::Response {
            result,
            origin_id,
            error_kind,
        } => [
            "response".into(),
            String::new(),
            origin_id.clone().unwrap_or_default(),
            result_name(*result).into(),
            error_kind.map(|k| k.to_string()).unwrap_or_default(),
        ],
        Notification::Ir {
            result,
            origin_id,
            ir_signal,
        } => [
            "ir".into(),
            String::new(),
            origin_id.clone().unwrap_or_default(),
            result_name(*result).into(),
            ir_signal.clone().unwrap_or_default(),
        ],
    }
}

fn result_name(result: CommandResult) -> &'static str {
    match result {
        CommandResult::Success => "success",
        CommandResult::Error => "error",
    }
}

fn emit(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{text}");
    let _ = out.flush();
}
