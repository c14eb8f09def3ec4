//! Outward notifications and the sinks that deliver them.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rfbridge_frame::{compress_signal, AckToken, Channel};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Outcome reported for a command or IR learn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    Success,
    Error,
}

/// Why a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// Device reported `:overflow:`.
    Overflow,
    /// Device reported `:timeout:`.
    Timeout,
    /// Device reported `:fail:`.
    Fail,
    /// No acknowledgement arrived before the chunk deadline.
    WaitingTimeout,
    /// The serial link failed before the command finished, or before it was sent.
    LinkFailed,
}

impl CommandErrorKind {
    /// Error kind carried by a device error token.
    pub fn from_token(token: AckToken) -> Option<Self> {
        match token {
            AckToken::Overflow => Some(Self::Overflow),
            AckToken::Timeout => Some(Self::Timeout),
            AckToken::Fail => Some(Self::Fail),
            AckToken::Next | AckToken::Ack | AckToken::Success => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Timeout => "timeout",
            Self::Fail => "fail",
            Self::WaitingTimeout => "waiting_timeout",
            Self::LinkFailed => "link_failed",
        }
    }
}

impl fmt::Display for CommandErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message leaving a device session.
///
/// Serialized with a `type` tag:
/// ```json
/// {"type":"event","channel":3,"fields":{"t":"21.50"}}
/// {"type":"response","result":"error","origin_id":"req-7","error_kind":"fail"}
/// {"type":"ir","result":"success","ir_signal":"i3 500 1500 9000 4500 [2a3b] 2000"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A complete `ev` packet.
    Event {
        channel: Channel,
        fields: BTreeMap<String, String>,
    },
    /// Result of one dispatched command.
    Response {
        result: CommandResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<CommandErrorKind>,
    },
    /// Result of an IR learn request.
    Ir {
        result: CommandResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ir_signal: Option<String>,
    },
}

impl Notification {
    pub fn success(origin_id: Option<String>) -> Self {
        Self::Response {
            result: CommandResult::Success,
            origin_id,
            error_kind: None,
        }
    }

    pub fn failure(origin_id: Option<String>, kind: CommandErrorKind) -> Self {
        Self::Response {
            result: CommandResult::Error,
            origin_id,
            error_kind: Some(kind),
        }
    }

    /// Short name of the notification type, as used in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Response { .. } => "response",
            Self::Ir { .. } => "ir",
        }
    }
}

/// Compress a learned IR capture into an [`Notification::Ir`].
///
/// Captures that cannot be compressed (too short, garbled, or missing a
/// bit class) produce an error result instead of a signal.
pub fn learn_ir(channel: Channel, capture: &str, origin_id: Option<String>) -> Notification {
    match compress_signal(channel, capture) {
        Ok(signal) => Notification::Ir {
            result: CommandResult::Success,
            origin_id,
            ir_signal: Some(signal),
        },
        Err(err) => {
            warn!(%channel, error = %err, "cannot compress learned IR signal");
            Notification::Ir {
                result: CommandResult::Error,
                origin_id,
                ir_signal: None,
            }
        }
    }
}

/// Destination for session notifications.
///
/// Shared by every worker of a session (and possibly several sessions), so
/// implementations must serialize their own writes.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes each notification as one line of JSON.
pub struct JsonLineSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> NotificationSink for JsonLineSink<W> {
    fn notify(&self, notification: Notification) {
        let mut line = match serde_json::to_vec(&notification) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "cannot serialize notification");
                return;
            }
        };
        line.push(b'\n');

        let mut out = self.out.lock();
        let written = out.write_all(&line);
        if let Err(err) = written.and_then(|()| out.flush()) {
            warn!(error = %err, kind = notification.kind(), "dropping notification");
        }
    }
}

/// Forwards notifications into a channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("notification receiver dropped");
        }
    }
}
