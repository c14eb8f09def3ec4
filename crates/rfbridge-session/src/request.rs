use std::time::Duration;

use bytes::Bytes;
use rfbridge_frame::{encode_instruction, Channel, Instruction};
use serde::{Deserialize, Serialize};

/// A command asked of the session by the surrounding application.
///
/// With `expire_after_ms` set the command waits in the request buffer until
/// the device on `channel` polls for it; otherwise it is sent right away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub channel: Channel,
    pub instruction: Instruction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

impl CommandRequest {
    /// An immediate command.
    pub fn new(channel: Channel, instruction: Instruction) -> Self {
        Self {
            channel,
            instruction,
            expire_after_ms: None,
            origin_id: None,
        }
    }

    /// Tag results of this command with `origin_id`.
    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    /// Hold the command for the device's next poll, for at most `expire_after`.
    pub fn deferred(mut self, expire_after: Duration) -> Self {
        self.expire_after_ms = Some(u64::try_from(expire_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// How long the command may wait for a poll, if it is poll-driven.
    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after_ms.map(Duration::from_millis)
    }

    /// Encode into a queue item.
    pub fn to_outbound(&self) -> OutboundItem {
        OutboundItem {
            payload: encode_instruction(self.channel, &self.instruction),
            origin_id: self.origin_id.clone(),
            channel: Some(self.channel),
        }
    }
}

/// A fully encoded command waiting for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    /// Wire bytes, newline included.
    pub payload: Bytes,
    /// Correlates the result notification with its request.
    pub origin_id: Option<String>,
    /// Target channel, when known.
    pub channel: Option<Channel>,
}

impl OutboundItem {
    pub fn new(payload: impl Into<Bytes>, origin_id: Option<String>) -> Self {
        Self {
            payload: payload.into(),
            origin_id,
            channel: None,
        }
    }

    /// No-op answer to a poll on `channel`.
    pub fn empty(channel: Channel) -> Self {
        Self {
            payload: encode_instruction(channel, &Instruction::Empty),
            origin_id: None,
            channel: Some(channel),
        }
    }
}
