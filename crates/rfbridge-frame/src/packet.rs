use std::collections::BTreeMap;

use bytes::Bytes;

use crate::channel::Channel;
use crate::error::{FrameError, Result};

/// Field carrying the packet type.
pub const TYPE_FIELD: &str = "tp";

/// Application packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Unsolicited sensor or state report (`tp ev`).
    Event,
    /// Device polling for a deferred command (`tp rq`).
    Request,
    /// Device reply to an earlier command (`tp rs`).
    Response,
}

impl PacketKind {
    fn from_field(value: &str) -> Option<Self> {
        match value {
            "ev" => Some(Self::Event),
            "rq" => Some(Self::Request),
            "rs" => Some(Self::Response),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "ev",
            Self::Request => "rq",
            Self::Response => "rs",
        }
    }
}

/// A fully reassembled packet, payload without the sentinel byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: Channel,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Parse the payload's fields and classify the packet.
    pub fn parse(&self) -> Result<ParsedPacket> {
        let mut fields = parse_fields(&self.payload)?;
        let kind = match fields.remove(TYPE_FIELD) {
            Some(value) => PacketKind::from_field(&value).ok_or_else(|| {
                FrameError::malformed(format!("unknown packet type '{value}'"))
            })?,
            None => return Err(FrameError::malformed("missing 'tp' field")),
        };
        Ok(ParsedPacket {
            channel: self.channel,
            kind,
            fields,
        })
    }
}

/// A packet with its fields decoded. `fields` excludes the `tp` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub channel: Channel,
    pub kind: PacketKind,
    pub fields: BTreeMap<String, String>,
}

/// Parse a `key value,key value` payload.
///
/// Each pair is split at its first space. Empty pairs, pairs without a
/// space and empty keys are rejected rather than skipped.
pub fn parse_fields(payload: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| FrameError::malformed("payload is not valid UTF-8"))?;

    let mut fields = BTreeMap::new();
    for pair in text.split(',') {
        let (key, value) = pair
            .split_once(' ')
            .ok_or_else(|| FrameError::malformed(format!("field '{pair}' has no value")))?;
        if key.is_empty() {
            return Err(FrameError::malformed(format!("field '{pair}' has no key")));
        }
        fields.insert(key.to_string(), value.to_string());
    }
    Ok(fields)
}
