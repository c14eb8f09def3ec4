//! Radio channel ids.
//!
//! One serial link multiplexes up to ten radio pipes. A channel travels on
//! the wire as a single ASCII digit, the first byte of every frame.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Highest channel id addressable on one link.
pub const MAX_CHANNEL: u8 = 9;

/// A logical radio pipe on one serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    /// Create a channel from its numeric id.
    pub fn new(id: u8) -> Result<Self> {
        if id > MAX_CHANNEL {
            return Err(FrameError::InvalidChannel(id));
        }
        Ok(Self(id))
    }

    /// Decode the wire byte (`b'0'..=b'9'`).
    pub fn from_wire(byte: u8) -> Result<Self> {
        if byte.is_ascii_digit() {
            Ok(Self(byte - b'0'))
        } else {
            Err(FrameError::InvalidChannel(byte))
        }
    }

    /// Numeric id.
    pub fn id(self) -> u8 {
        self.0
    }

    /// Wire byte for this channel.
    pub fn wire_byte(self) -> u8 {
        b'0' + self.0
    }

    /// Wire character for this channel.
    pub fn as_char(self) -> char {
        char::from(self.wire_byte())
    }
}

impl TryFrom<u8> for Channel {
    type Error = FrameError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip_for_every_channel() {
        for id in 0..=MAX_CHANNEL {
            let channel = Channel::new(id).unwrap();
            assert_eq!(Channel::from_wire(channel.wire_byte()).unwrap(), channel);
        }
    }

    #[test]
    fn rejects_out_of_range_ids() {
        assert_eq!(Channel::new(10), Err(FrameError::InvalidChannel(10)));
        assert_eq!(Channel::from_wire(b'a'), Err(FrameError::InvalidChannel(b'a')));
    }

    #[test]
    fn serde_uses_numeric_id() {
        let channel: Channel = serde_json::from_str("7").unwrap();
        assert_eq!(channel.as_char(), '7');
        assert_eq!(serde_json::to_string(&channel).unwrap(), "7");
        assert!(serde_json::from_str::<Channel>("12").is_err());
    }
}
