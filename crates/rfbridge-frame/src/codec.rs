use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// Terminal byte marking the last fragment of a packet (ASCII ETB).
pub const SENTINEL: u8 = 0x17;

/// Command bytes the firmware can buffer per write.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// What a command asks the receiver on a channel to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// Passed to the device verbatim (learned IR programs, firmware-specific verbs).
    Raw(String),
    /// Direct command to the receiver on the channel.
    Command(String),
    /// Command broadcast to every receiver listening on the channel.
    Broadcast(String),
    /// No-op answer to a poll when nothing is queued.
    Empty,
}

impl Instruction {
    /// Instruction text as it appears on the wire after the channel byte.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Raw(exec) => f.write_str(exec),
            Instruction::Command(exec) => write!(f, "c{exec}"),
            Instruction::Broadcast(exec) => write!(f, "b{exec}"),
            Instruction::Empty => f.write_str("e"),
        }
    }
}

/// Encode a raw instruction for `channel`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┬──────┐
/// │ Channel (1B) │ Instruction      │ '\n' │
/// │ '0'..'9'     │ (any length)     │      │
/// └──────────────┴──────────────────┴──────┘
/// ```
pub fn encode_command(channel: Channel, instruction: &str) -> Bytes {
    let mut dst = BytesMut::with_capacity(instruction.len() + 2);
    dst.put_u8(channel.wire_byte());
    dst.put_slice(instruction.as_bytes());
    dst.put_u8(b'\n');
    dst.freeze()
}

/// Encode a typed instruction for `channel`.
pub fn encode_instruction(channel: Channel, instruction: &Instruction) -> Bytes {
    encode_command(channel, &instruction.render())
}

/// Split an encoded command into write-sized chunks.
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(chunk_size.max(1))
}

/// Acknowledgement tokens the firmware answers command chunks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckToken {
    /// Chunk buffered; send the next one.
    Next,
    /// Still working; keep waiting.
    Ack,
    /// Device input buffer overflowed.
    Overflow,
    /// Device gave up waiting for the rest of the command.
    Timeout,
    /// Device could not execute the command.
    Fail,
    /// Command executed.
    Success,
}

impl AckToken {
    /// Parse a received line. Returns `None` for anything that is not a token.
    pub fn parse(line: &[u8]) -> Option<Self> {
        match line {
            b":next:" => Some(Self::Next),
            b":ack:" => Some(Self::Ack),
            b":overflow:" => Some(Self::Overflow),
            b":timeout:" => Some(Self::Timeout),
            b":fail:" => Some(Self::Fail),
            b":success:" => Some(Self::Success),
            _ => None,
        }
    }

    /// Token text as sent by the device.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Next => ":next:",
            Self::Ack => ":ack:",
            Self::Overflow => ":overflow:",
            Self::Timeout => ":timeout:",
            Self::Fail => ":fail:",
            Self::Success => ":success:",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: u8) -> Channel {
        Channel::new(id).unwrap()
    }

    #[test]
    fn encode_command_prefixes_channel_and_terminates() {
        assert_eq!(encode_command(ch(3), "con").as_ref(), b"3con\n");
        assert_eq!(encode_command(ch(0), "").as_ref(), b"0\n");
    }

    #[test]
    fn instructions_render_their_verb() {
        assert_eq!(
            encode_instruction(ch(2), &Instruction::Command("on".into())).as_ref(),
            b"2con\n"
        );
        assert_eq!(
            encode_instruction(ch(2), &Instruction::Broadcast("off".into())).as_ref(),
            b"2boff\n"
        );
        assert_eq!(
            encode_instruction(ch(5), &Instruction::Empty).as_ref(),
            b"5e\n"
        );
        assert_eq!(
            encode_instruction(ch(1), &Instruction::Raw("i1 500 1500".into())).as_ref(),
            b"1i1 500 1500\n"
        );
    }

    #[test]
    fn instruction_json_shape() {
        let parsed: Instruction = serde_json::from_str(r#"{"command":"on"}"#).unwrap();
        assert_eq!(parsed, Instruction::Command("on".into()));
        let empty: Instruction = serde_json::from_str(r#""empty""#).unwrap();
        assert_eq!(empty, Instruction::Empty);
    }

    #[test]
    fn split_chunks_respects_size() {
        let payload = vec![b'x'; 130];
        let sizes: Vec<usize> = split_chunks(&payload, 64).map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![64, 64, 2]);
    }

    #[test]
    fn ack_tokens_parse_exactly() {
        for token in [
            AckToken::Next,
            AckToken::Ack,
            AckToken::Overflow,
            AckToken::Timeout,
            AckToken::Fail,
            AckToken::Success,
        ] {
            assert_eq!(AckToken::parse(token.as_str().as_bytes()), Some(token));
        }
        assert_eq!(AckToken::parse(b"next"), None);
        assert_eq!(AckToken::parse(b"10tp ev\x17"), None);
    }
}
