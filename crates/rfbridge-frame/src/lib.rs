//! Line framing for the microcontroller serial protocol.
//!
//! Outbound, commands are rendered as `<channel><instruction>\n` and sent in
//! chunks the device acknowledges token by token. Inbound, every line is a
//! fragment `<channel><seq><payload>[0x17]`; the [`Reassembler`] stitches
//! fragments back into per-channel packets of `key value` fields.
//!
//! The [`ir`] module compresses learned infrared pulse trains into the
//! run-length instruction format the firmware replays.

pub mod channel;
pub mod codec;
pub mod error;
pub mod ir;
pub mod packet;
pub mod reassembler;

pub use channel::{Channel, MAX_CHANNEL};
pub use codec::{
    encode_command, encode_instruction, split_chunks, AckToken, Instruction, DEFAULT_CHUNK_SIZE,
    SENTINEL,
};
pub use error::{BitClass, FrameError, IrError, Result};
pub use ir::{compress_pulses, compress_signal, parse_pulses};
pub use packet::{parse_fields, Packet, PacketKind, ParsedPacket};
pub use reassembler::{FeedOutcome, Reassembler, ReassemblerConfig, DEFAULT_PACKET_IDLE};
