use crate::channel::Channel;

/// Errors that can occur while decoding frames and packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The channel id is outside `0..=9` or not a digit.
    #[error("invalid channel id {0:#04x}")]
    InvalidChannel(u8),

    /// The frame or packet payload does not follow the wire format.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// A continuation fragment arrived with no packet in flight.
    #[error("orphan fragment {fragment} on channel {channel}")]
    OrphanFragment { channel: Channel, fragment: u8 },

    /// A fragment arrived out of order for the packet in flight.
    #[error("out-of-sequence fragment on channel {channel} (expected {expected}, got {got})")]
    OutOfSequence {
        channel: Channel,
        expected: u8,
        got: u8,
    },

    /// A partial packet went idle and was discarded.
    #[error("packet on channel {channel} expired before completion")]
    PacketExpired { channel: Channel },
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Bit classes recognised by the IR compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitClass {
    Zero,
    One,
}

impl std::fmt::Display for BitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BitClass::Zero => f.write_str("zero"),
            BitClass::One => f.write_str("one"),
        }
    }
}

/// Errors that can occur while compressing an IR pulse train.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    /// Fewer pulses than the two protocol header values.
    #[error("signal too short ({0} pulses, need at least 2)")]
    TooShort(usize),

    /// A body token is not a pulse duration.
    #[error("invalid pulse duration '{token}'")]
    InvalidPulse { token: String },

    /// The pulse train has no pulses of one bit class, so it has no average.
    #[error("signal has no {class} pulses")]
    MissingBitClass { class: BitClass },
}
