use thiserror::Error;

/// Failures of the underlying byte stream. Always fatal to the current transfer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed its side of the stream.
    #[error("channel closed by peer")]
    Closed,

    /// The connection-level handshake did not produce a usable value.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("channel i/o failure")]
    Io(#[from] std::io::Error),
}

/// Why a line on the wire could not be turned into a [`crate::Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("tag is neither `M` nor `ACK`")]
    UnknownTag,
    #[error("segment frame has no `:` separator")]
    MissingSeparator,
    #[error("sequence number is not a decimal u64")]
    InvalidSequence,
    #[error("frame exceeds the decoder limit")]
    Oversized,
}

#[derive(Debug, Error)]
pub enum ArqError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The text wire format cannot carry a newline inside a payload.
    #[error("message byte {offset} is a newline, which the frame format cannot carry")]
    DelimiterInMessage { offset: usize },

    #[error("malformed frame {frame:?}: {reason}")]
    MalformedFrame {
        frame: String,
        reason: MalformedReason,
    },

    #[error("ACK{seq} is outside the sent range ({sent} segments sent)")]
    AckOutOfRange { seq: u64, sent: usize },

    #[error("reassembly incomplete: segment {next_missing} has not arrived")]
    Incomplete { next_missing: u64 },

    #[error("giving up on segment {seq} after {attempts} transmissions")]
    GiveUp { seq: u64, attempts: u32 },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ArqError {
    /// Whether the error ends the transfer. Parsing, range and reassembly
    /// errors are absorbed locally and the protocol keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArqError::InvalidConfig(_)
                | ArqError::DelimiterInMessage { .. }
                | ArqError::GiveUp { .. }
                | ArqError::Channel(_)
        )
    }
}
