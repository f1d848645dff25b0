//! Sliding-window ARQ over a newline-delimited text stream.
//!
//! ```text
//!  message ──▶ Segmenter ──▶ SenderWindow ──encode──▶ Channel ──decode──▶ Reassembler ──▶ message
//!                               ▲                                             │
//!                               └────────────── ACK<highest in-order> ◀──────┘
//! ```
//!
//! The protocol ends only ever see a [`Channel`]. TCP and the simulated link
//! live in other crates.

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod segment;
pub mod sender;

#[cfg(test)]
mod testing;

pub use channel::{Channel, Recv};
pub use config::{ArqConfig, DEFAULT_MAX_SEGMENT_SIZE, JoinPolicy};
pub use error::{ArqError, ChannelError, MalformedReason};
pub use frame::{Frame, FrameDecoder, encode_ack, encode_segment};
pub use receiver::{DEFAULT_REORDER_LIMIT, Reassembler, Receiver, ReceiverStats, SegmentOutcome};
pub use segment::{Segment, Segmenter, segment};
pub use sender::{AckOutcome, Sender, SenderState, SenderStats, SenderWindow};
