//! Text wire format.
//!
//! ```text
//! M<seq>:<payload>\n     segment frame, payload is any bytes except '\n'
//! ACK<seq>\n             cumulative acknowledgment
//! ```
//!
//! The transport is a byte stream, so one read may hold several frames or only
//! part of one. [`FrameDecoder`] keeps the unfinished tail between reads.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{ArqError, MalformedReason};

pub const DELIMITER: u8 = b'\n';
const SEGMENT_TAG: &[u8] = b"M";
const ACK_TAG: &[u8] = b"ACK";

/// Tag, the 20 digits of `u64::MAX`, separator and delimiter.
pub const MAX_HEADER_LEN: usize = 3 + 20 + 1 + 1;

/// Limit for decoders that were not sized for a segment size.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Segment { seq: u64, payload: Bytes },
    Ack { seq: u64 },
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Segment { seq, payload } => encode_segment(*seq, payload),
            Frame::Ack { seq } => encode_ack(*seq),
        }
    }
}

pub fn encode_segment(seq: u64, payload: &[u8]) -> Bytes {
    debug_assert!(
        !payload.contains(&DELIMITER),
        "segment payloads never contain the delimiter"
    );
    let header = format!("M{seq}:");
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + 1);
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&[DELIMITER]);
    buf.freeze()
}

pub fn encode_ack(seq: u64) -> Bytes {
    Bytes::from(format!("ACK{seq}\n"))
}

/// Result of one [`decode`] pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub frames: Vec<Frame>,
    /// Bytes after the last delimiter, to be prepended to the next read.
    pub leftover: &'a [u8],
    /// Lines that were dropped as malformed.
    pub malformed: usize,
}

/// Decodes every complete frame in `buffer`.
///
/// Malformed lines are logged and skipped; they never abort the pass.
pub fn decode(buffer: &[u8]) -> Decoded<'_> {
    let mut decoded = Decoded::default();
    let mut rest = buffer;
    while let Some(end) = rest.iter().position(|&b| b == DELIMITER) {
        let line = &rest[..end];
        rest = &rest[end + 1..];
        if line.is_empty() {
            continue;
        }
        match parse_frame(line) {
            Ok(frame) => decoded.frames.push(frame),
            Err(err) => {
                warn!("Dropping frame: {}", err);
                decoded.malformed += 1;
            }
        }
    }
    decoded.leftover = rest;
    decoded
}

/// Parses one line without its trailing delimiter.
pub fn parse_frame(line: &[u8]) -> Result<Frame, ArqError> {
    let malformed = |reason| ArqError::MalformedFrame {
        frame: String::from_utf8_lossy(line).into_owned(),
        reason,
    };

    if let Some(digits) = line.strip_prefix(ACK_TAG) {
        let seq = parse_seq(digits).ok_or_else(|| malformed(MalformedReason::InvalidSequence))?;
        return Ok(Frame::Ack { seq });
    }

    if let Some(body) = line.strip_prefix(SEGMENT_TAG) {
        let colon = body
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| malformed(MalformedReason::MissingSeparator))?;
        let seq = parse_seq(&body[..colon])
            .ok_or_else(|| malformed(MalformedReason::InvalidSequence))?;
        let payload = Bytes::copy_from_slice(&body[colon + 1..]);
        return Ok(Frame::Segment { seq, payload });
    }

    Err(malformed(MalformedReason::UnknownTag))
}

fn parse_seq(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Accumulates stream reads and yields whole frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    malformed: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Decoder whose limit fits a segment frame of `max_segment_size` bytes.
    pub fn for_segment_size(max_segment_size: usize) -> Self {
        Self::with_max_frame_len(max_segment_size.saturating_add(MAX_HEADER_LEN))
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len,
            malformed: 0,
        }
    }

    /// Appends one read and returns the frames it completed, in stream order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let (frames, consumed) = {
            let decoded = decode(&self.buffer);
            self.malformed += decoded.malformed as u64;
            (decoded.frames, self.buffer.len() - decoded.leftover.len())
        };
        self.buffer.advance(consumed);

        if self.buffer.len() > self.max_frame_len {
            let err = ArqError::MalformedFrame {
                frame: String::from_utf8_lossy(&self.buffer[..16.min(self.buffer.len())])
                    .into_owned(),
                reason: MalformedReason::Oversized,
            };
            warn!(
                "Discarding {} buffered bytes: {}",
                self.buffer.len(),
                err
            );
            self.malformed += 1;
            self.buffer.clear();
        }

        if !self.buffer.is_empty() {
            debug!("Holding {} bytes of a partial frame", self.buffer.len());
        }
        frames
    }

    /// The unfinished tail waiting for its delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Total lines dropped since the decoder was created.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}
