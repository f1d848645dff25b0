//! Splitting an application message into numbered segments.

use bytes::Bytes;

use crate::error::ArqError;

/// One numbered slice of a message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    seq: u64,
    payload: Bytes,
}

impl Segment {
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Splits messages into segments of at most `max_segment_size` bytes.
#[derive(Debug, Clone)]
pub struct Segmenter {
    max_segment_size: usize,
    wrap_in_quotes: bool,
}

impl Segmenter {
    pub fn new(max_segment_size: usize) -> Result<Self, ArqError> {
        if max_segment_size == 0 {
            return Err(ArqError::InvalidConfig(
                "max_segment_size must be positive".into(),
            ));
        }
        Ok(Self {
            max_segment_size,
            wrap_in_quotes: false,
        })
    }

    /// Surround the message with `"` before splitting.
    pub fn wrap_in_quotes(mut self, enabled: bool) -> Self {
        self.wrap_in_quotes = enabled;
        self
    }

    pub fn max_segment_size(&self) -> usize {
        self.max_segment_size
    }

    /// Sequence numbers start at 0 and follow message order. The last segment
    /// is not padded, and an empty message produces no segments.
    pub fn segment(&self, message: &[u8]) -> Result<Vec<Segment>, ArqError> {
        if let Some(offset) = message.iter().position(|&b| b == b'\n') {
            return Err(ArqError::DelimiterInMessage { offset });
        }

        let message: Bytes = if self.wrap_in_quotes {
            let mut quoted = Vec::with_capacity(message.len() + 2);
            quoted.push(b'"');
            quoted.extend_from_slice(message);
            quoted.push(b'"');
            quoted.into()
        } else {
            Bytes::copy_from_slice(message)
        };

        let segments = (0..message.len())
            .step_by(self.max_segment_size)
            .enumerate()
            .map(|(seq, start)| {
                let end = (start + self.max_segment_size).min(message.len());
                Segment::new(seq as u64, message.slice(start..end))
            })
            .collect();
        Ok(segments)
    }
}

/// Convenience wrapper around [`Segmenter::segment`].
pub fn segment(message: &[u8], max_segment_size: usize) -> Result<Vec<Segment>, ArqError> {
    Segmenter::new(max_segment_size)?.segment(message)
}
