//! Receiving side: out-of-order storage, cumulative ACKs, reassembly.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Recv};
use crate::config::{ArqConfig, JoinPolicy};
use crate::error::{ArqError, ChannelError};
use crate::frame::{Frame, FrameDecoder, encode_ack};

/// Furthest a stored segment may lie beyond `next_expected`.
///
/// A sender never has more than its window in flight past the receiver's
/// contiguous prefix, so anything further out is dropped instead of stored.
pub const DEFAULT_REORDER_LIMIT: u64 = 4096;

/// What [`Reassembler::on_segment`] did with a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Stored,
    /// Already held; the first copy is kept.
    Duplicate,
    /// Too far past `next_expected`; not stored.
    BeyondLimit,
}

/// Segments received so far, keyed by sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembler {
    received: BTreeMap<u64, Bytes>,
    /// Smallest sequence number not yet held. `[0, next_expected)` is complete.
    next_expected: u64,
    reorder_limit: u64,
    join: JoinPolicy,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(JoinPolicy::default())
    }
}

impl Reassembler {
    pub fn new(join: JoinPolicy) -> Self {
        Self {
            received: BTreeMap::new(),
            next_expected: 0,
            reorder_limit: DEFAULT_REORDER_LIMIT,
            join,
        }
    }

    /// Only segments with `seq < next_expected + limit` are stored.
    pub fn with_reorder_limit(mut self, limit: u64) -> Self {
        self.reorder_limit = limit;
        self
    }

    /// Stores `payload` unless `seq` is already held or lies beyond the reorder limit.
    pub fn on_segment(&mut self, seq: u64, payload: Bytes) -> SegmentOutcome {
        if seq.saturating_sub(self.next_expected) >= self.reorder_limit {
            return SegmentOutcome::BeyondLimit;
        }
        match self.received.entry(seq) {
            Entry::Vacant(slot) => {
                slot.insert(payload);
                SegmentOutcome::Stored
            }
            Entry::Occupied(_) => SegmentOutcome::Duplicate,
        }
    }

    /// Moves `next_expected` past every contiguous segment and returns it.
    pub fn advance(&mut self) -> u64 {
        while self.received.contains_key(&self.next_expected) {
            self.next_expected += 1;
        }
        self.next_expected
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Highest contiguously received sequence number; `None` until segment 0 arrives.
    pub fn ack_value(&self) -> Option<u64> {
        self.next_expected.checked_sub(1)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.received.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// The full message, once every sequence number up to the highest seen is present.
    pub fn assemble(&self) -> Result<Vec<u8>, ArqError> {
        let Some((&highest, _)) = self.received.last_key_value() else {
            return Err(ArqError::Incomplete { next_missing: 0 });
        };
        // Keys are sorted and distinct, so the set is complete iff it has highest + 1 entries.
        if (self.received.len() - 1) as u64 != highest {
            let next_missing = self
                .received
                .keys()
                .zip(0u64..)
                .find(|&(&seq, index)| seq != index)
                .map_or(highest, |(_, index)| index);
            return Err(ArqError::Incomplete { next_missing });
        }

        let capacity = self.received.values().map(Bytes::len).sum::<usize>() + self.received.len();
        let mut message = Vec::with_capacity(capacity);
        for (index, payload) in self.received.values().enumerate() {
            if index > 0 && self.join == JoinPolicy::SpaceSeparated {
                let ends_blank = message.last().is_some_and(u8::is_ascii_whitespace);
                let starts_blank = payload.first().is_some_and(u8::is_ascii_whitespace);
                if !ends_blank && !starts_blank {
                    message.push(b' ');
                }
            }
            message.extend_from_slice(payload);
        }
        Ok(message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub segments_received: u64,
    pub duplicate_segments: u64,
    pub beyond_limit_segments: u64,
    pub acks_sent: u64,
    pub malformed_frames: u64,
    pub unexpected_frames: u64,
}

/// Serves one connection: stores segments and answers each with a cumulative ACK.
pub struct Receiver<C> {
    channel: C,
    reassembler: Reassembler,
    decoder: FrameDecoder,
    ack_delay: Duration,
    poll_interval: Duration,
    stats: ReceiverStats,
}

impl<C: Channel> Receiver<C> {
    pub fn new(channel: C, config: &ArqConfig) -> Result<Self, ArqError> {
        config.validate()?;
        Ok(Self {
            channel,
            reassembler: Reassembler::new(config.join),
            decoder: FrameDecoder::for_segment_size(config.max_segment_size),
            ack_delay: config.ack_delay,
            poll_interval: config.timeout,
            stats: ReceiverStats::default(),
        })
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn assemble(&self) -> Result<Vec<u8>, ArqError> {
        self.reassembler.assemble()
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Records one segment and emits the resulting cumulative ACK.
    pub async fn on_segment(&mut self, seq: u64, payload: Bytes) -> Result<(), ArqError> {
        self.stats.segments_received += 1;
        match self.reassembler.on_segment(seq, payload) {
            SegmentOutcome::Stored => debug!("Stored segment {}", seq),
            SegmentOutcome::Duplicate => {
                self.stats.duplicate_segments += 1;
                debug!("Segment {} already stored; keeping the first copy", seq);
            }
            SegmentOutcome::BeyondLimit => {
                self.stats.beyond_limit_segments += 1;
                warn!(
                    "Dropping segment {}: too far past next expected {}",
                    seq,
                    self.reassembler.next_expected()
                );
            }
        }

        let before = self.reassembler.next_expected();
        let next = self.reassembler.advance();
        if next > before {
            info!(
                "Expected segment {} received; next expected {}",
                before, next
            );
        }

        let Some(ack) = self.reassembler.ack_value() else {
            debug!("Segment 0 still missing; no ACK to send");
            return Ok(());
        };
        if !self.ack_delay.is_zero() {
            tokio::time::sleep(self.ack_delay).await;
        }
        self.channel.send(&encode_ack(ack)).await?;
        self.stats.acks_sent += 1;
        info!("Sent ACK{} (highest in-order segment)", ack);
        Ok(())
    }

    /// Processes frames until the peer closes the channel.
    pub async fn serve(&mut self) -> Result<ReceiverStats, ArqError> {
        loop {
            let bytes = match self.channel.receive(self.poll_interval).await {
                Ok(Recv::Data(bytes)) => bytes,
                Ok(Recv::Timeout) => continue,
                Err(ChannelError::Closed) => {
                    info!("Peer closed the channel");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let frames = self.decoder.push(&bytes);
            self.stats.malformed_frames = self.decoder.malformed_count();
            for frame in frames {
                match frame {
                    Frame::Segment { seq, payload } => match self.on_segment(seq, payload).await {
                        Ok(()) => {}
                        Err(ArqError::Channel(ChannelError::Closed)) => {
                            info!("Peer closed the channel before taking the ACK");
                            return Ok(self.stats.clone());
                        }
                        Err(err) => return Err(err),
                    },
                    Frame::Ack { seq } => {
                        self.stats.unexpected_frames += 1;
                        warn!("Receiver ignoring unexpected ACK{}", seq);
                    }
                }
            }
        }
        Ok(self.stats.clone())
    }
}
