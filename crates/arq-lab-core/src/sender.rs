//! Go-Back-N sending side.
//!
//! [`SenderWindow`] is the pure state machine: it owns the segments, the
//! acknowledgment flags and the per-segment send times, and takes `now` from
//! its caller. [`Sender`] drives it over a [`Channel`].
//!
//! ```text
//!          base               base + window_size
//!           │                        │
//!  acked    │ in flight / eligible   │ not yet eligible
//! ──────────┼────────────────────────┼──────────────────▶ seq
//! ```
//!
//! On timeout every unacknowledged segment in the window whose last send is at
//! least `timeout` old goes out again, not only the oldest one.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::channel::{Channel, Recv};
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::frame::{Frame, FrameDecoder, MAX_HEADER_LEN, encode_segment};
use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SenderState {
    Idle,
    Transmitting,
    WaitingForAck,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ACK confirmed new segments and `base` moved from `from` to `to`.
    Advanced { from: usize, to: usize },
    /// Already acknowledged, including every ACK below `base`.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderWindow {
    segments: Vec<Segment>,
    acknowledged: Vec<bool>,
    last_sent: Vec<Option<Instant>>,
    transmissions: Vec<u32>,
    /// Lowest unacknowledged index. Never decreases.
    base: usize,
    window_size: usize,
    timeout: Duration,
    max_retransmissions: Option<u32>,
}

impl SenderWindow {
    /// `segments` must be numbered `0..len` in order, as the segmenter emits them.
    pub fn new(segments: Vec<Segment>, config: &ArqConfig) -> Result<Self, ArqError> {
        config.validate()?;
        debug_assert!(
            segments
                .iter()
                .enumerate()
                .all(|(index, segment)| segment.seq() == index as u64),
            "segments must be numbered from 0 without gaps"
        );
        let count = segments.len();
        Ok(Self {
            segments,
            acknowledged: vec![false; count],
            last_sent: vec![None; count],
            transmissions: vec![0; count],
            base: 0,
            window_size: config.window_size,
            timeout: config.timeout,
            max_retransmissions: config.max_retransmissions,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One past the last index currently allowed on the wire.
    pub fn window_end(&self) -> usize {
        self.base.saturating_add(self.window_size).min(self.segments.len())
    }

    pub fn is_done(&self) -> bool {
        self.base == self.segments.len()
    }

    pub fn is_acknowledged(&self, index: usize) -> bool {
        self.acknowledged.get(index).copied().unwrap_or(false)
    }

    /// Times each segment has been put on the wire, indexed by sequence number.
    pub fn transmissions(&self) -> &[u32] {
        &self.transmissions
    }

    /// Number of leading segments that have been transmitted at least once.
    pub fn sent_range(&self) -> usize {
        self.transmissions
            .iter()
            .position(|&count| count == 0)
            .unwrap_or(self.segments.len())
    }

    pub fn state(&self) -> SenderState {
        if self.is_done() {
            SenderState::Done
        } else if self.sent_range() == 0 {
            SenderState::Idle
        } else if (self.base..self.window_end()).any(|i| self.last_sent[i].is_none()) {
            SenderState::Transmitting
        } else {
            SenderState::WaitingForAck
        }
    }

    /// Segments of the window that must go out at `now`, already recorded as sent.
    ///
    /// A segment qualifies if it is unacknowledged and was either never sent or
    /// last sent at least `timeout` ago. Fails with [`ArqError::GiveUp`] before
    /// recording anything when a due segment has used up its retransmissions.
    pub fn transmit_window(&mut self, now: Instant) -> Result<Vec<Segment>, ArqError> {
        let due: Vec<usize> = (self.base..self.window_end())
            .filter(|&i| !self.acknowledged[i])
            .filter(|&i| match self.last_sent[i] {
                None => true,
                Some(sent) => now.saturating_duration_since(sent) >= self.timeout,
            })
            .collect();

        if let Some(limit) = self.max_retransmissions
            && let Some(&exhausted) = due.iter().find(|&&i| self.transmissions[i] > limit)
        {
            return Err(ArqError::GiveUp {
                seq: exhausted as u64,
                attempts: self.transmissions[exhausted],
            });
        }

        Ok(due
            .into_iter()
            .map(|i| {
                self.last_sent[i] = Some(now);
                self.transmissions[i] += 1;
                self.segments[i].clone()
            })
            .collect())
    }

    /// Applies a cumulative ACK covering every segment up to and including `seq`.
    ///
    /// Idempotent: a repeated or stale ACK changes nothing. An ACK naming a
    /// segment that was never transmitted is [`ArqError::AckOutOfRange`].
    pub fn on_ack(&mut self, seq: u64) -> Result<AckOutcome, ArqError> {
        let sent = self.sent_range();
        let index = match usize::try_from(seq) {
            Ok(index) if index < sent => index,
            _ => return Err(ArqError::AckOutOfRange { seq, sent }),
        };

        if self.acknowledged[index] {
            return Ok(AckOutcome::Duplicate);
        }

        let from = self.base;
        self.acknowledged[from..=index].fill(true);
        while self.base < self.segments.len() && self.acknowledged[self.base] {
            self.base += 1;
        }
        Ok(AckOutcome::Advanced {
            from,
            to: self.base,
        })
    }
}

/// Counters for one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub segments: usize,
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub acks_received: u64,
    pub duplicate_acks: u64,
    pub out_of_range_acks: u64,
    pub malformed_frames: u64,
}

/// Drives a [`SenderWindow`] over a channel until every segment is acknowledged.
pub struct Sender<C> {
    channel: C,
    window: SenderWindow,
    decoder: FrameDecoder,
    stats: SenderStats,
}

impl<C: Channel> Sender<C> {
    pub fn new(channel: C, segments: Vec<Segment>, config: &ArqConfig) -> Result<Self, ArqError> {
        let window = SenderWindow::new(segments, config)?;
        let stats = SenderStats {
            segments: window.len(),
            ..Default::default()
        };
        Ok(Self {
            channel,
            window,
            // Only ACK frames are expected on this side.
            decoder: FrameDecoder::with_max_frame_len(MAX_HEADER_LEN),
            stats,
        })
    }

    pub fn window(&self) -> &SenderWindow {
        &self.window
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Sends whatever the window says is due now. Returns the number of frames written.
    pub async fn transmit_window(&mut self) -> Result<usize, ArqError> {
        let now = tokio::time::Instant::now().into_std();
        let due = self.window.transmit_window(now)?;
        for segment in &due {
            let attempt = self.window.transmissions()[segment.seq() as usize];
            if attempt > 1 {
                self.stats.retransmissions += 1;
                info!(
                    "Retransmitting segment {} (attempt {})",
                    segment.seq(),
                    attempt
                );
            } else {
                info!(
                    "Sending segment {} ({} bytes)",
                    segment.seq(),
                    segment.payload().len()
                );
            }
            self.channel
                .send(&encode_segment(segment.seq(), segment.payload()))
                .await?;
            self.stats.frames_sent += 1;
        }
        Ok(due.len())
    }

    /// Applies one ACK and, if the window slid, immediately fills the new room.
    pub async fn on_ack(&mut self, seq: u64) -> Result<(), ArqError> {
        self.stats.acks_received += 1;
        match self.window.on_ack(seq) {
            Ok(AckOutcome::Advanced { from, to }) => {
                info!("ACK{} confirmed; sliding window base {} -> {}", seq, from, to);
                if !self.window.is_done() {
                    self.transmit_window().await?;
                }
            }
            Ok(AckOutcome::Duplicate) => {
                self.stats.duplicate_acks += 1;
                debug!("Ignoring duplicate ACK{}", seq);
            }
            Err(err @ ArqError::AckOutOfRange { .. }) => {
                self.stats.out_of_range_acks += 1;
                warn!("{}", err);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Waits up to `timeout` for ACKs. A timeout triggers one retransmission pass.
    pub async fn wait_for_ack(&mut self, timeout: Duration) -> Result<(), ArqError> {
        match self.channel.receive(timeout).await? {
            Recv::Data(bytes) => {
                let frames = self.decoder.push(&bytes);
                self.stats.malformed_frames = self.decoder.malformed_count();
                for frame in frames {
                    match frame {
                        Frame::Ack { seq } => self.on_ack(seq).await?,
                        Frame::Segment { seq, .. } => {
                            warn!("Sender ignoring unexpected segment frame M{}", seq);
                        }
                    }
                }
            }
            Recv::Timeout => {
                self.stats.timeouts += 1;
                warn!(
                    "No ACK within {:?} (base {}); resending unacknowledged window",
                    timeout,
                    self.window.base()
                );
                self.transmit_window().await?;
            }
        }
        Ok(())
    }

    /// Runs the transfer to completion.
    pub async fn run(&mut self) -> Result<SenderStats, ArqError> {
        info!(
            "Transferring {} segments (window {}, timeout {:?})",
            self.window.len(),
            self.window.window_size(),
            self.window.timeout()
        );
        let timeout = self.window.timeout();
        while !self.window.is_done() {
            self.transmit_window().await?;
            self.wait_for_ack(timeout).await?;
        }
        info!("All {} segments acknowledged", self.window.len());
        Ok(self.stats.clone())
    }
}
