//! In-process byte-stream link between one sender and one receiver.
//!
//! Every write is judged once: deterministic drop-once faults first, then
//! random loss, then a latency draw. Surviving writes may be cut into chunks;
//! the chunks of one write stay contiguous in the peer's queue, so a reordered
//! link never interleaves two frames.

use arq_lab_core::frame::{self, Frame};
use arq_lab_core::{ArqError, Channel, ChannelError, Recv};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Probability in `[0, 1]` that a write is lost.
    pub loss_rate: f64,
    /// One-way latency bounds in milliseconds.
    pub min_latency: u64,
    pub max_latency: u64,
    /// Cut each write into chunks of at most this many bytes.
    pub max_chunk: Option<usize>,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            max_chunk: None,
            seed: 0,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ArqError> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(ArqError::InvalidConfig(format!(
                "loss_rate must be within [0, 1], got {}",
                self.loss_rate
            )));
        }
        if self.min_latency > self.max_latency {
            return Err(ArqError::InvalidConfig(format!(
                "min_latency {} exceeds max_latency {}",
                self.min_latency, self.max_latency
            )));
        }
        if self.max_chunk == Some(0) {
            return Err(ArqError::InvalidConfig(
                "max_chunk must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Sender,
    Receiver,
}

impl Side {
    pub fn peer(&self) -> Self {
        match self {
            Side::Sender => Side::Receiver,
            Side::Receiver => Side::Sender,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Sender => 0,
            Side::Receiver => 1,
        }
    }
}

/// A compact textual record of one link decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEventSummary {
    /// Milliseconds since the link was created.
    pub time: u64,
    pub description: String,
}

#[derive(Debug)]
struct Delivery {
    at: Instant,
    bytes: Bytes,
}

#[derive(Debug)]
struct LinkState {
    config: LinkConfig,
    rng: StdRng,
    started: Instant,
    /// Pending deliveries, indexed by the receiving side and ordered by `at`.
    queues: [VecDeque<Delivery>; 2],
    closed: [bool; 2],
    drop_segment_once: Vec<u64>,
    drop_ack_once: Vec<u64>,
    events: Vec<LinkEventSummary>,
}

impl LinkState {
    fn record(&mut self, description: String) {
        let time = self.started.elapsed().as_millis() as u64;
        debug!("[link {}ms] {}", time, description);
        self.events.push(LinkEventSummary { time, description });
    }

    /// Removes and returns the armed fault matching this write, if any.
    fn take_fault(&mut self, from: Side, bytes: &[u8]) -> Option<String> {
        let armed = match from {
            Side::Sender => &mut self.drop_segment_once,
            Side::Receiver => &mut self.drop_ack_once,
        };
        for frame in frame::decode(bytes).frames {
            let (seq, label) = match (from, frame) {
                (Side::Sender, Frame::Segment { seq, .. }) => (seq, "segment"),
                (Side::Receiver, Frame::Ack { seq }) => (seq, "ACK"),
                _ => continue,
            };
            if let Some(pos) = armed.iter().position(|&s| s == seq) {
                armed.remove(pos);
                return Some(format!("{label} {seq}"));
            }
        }
        None
    }

    fn transmit(&mut self, from: Side, bytes: &[u8]) {
        let to = from.peer();
        if self.closed[to.index()] {
            self.record(format!(
                "[{from:?}->{to:?}] DISCARD {} bytes, peer closed",
                bytes.len()
            ));
            return;
        }

        if let Some(fault) = self.take_fault(from, bytes) {
            self.record(format!("[{from:?}->{to:?}] DROP (deterministic) {fault}"));
            return;
        }

        if self.rng.random::<f64>() < self.config.loss_rate {
            self.record(format!(
                "[{from:?}->{to:?}] DROP (random loss) {} bytes",
                bytes.len()
            ));
            return;
        }

        let latency = self.rng.random_range(
            self.config.min_latency..=self.config.max_latency.max(self.config.min_latency),
        );
        let at = Instant::now() + Duration::from_millis(latency);
        let chunk_len = self.config.max_chunk.unwrap_or(bytes.len()).max(1);
        let chunks: Vec<Bytes> = bytes.chunks(chunk_len).map(Bytes::copy_from_slice).collect();

        self.record(format!(
            "[{from:?}->{to:?}] SEND {} bytes in {} chunk(s) (latency={}ms)",
            bytes.len(),
            chunks.len(),
            latency
        ));

        let queue = &mut self.queues[to.index()];
        let mut pos = queue.partition_point(|d| d.at <= at);
        for bytes in chunks {
            queue.insert(pos, Delivery { at, bytes });
            pos += 1;
        }
    }
}

struct Shared {
    state: RefCell<LinkState>,
    /// Wakes the side at the same index when its queue or its peer changes.
    wake: [Notify; 2],
}

/// Owner of the link state. Hands out one [`SimChannel`] per side.
#[derive(Clone)]
pub struct SimLink {
    shared: Rc<Shared>,
}

impl SimLink {
    /// Must be created inside a tokio runtime; link time starts now.
    pub fn new(config: LinkConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let state = LinkState {
            config,
            rng,
            started: Instant::now(),
            queues: [VecDeque::new(), VecDeque::new()],
            closed: [false; 2],
            drop_segment_once: Vec::new(),
            drop_ack_once: Vec::new(),
            events: Vec::new(),
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                wake: [Notify::new(), Notify::new()],
            }),
        }
    }

    /// Drop the first sender write that carries segment `seq`.
    pub fn drop_segment_once(&self, seq: u64) {
        self.shared.state.borrow_mut().drop_segment_once.push(seq);
    }

    /// Drop the first receiver write that carries `ACK<ack>`.
    pub fn drop_ack_once(&self, ack: u64) {
        self.shared.state.borrow_mut().drop_ack_once.push(ack);
    }

    pub fn endpoints(&self) -> (SimChannel, SimChannel) {
        (self.endpoint(Side::Sender), self.endpoint(Side::Receiver))
    }

    fn endpoint(&self, side: Side) -> SimChannel {
        SimChannel {
            shared: Rc::clone(&self.shared),
            side,
        }
    }

    pub fn events(&self) -> Vec<LinkEventSummary> {
        self.shared.state.borrow().events.clone()
    }
}

/// One side of a [`SimLink`]. Dropping it closes that side.
pub struct SimChannel {
    shared: Rc<Shared>,
    side: Side,
}

impl SimChannel {
    pub fn side(&self) -> Side {
        self.side
    }
}

impl Channel for SimChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.shared.state.borrow_mut().transmit(self.side, bytes);
        self.shared.wake[self.side.peer().index()].notify_one();
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Recv, ChannelError> {
        let deadline = Instant::now() + timeout;
        let me = self.side.index();
        loop {
            let wake_at = {
                let mut state = self.shared.state.borrow_mut();
                let peer_closed = state.closed[self.side.peer().index()];
                let now = Instant::now();
                let queue = &mut state.queues[me];
                if queue.front().is_some_and(|d| d.at <= now)
                    && let Some(delivery) = queue.pop_front()
                {
                    return Ok(Recv::Data(delivery.bytes));
                }
                match queue.front() {
                    Some(next) => next.at.min(deadline),
                    None if peer_closed => return Err(ChannelError::Closed),
                    None => deadline,
                }
            };
            if Instant::now() >= deadline {
                return Ok(Recv::Timeout);
            }
            tokio::select! {
                _ = self.shared.wake[me].notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.try_borrow_mut() {
            state.closed[self.side.index()] = true;
            state.record(format!("[{:?}] CLOSE", self.side));
        }
        self.shared.wake[self.side.peer().index()].notify_one();
    }
}
