use arq_lab_core::{ArqConfig, ArqError, ChannelError, Receiver, Segmenter, Sender};
use tokio::time::Instant;
use tracing::info;

use crate::link::{LinkConfig, SimLink};
use crate::trace::SimulationReport;

/// Runs one sender and one receiver against each other over a [`SimLink`].
///
/// Both ends share a current-thread runtime whose clock is paused, so every
/// timeout and latency costs no wall time and a seed reproduces a run exactly.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    config: ArqConfig,
    link: LinkConfig,
    drop_segment_once: Vec<u64>,
    drop_ack_once: Vec<u64>,
}

impl Simulator {
    pub fn new(config: ArqConfig, link: LinkConfig) -> Self {
        Self {
            config,
            link,
            drop_segment_once: Vec::new(),
            drop_ack_once: Vec::new(),
        }
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    pub fn link_config(&self) -> &LinkConfig {
        &self.link
    }

    /// Register a deterministic fault: drop the first write carrying segment `seq`.
    pub fn add_drop_segment_once(&mut self, seq: u64) {
        self.drop_segment_once.push(seq);
    }

    /// Register a deterministic fault: drop the first write carrying `ACK<ack>`.
    pub fn add_drop_ack_once(&mut self, ack: u64) {
        self.drop_ack_once.push(ack);
    }

    /// Transfers `message` on a fresh paused runtime.
    ///
    /// Must not be called from inside another runtime; use [`Simulator::run_async`] there.
    pub fn run(&self, message: &[u8]) -> Result<SimulationReport, ArqError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(ChannelError::Io)?;
        runtime.block_on(self.run_async(message))
    }

    /// Transfers `message` on the current runtime, which should have a paused clock.
    pub async fn run_async(&self, message: &[u8]) -> Result<SimulationReport, ArqError> {
        self.config.validate()?;
        self.link.validate()?;
        let segments = Segmenter::new(self.config.max_segment_size)?.segment(message)?;
        let segment_count = segments.len();

        let link = SimLink::new(self.link.clone());
        for &seq in &self.drop_segment_once {
            link.drop_segment_once(seq);
        }
        for &ack in &self.drop_ack_once {
            link.drop_ack_once(ack);
        }
        let (sender_end, receiver_end) = link.endpoints();
        let mut sender = Sender::new(sender_end, segments, &self.config)?;
        let mut receiver = Receiver::new(receiver_end, &self.config)?;

        info!(
            "Simulating {} bytes in {} segments (loss {}, latency {}..={}ms, seed {})",
            message.len(),
            segment_count,
            self.link.loss_rate,
            self.link.min_latency,
            self.link.max_latency,
            self.link.seed
        );
        let started = Instant::now();

        // Each end drops its channel when it stops, which is how the other learns of it.
        let sending = async move {
            let outcome = sender.run().await;
            let elapsed = started.elapsed();
            let transmissions = sender.window().transmissions().to_vec();
            let stats = sender.stats().clone();
            drop(sender);
            (outcome, elapsed, transmissions, stats)
        };
        let receiving = async move {
            let outcome = receiver.serve().await;
            let delivered = if segment_count == 0 {
                Some(Vec::new())
            } else {
                receiver.assemble().ok()
            };
            let stats = receiver.stats().clone();
            drop(receiver);
            (outcome, delivered, stats)
        };
        let ((sent, elapsed, transmissions, sender_stats), (served, delivered, receiver_stats)) =
            tokio::join!(sending, receiving);
        sent?;
        served?;

        info!(
            "Simulation finished after {}ms: {} frames, {} retransmissions, delivered {}",
            elapsed.as_millis(),
            sender_stats.frames_sent,
            sender_stats.retransmissions,
            delivered.is_some()
        );

        Ok(SimulationReport {
            config: self.config.clone(),
            link: self.link.clone(),
            message_len: message.len(),
            duration_ms: elapsed.as_millis() as u64,
            delivered,
            transmissions,
            sender: sender_stats,
            receiver: receiver_stats,
            link_events: link.events(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet_link() -> LinkConfig {
        LinkConfig {
            min_latency: 10,
            max_latency: 10,
            ..Default::default()
        }
    }

    fn config(max_segment_size: usize, window_size: usize) -> ArqConfig {
        ArqConfig {
            max_segment_size,
            window_size,
            timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[test]
    fn lossless_round_trip() {
        let sim = Simulator::new(config(3, 2), quiet_link());
        let report = sim.run(b"hello sliding window").unwrap();

        assert_eq!(report.delivered.as_deref(), Some(&b"hello sliding window"[..]));
        assert_eq!(report.total_retransmissions(), 0);
        assert!(report.transmissions.iter().all(|&count| count == 1));
        assert_eq!(report.receiver.acks_sent, report.transmissions.len() as u64);
    }

    #[test]
    fn empty_message_completes_immediately() {
        let report = Simulator::new(config(4, 2), quiet_link()).run(b"").unwrap();
        assert_eq!(report.delivered, Some(Vec::new()));
        assert_eq!(report.sender.frames_sent, 0);
        assert_eq!(report.duration_ms, 0);
    }

    #[test]
    fn rejects_newline_before_any_io() {
        let sim = Simulator::new(config(4, 2), quiet_link());
        assert!(matches!(
            sim.run(b"two\nlines"),
            Err(ArqError::DelimiterInMessage { offset: 3 })
        ));
    }

    #[test]
    fn dropped_segment_is_resent_after_timeout() {
        let mut sim = Simulator::new(config(4, 2), quiet_link());
        sim.add_drop_segment_once(1);
        let report = sim.run(b"abcdefghijklmnop").unwrap();

        assert_eq!(report.delivered_text().as_deref(), Some("abcdefghijklmnop"));
        assert_eq!(report.transmissions[0], 1);
        assert_eq!(report.transmissions[1], 2);
        assert!(report.duration_ms >= 1000);
    }

    #[test]
    fn dropped_ack_is_covered_by_the_next_one() {
        let mut sim = Simulator::new(config(4, 4), quiet_link());
        sim.add_drop_ack_once(0);
        let report = sim.run(b"abcdefgh").unwrap();

        assert!(report.delivered.is_some());
        assert_eq!(report.total_retransmissions(), 0);
    }

    #[test]
    fn total_loss_gives_up() {
        let link = LinkConfig {
            loss_rate: 1.0,
            ..quiet_link()
        };
        let sim = Simulator::new(
            ArqConfig {
                max_retransmissions: Some(3),
                ..config(4, 2)
            },
            link,
        );
        assert!(matches!(
            sim.run(b"abcdefgh"),
            Err(ArqError::GiveUp { seq: 0, attempts: 4 })
        ));
    }
}
