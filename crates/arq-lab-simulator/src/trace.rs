use arq_lab_core::{ArqConfig, ReceiverStats, SenderStats};
use serde::Serialize;

use crate::link::{LinkConfig, LinkEventSummary};

/// Everything a finished simulated transfer produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: ArqConfig,
    pub link: LinkConfig,
    pub message_len: usize,
    /// Virtual time from the first send until the last segment was acknowledged.
    pub duration_ms: u64,
    /// The reassembled message, if the receiver holds all of it.
    pub delivered: Option<Vec<u8>>,
    /// Transmission count per segment, indexed by sequence number.
    pub transmissions: Vec<u32>,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    pub fn total_retransmissions(&self) -> u64 {
        self.sender.retransmissions
    }

    pub fn delivered_text(&self) -> Option<String> {
        self.delivered
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}
