use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ArqError;

/// Server-side default maximum segment size, announced during the handshake
/// when nothing else is configured.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 10_000;

/// How [`crate::Reassembler::assemble`] glues payloads back together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Byte-exact concatenation.
    #[default]
    Concatenate,
    /// Insert one space at a seam unless either side already has whitespace there.
    SpaceSeparated,
}

/// Parameters shared by both ends of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArqConfig {
    pub max_segment_size: usize,
    pub window_size: usize,
    /// Retransmission timeout, also the sender's receive wait.
    pub timeout: Duration,
    /// Simulated latency inserted before every ACK (receiver only).
    pub ack_delay: Duration,
    /// `None` retries forever.
    pub max_retransmissions: Option<u32>,
    pub join: JoinPolicy,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            window_size: 4,
            timeout: Duration::from_secs(1),
            ack_delay: Duration::ZERO,
            max_retransmissions: Some(10),
            join: JoinPolicy::Concatenate,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> Result<(), ArqError> {
        if self.max_segment_size == 0 {
            return Err(ArqError::InvalidConfig(
                "max_segment_size must be positive".into(),
            ));
        }
        if self.window_size == 0 {
            return Err(ArqError::InvalidConfig("window_size must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(ArqError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(ArqConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let cases = [
            ArqConfig {
                max_segment_size: 0,
                ..Default::default()
            },
            ArqConfig {
                window_size: 0,
                ..Default::default()
            },
            ArqConfig {
                timeout: Duration::ZERO,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(ArqError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn ack_delay_may_be_zero() {
        let config = ArqConfig {
            ack_delay: Duration::ZERO,
            max_retransmissions: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
