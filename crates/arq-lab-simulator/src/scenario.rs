use arq_lab_core::{ArqConfig, JoinPolicy};
use serde::Deserialize;
use std::time::Duration;

use crate::link::LinkConfig;

/// A scripted transfer plus the checks its outcome must pass.
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub message: String,
    #[serde(default)]
    pub config: ConfigOverride,
    #[serde(default)]
    pub link: LinkOverride,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverride {
    pub max_segment_size: Option<usize>,
    pub window_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub ack_delay_ms: Option<u64>,
    pub max_retransmissions: Option<u32>,
    pub join: Option<JoinPolicy>,
}

impl ConfigOverride {
    pub fn apply_to(&self, config: &mut ArqConfig) {
        if let Some(v) = self.max_segment_size {
            config.max_segment_size = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.ack_delay_ms {
            config.ack_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.max_retransmissions {
            config.max_retransmissions = Some(v);
        }
        if let Some(v) = self.join {
            config.join = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct LinkOverride {
    pub loss_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub max_chunk: Option<usize>,
    pub seed: Option<u64>,
}

impl LinkOverride {
    pub fn apply_to(&self, config: &mut LinkConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.max_chunk {
            config.max_chunk = Some(v);
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Drop the first sender write carrying segment `seq`.
    DropSegmentOnce { seq: u64 },
    /// Drop the first receiver write carrying `ACK<ack>`.
    DropAckOnce { ack: u64 },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// The receiver reassembled `data`, or the scenario message when omitted.
    Delivered { data: Option<String> },
    /// Segment `seq` went on the wire between `min` and `max` times.
    SegmentTransmissions { seq: u64, min: u32, max: Option<u32> },
    TotalRetransmissions { min: u64, max: Option<u64> },
    /// The last ACK arrived within `ms` of virtual time.
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_scenario() {
        let scenario: Scenario = toml::from_str(
            r#"
            name = "demo"
            message = "hello"

            [config]
            window_size = 2
            timeout_ms = 500
            join = "space_separated"

            [link]
            loss_rate = 0.25
            seed = 9

            [[actions]]
            type = "drop_segment_once"
            seq = 1

            [[assertions]]
            type = "delivered"

            [[assertions]]
            type = "segment_transmissions"
            seq = 1
            min = 2
            "#,
        )
        .unwrap();

        assert_eq!(scenario.description, "");
        assert_eq!(scenario.actions, vec![ScenarioAction::DropSegmentOnce { seq: 1 }]);
        assert_eq!(
            scenario.assertions,
            vec![
                ScenarioAssertion::Delivered { data: None },
                ScenarioAssertion::SegmentTransmissions {
                    seq: 1,
                    min: 2,
                    max: None
                },
            ]
        );

        let mut config = ArqConfig::default();
        scenario.config.apply_to(&mut config);
        assert_eq!(config.window_size, 2);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.join, JoinPolicy::SpaceSeparated);
        assert_eq!(config.max_segment_size, ArqConfig::default().max_segment_size);

        let mut link = LinkConfig::default();
        scenario.link.apply_to(&mut link);
        assert_eq!(link.loss_rate, 0.25);
        assert_eq!(link.seed, 9);
        assert_eq!(link.min_latency, LinkConfig::default().min_latency);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let parsed: Result<Scenario, _> = toml::from_str(
            r#"
            name = "typo"
            message = "x"
            [config]
            windowsize = 3
            "#,
        );
        assert!(parsed.is_err());
    }
}
