//! Optional TOML parameter file shared by `server` and `client`.
//!
//! ```toml
//! message = "Hello over a sliding window"
//! maximum_msg_size = 20
//! window_size = 4
//! timeout = 0.5     # seconds
//! ack_delay = 0.1   # seconds, server only
//! ```
//!
//! Values present in the file win over the matching command-line flags.

use anyhow::{Context, Result};
use arq_lab_core::ArqConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub message: Option<String>,
    #[serde(alias = "max_segment_size")]
    pub maximum_msg_size: Option<usize>,
    pub window_size: Option<usize>,
    pub timeout: Option<f64>,
    pub ack_delay: Option<f64>,
}

impl Params {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse parameter file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path` when given, otherwise yields empty parameters.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn apply_to(&self, config: &mut ArqConfig) -> Result<()> {
        if let Some(v) = self.maximum_msg_size {
            config.max_segment_size = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = seconds("timeout", v)?;
        }
        if let Some(v) = self.ack_delay {
            config.ack_delay = seconds("ack_delay", v)?;
        }
        Ok(())
    }
}

/// Converts a user-supplied number of seconds, rejecting negative and non-finite values.
pub fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{name} must be a non-negative number of seconds, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let params = Params::parse(
            r#"
            message = "hi there"
            maximum_msg_size = 20
            window_size = 3
            timeout = 0.5
            ack_delay = 0.25
            "#,
        )
        .unwrap();
        let mut config = ArqConfig::default();
        params.apply_to(&mut config).unwrap();

        assert_eq!(params.message.as_deref(), Some("hi there"));
        assert_eq!(config.max_segment_size, 20);
        assert_eq!(config.window_size, 3);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.ack_delay, Duration::from_millis(250));
    }

    #[test]
    fn max_segment_size_alias() {
        let params = Params::parse("max_segment_size = 64").unwrap();
        assert_eq!(params.maximum_msg_size, Some(64));
    }

    #[test]
    fn missing_keys_leave_config_alone() {
        let mut config = ArqConfig::default();
        Params::parse("").unwrap().apply_to(&mut config).unwrap();
        assert_eq!(config, ArqConfig::default());
    }

    #[test]
    fn negative_timeout_is_an_error() {
        let params = Params::parse("timeout = -1.0").unwrap();
        let err = params.apply_to(&mut ArqConfig::default()).unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Params::parse("window = 3").is_err());
    }
}
