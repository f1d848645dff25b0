use anyhow::{Context, Result, bail, ensure};
use arq_lab_core::ArqConfig;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::Simulator;
use crate::link::LinkConfig;
use crate::scenario::{Scenario, ScenarioAction, ScenarioAssertion};
use crate::trace::SimulationReport;

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))
}

/// Loads, runs and checks the scenario at `path`.
pub fn run_scenario(path: impl AsRef<Path>) -> Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    run(&scenario)
}

pub fn build_simulator(scenario: &Scenario) -> Simulator {
    let mut config = ArqConfig::default();
    scenario.config.apply_to(&mut config);
    let mut link = LinkConfig::default();
    scenario.link.apply_to(&mut link);

    let mut sim = Simulator::new(config, link);
    for action in &scenario.actions {
        match action {
            ScenarioAction::DropSegmentOnce { seq } => sim.add_drop_segment_once(*seq),
            ScenarioAction::DropAckOnce { ack } => sim.add_drop_ack_once(*ack),
        }
    }
    sim
}

pub fn run(scenario: &Scenario) -> Result<SimulationReport> {
    info!("Running scenario '{}': {}", scenario.name, scenario.description);
    let report = build_simulator(scenario)
        .run(scenario.message.as_bytes())
        .with_context(|| format!("Scenario '{}' transfer failed", scenario.name))?;
    check(scenario, &report).with_context(|| format!("Scenario '{}' failed", scenario.name))?;
    info!(
        "Scenario '{}' passed ({} assertions, {} ms)",
        scenario.name,
        scenario.assertions.len(),
        report.duration_ms
    );
    Ok(report)
}

/// Fails on the first assertion the report does not satisfy.
pub fn check(scenario: &Scenario, report: &SimulationReport) -> Result<()> {
    for assertion in &scenario.assertions {
        match assertion {
            ScenarioAssertion::Delivered { data } => {
                let expected = data.as_deref().unwrap_or(&scenario.message);
                let Some(delivered) = report.delivered_text() else {
                    bail!("Expected '{}' to be delivered, but reassembly is incomplete", expected);
                };
                ensure!(
                    delivered == expected,
                    "Expected '{}' to be delivered, got '{}'",
                    expected,
                    delivered
                );
            }
            ScenarioAssertion::SegmentTransmissions { seq, min, max } => {
                let count = usize::try_from(*seq)
                    .ok()
                    .and_then(|index| report.transmissions.get(index).copied())
                    .with_context(|| format!("Segment {seq} does not exist"))?;
                ensure!(
                    count >= *min,
                    "Segment {} sent {} times, expected at least {}",
                    seq,
                    count,
                    min
                );
                if let Some(max) = max {
                    ensure!(
                        count <= *max,
                        "Segment {} sent {} times, expected at most {}",
                        seq,
                        count,
                        max
                    );
                }
            }
            ScenarioAssertion::TotalRetransmissions { min, max } => {
                let total = report.total_retransmissions();
                ensure!(
                    total >= *min,
                    "{} retransmissions, expected at least {}",
                    total,
                    min
                );
                if let Some(max) = max {
                    ensure!(
                        total <= *max,
                        "{} retransmissions, expected at most {}",
                        total,
                        max
                    );
                }
            }
            ScenarioAssertion::MaxDuration { ms } => {
                ensure!(
                    report.duration_ms <= *ms,
                    "Transfer took {} ms, limit {} ms",
                    report.duration_ms,
                    ms
                );
            }
        }
    }
    Ok(())
}
