pub mod engine;
pub mod link;
pub mod scenario;
pub mod scenario_runner;
pub mod trace;

pub use engine::Simulator;
pub use link::{LinkConfig, LinkEventSummary, Side, SimChannel, SimLink};
pub use scenario::{Scenario, ScenarioAction, ScenarioAssertion};
pub use trace::SimulationReport;
