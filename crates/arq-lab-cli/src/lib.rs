pub mod params;
pub mod session;
pub mod transport;

use anyhow::{Context, Result, bail};
use arq_lab_core::{ArqConfig, DEFAULT_MAX_SEGMENT_SIZE, JoinPolicy};
use arq_lab_simulator::{LinkConfig, SimulationReport, Simulator, scenario_runner};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::params::{Params, seconds};
use crate::session::ClientOptions;

pub const DEFAULT_ADDR: &str = "127.0.0.1:65432";

#[derive(Parser, Debug)]
#[command(author, version, about = "Sliding-window ARQ over TCP and over a simulated link")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one connection and reassemble the message it carries.
    Server(ServerArgs),
    /// Connect to a server and send one message.
    Client(ClientArgs),
    /// Run a transfer over the in-process simulated link.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JoinArg {
    /// Byte-exact concatenation.
    Concat,
    /// One space at every seam that has none.
    Space,
}

impl From<JoinArg> for JoinPolicy {
    fn from(value: JoinArg) -> Self {
        match value {
            JoinArg::Concat => JoinPolicy::Concatenate,
            JoinArg::Space => JoinPolicy::SpaceSeparated,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub listen: String,

    /// Largest payload the client may put in one segment, announced in the handshake.
    #[arg(long, default_value_t = DEFAULT_MAX_SEGMENT_SIZE)]
    pub max_segment_size: usize,

    /// Seconds to wait before sending each ACK.
    #[arg(long, default_value_t = 0.0)]
    pub ack_delay: f64,

    #[arg(long, value_enum, default_value_t = JoinArg::Concat)]
    pub join: JoinArg,

    /// TOML parameter file; its values win over flags.
    #[arg(long)]
    pub params: Option<PathBuf>,
}

impl ServerArgs {
    pub fn config(&self) -> Result<ArqConfig> {
        let mut config = ArqConfig {
            max_segment_size: self.max_segment_size,
            ack_delay: seconds("ack_delay", self.ack_delay)?,
            join: self.join.into(),
            ..Default::default()
        };
        Params::load_optional(self.params.as_deref())?.apply_to(&mut config)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(clap::Args, Debug)]
pub struct ClientArgs {
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub connect: String,

    /// Message to send; may also come from the parameter file.
    #[arg(long)]
    pub message: Option<String>,

    #[arg(long, default_value_t = 4)]
    pub window_size: usize,

    /// Retransmission timeout in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    /// Cap the segment size below what the server announces.
    #[arg(long)]
    pub max_segment_size: Option<usize>,

    /// Give up on a segment after this many retransmissions.
    #[arg(long, default_value_t = 10, conflicts_with = "no_retry_limit")]
    pub max_retransmissions: u32,

    /// Retransmit forever.
    #[arg(long, default_value_t = false)]
    pub no_retry_limit: bool,

    /// Wrap the message in double quotes before segmenting.
    #[arg(long, default_value_t = false)]
    pub quote: bool,

    #[arg(long)]
    pub params: Option<PathBuf>,
}

impl ClientArgs {
    /// Resolves flags and the parameter file into the message and client options.
    pub fn resolve(&self) -> Result<(String, ClientOptions)> {
        let params = Params::load_optional(self.params.as_deref())?;
        let mut config = ArqConfig {
            window_size: self.window_size,
            timeout: seconds("timeout", self.timeout)?,
            max_retransmissions: (!self.no_retry_limit).then_some(self.max_retransmissions),
            ..Default::default()
        };
        params.apply_to(&mut config)?;
        config.validate()?;

        let Some(message) = params.message.clone().or_else(|| self.message.clone()) else {
            bail!("No message given; pass --message or set `message` in the parameter file");
        };
        let options = ClientOptions {
            max_segment_size: params.maximum_msg_size.or(self.max_segment_size),
            config,
            quote: self.quote,
        };
        Ok((message, options))
    }
}

#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Run a scenario file and check its assertions; the link flags below are ignored.
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    #[arg(long, default_value = "Hello from the other end of a lossy link")]
    pub message: String,

    #[arg(long, default_value_t = 8)]
    pub max_segment_size: usize,

    #[arg(long, default_value_t = 4)]
    pub window_size: usize,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = 10)]
    pub max_retransmissions: u32,

    #[arg(long, default_value_t = 0.0)]
    pub loss_rate: f64,

    #[arg(long, default_value_t = 10)]
    pub min_latency: u64,

    #[arg(long, default_value_t = 100)]
    pub max_latency: u64,

    /// Split every write into chunks of at most this many bytes.
    #[arg(long)]
    pub max_chunk: Option<usize>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Drop the first transmission of this segment. Repeatable.
    #[arg(long = "drop-segment")]
    pub drop_segments: Vec<u64>,

    /// Drop the first copy of this ACK. Repeatable.
    #[arg(long = "drop-ack")]
    pub drop_acks: Vec<u64>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    pub trace_out: Option<PathBuf>,
}

impl SimulateArgs {
    pub fn build_simulator(&self) -> Simulator {
        let config = ArqConfig {
            max_segment_size: self.max_segment_size,
            window_size: self.window_size,
            timeout: Duration::from_millis(self.timeout_ms),
            max_retransmissions: Some(self.max_retransmissions),
            ..Default::default()
        };
        let link = LinkConfig {
            loss_rate: self.loss_rate,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            max_chunk: self.max_chunk,
            seed: self.seed,
        };
        let mut sim = Simulator::new(config, link);
        for &seq in &self.drop_segments {
            sim.add_drop_segment_once(seq);
        }
        for &ack in &self.drop_acks {
            sim.add_drop_ack_once(ack);
        }
        sim
    }

    pub fn run(&self) -> Result<SimulationReport> {
        let report = match &self.scenario {
            Some(path) => scenario_runner::run_scenario(path)?,
            None => self
                .build_simulator()
                .run(self.message.as_bytes())
                .context("Simulated transfer failed")?,
        };
        log_summary(&report);
        if let Some(path) = &self.trace_out {
            write_trace(path, &report)?;
        }
        Ok(report)
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Simulation duration: {} ms | frames sent: {} | retransmissions: {} | delivered: {}",
        report.duration_ms,
        report.sender.frames_sent,
        report.total_retransmissions(),
        report.delivered.is_some()
    );
}

pub fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    info!("Trace written to {}", path.display());
    Ok(())
}
