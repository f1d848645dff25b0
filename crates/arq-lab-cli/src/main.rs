use anyhow::{Context, Result, bail};
use arq_lab_cli::session;
use arq_lab_cli::{Cli, Command, init_logging};
use clap::Parser;
use tracing::info;

// `simulate` builds its own paused runtime, which cannot nest inside another.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    info!("arq-lab starting…");

    match cli.command {
        Command::Server(args) => {
            let config = args.config()?;
            let outcome = runtime()?.block_on(session::listen_once(args.listen.as_str(), &config))?;
            if let Err(missing) = outcome.message {
                bail!("Transfer from {} incomplete: segment {} missing", outcome.peer, missing);
            }
        }
        Command::Client(args) => {
            let (message, options) = args.resolve()?;
            runtime()?.block_on(session::send_message(
                args.connect.as_str(),
                message.as_bytes(),
                &options,
            ))?;
        }
        Command::Simulate(args) => {
            args.run()?;
        }
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the tokio runtime")
}
