//! chatload - load generator for streaming chat-completion endpoints

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatload::cli::Cli;
use chatload::runner::RunManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so jsonl statistics on stdout stay machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config();
    let manager = Arc::new(RunManager::new());

    // First interrupt drains gracefully; a second one exits immediately.
    let interrupt_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(
                "interrupt received, draining in-flight requests; interrupt again to exit now"
            );
            interrupt_manager.request_stop();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("second interrupt, exiting without draining");
            std::process::exit(1);
        }
    });

    manager.run(config).await?;
    Ok(())
}
