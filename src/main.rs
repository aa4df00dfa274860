mod backend;
mod cli;
mod config;
mod engine;
mod error;
mod output;
mod snapshot;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting PipePulse - CI Pipeline Health Dashboard");
    cli.execute().await?;

    Ok(())
}
