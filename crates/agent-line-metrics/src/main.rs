use std::process::ExitCode;

use agent_line_metrics::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    Cli::parse().execute().await
}
