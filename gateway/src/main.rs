use anyhow::Result;
use clap::Parser;

use stevedore_gateway::args::Cli;
use stevedore_gateway::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    run_server(cli).await
}
