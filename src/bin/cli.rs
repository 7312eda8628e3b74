use clap::Parser;

use vnstat_gateway::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    cli::run(Cli::parse()).await
}
