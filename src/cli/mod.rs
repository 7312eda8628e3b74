//! `vnstat-gateway-cli`: poll a single gateway and print its envelope.

pub mod fetch;

use std::time::Duration;

use clap::{Parser, Subcommand};

use fetch::GatewayClient;

#[derive(Debug, Parser)]
#[command(name = "vnstat-gateway-cli", version, about = "Query a vnstat-gateway")]
pub struct Cli {
    /// Gateway base URL, e.g. https://host:8443
    #[arg(long, env = "VNSTAT_GATEWAY_URL", default_value = "https://127.0.0.1:8443")]
    pub url: String,

    /// Bearer key for the gateway
    #[arg(long, env = "VNSTAT_GATEWAY_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Accept self-signed certificates
    #[arg(long)]
    pub insecure: bool,

    /// Attempts per request (transport errors and 503 are retried)
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Liveness check (no key needed)
    Ping,
    /// Current counters for all interfaces
    Traffic,
    /// Short live traffic-rate sample
    Realtime,
    /// Hourly, daily or monthly rollup
    History {
        /// h, d or m (hour, day, month)
        #[arg(short, long, default_value = "d")]
        period: String,
    },
    /// Interface names, aliases and creation dates
    Interfaces,
    /// Gateway and vnstat availability
    Status,
}

impl Command {
    fn path(&self) -> &'static str {
        match self {
            Command::Ping => "/",
            Command::Traffic => "/traffic",
            Command::Realtime => "/traffic/realtime",
            Command::History { .. } => "/traffic/history",
            Command::Interfaces => "/interfaces",
            Command::Status => "/status",
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = GatewayClient::new(
        &cli.url,
        cli.api_key.clone(),
        cli.insecure,
        Duration::from_secs(cli.timeout),
    )?;

    let query: Vec<(&str, &str)> = match &cli.command {
        Command::History { period } => vec![("period", period.as_str())],
        _ => Vec::new(),
    };

    let body = client
        .fetch_with_retry(cli.command.path(), &query, cli.retries)
        .await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
