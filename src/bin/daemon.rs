use std::fs::OpenOptions;

use anyhow::Context;
use clap::Parser;

use vnstat_gateway::{AppState, Settings, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    init_logging(&settings)?;

    log::info!("{} {} starting", vnstat_gateway::gateway::SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    let config = match settings.validate() {
        Ok(config) => config,
        Err(errors) => {
            for issue in &errors.0 {
                log::error!("configuration: {issue}");
            }
            return Err(errors).context("refusing to start with invalid configuration");
        }
    };

    match &config.tls {
        Some(tls) => log::info!(
            "TLS enabled: cert={} key={}",
            tls.cert.display(),
            tls.key.display()
        ),
        None => log::info!("TLS disabled"),
    }
    log::info!(
        "vnstat={} timeout={}s max_concurrent_tools={} api_key={:?}",
        config.tool_path.display(),
        config.request_timeout.as_secs(),
        config.max_concurrent_tools,
        config.api_key
    );
    log::info!("CORS origins: {:?}", config.cors_origins);
    if config.allowlist_enabled() {
        log::info!("source allowlist: {:?}", config.allowed_source_ips);
    }

    server::serve(AppState::new(config)).await
}

fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(path) = &settings.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}
