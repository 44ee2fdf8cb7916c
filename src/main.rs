mod bridge;
mod broker;
mod compare;
mod config;
mod error;
mod metrics;
mod models;
mod pipeline;
mod sandbox;
mod worker;

use tracing_subscriber::EnvFilter;

use crate::config::JudgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = JudgeConfig::from_env();
    let role = std::env::args().nth(1).unwrap_or_else(|| "worker".to_string());
    match role.as_str() {
        "worker" => worker::run(config).await,
        "bridge" => bridge::run(config).await,
        other => anyhow::bail!("unknown role {other:?}; expected \"worker\" or \"bridge\""),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
