//! Tollgate gateway entry point.
//!
//! Loads configuration, then hands off to [`gateway::run_with_shutdown`]
//! until Ctrl-C.
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = gateway::config::GatewayConfig::from_env_or_yaml()
        .context("load gateway config")?;
    gateway::run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
