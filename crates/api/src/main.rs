use std::sync::Arc;

use anyhow::Context;

use tripvault_api::app::{AppServices, build_app};
use tripvault_infra::VaultConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tripvault_observability::init();

    let config = VaultConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "starting trip vault");

    let services = Arc::new(AppServices::from_config(&config).await?);
    let app = build_app(&config.jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
