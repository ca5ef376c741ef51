use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use af_service::{serve, ServiceConfig, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    let registry = Arc::new(SessionRegistry::new(config.tuner.clone()));

    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        "autofe tuner service listening on {} ({}, feature_percent={}, max_sample={})",
        config.addr,
        config.tuner.optimize_direction,
        config.tuner.feature_percent,
        config.tuner.max_sample
    );

    serve(listener, registry).await
}
