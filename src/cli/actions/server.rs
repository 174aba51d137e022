use crate::{Engine, api, clock::SystemClock, config::EngineConfig, store::RedisStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub redis_url: String,
    pub config: EngineConfig,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the configuration is unsafe, Redis is unreachable, or
/// the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    // Fail before touching the network.
    args.config
        .validate()
        .context("Refusing to start with an unsafe configuration")?;

    debug!(environment = %args.config.environment(), "Connecting to Redis");
    let store = RedisStore::connect(&args.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let engine = Engine::new(args.config, Arc::new(store), Arc::new(SystemClock))
        .context("Failed to build credential engine")?;

    if let Err(err) = engine.ping_store().await {
        // Not fatal: the breaker reports the state on /health.
        tracing::warn!("Store is not answering at startup: {err}");
    }

    info!("Starting credgate on port {}", args.port);
    api::serve(Arc::new(engine), args.port).await
}
